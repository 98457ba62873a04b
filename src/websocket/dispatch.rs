//! Event handlers for authenticated sockets. Every handler runs to
//! completion before the next event from the same socket; failures become a
//! single scoped `error` emission to the sender and nothing else.

use tracing::warn;
use uuid::Uuid;

use crate::auth::ConnectionIdentity;
use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationScope, Message, MessageDto, Party};
use crate::state::AppState;

use super::events::{WsInboundEvent, WsOutboundEvent};
use super::{Room, SocketId};

pub async fn handle_event(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    event: WsInboundEvent,
) {
    let result = match event {
        WsInboundEvent::Authenticate { .. } => {
            Err(AppError::Validation("already authenticated".into()))
        }
        WsInboundEvent::JoinConversation {
            conversation_id, ..
        } => join_conversation(state, socket, identity, conversation_id).await,
        WsInboundEvent::LeaveConversation { conversation_id } => {
            leave_conversation(state, socket, identity, conversation_id).await
        }
        WsInboundEvent::SendMessage {
            conversation_id,
            content,
            timeline_id,
            property_id,
        } => {
            send_message(
                state,
                socket,
                identity,
                conversation_id,
                &content,
                timeline_id,
                ConversationScope::from_property(property_id),
            )
            .await
        }
        WsInboundEvent::TypingStart { conversation_id } => {
            typing(state, socket, identity, conversation_id, true).await
        }
        WsInboundEvent::TypingStop { conversation_id } => {
            typing(state, socket, identity, conversation_id, false).await
        }
        WsInboundEvent::MarkMessagesRead { conversation_id } => {
            mark_messages_read(state, socket, identity, conversation_id).await
        }
    };

    if let Err(e) = result {
        warn!(%socket, user_id = %identity.user_id, error = %e, "socket event failed");
        state
            .registry
            .send(
                socket,
                WsOutboundEvent::Error {
                    message: e.ws_message(),
                },
            )
            .await;
    }
}

async fn join_conversation(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    conversation_id: Uuid,
) -> AppResult<()> {
    let conversation = state
        .service
        .get_conversation(conversation_id, identity.user_id, identity.user_type)
        .await?;

    state
        .registry
        .join(socket, Room::Conversation(conversation_id))
        .await;

    // the joiner has the thread on screen now, so their unread state resets
    // before the page is rendered
    state
        .service
        .mark_messages_as_read(conversation_id, identity.user_id, identity.user_type)
        .await?;
    let page = state
        .service
        .get_messages(
            conversation_id,
            identity.user_id,
            identity.user_type,
            1,
            state.config.message_page_size,
        )
        .await?;

    state
        .registry
        .send(
            socket,
            WsOutboundEvent::ConversationJoined {
                conversation_id,
                messages: page.messages.iter().map(MessageDto::from).collect(),
                property_id: conversation.scope.property_id(),
            },
        )
        .await;

    state
        .registry
        .broadcast(
            Room::Conversation(conversation_id),
            WsOutboundEvent::UserJoined {
                conversation_id,
                user_id: identity.user_id,
                user_type: identity.user_type,
            },
            Some(socket),
        )
        .await;

    Ok(())
}

async fn leave_conversation(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    conversation_id: Uuid,
) -> AppResult<()> {
    state
        .registry
        .leave(socket, Room::Conversation(conversation_id))
        .await;
    state
        .registry
        .broadcast(
            Room::Conversation(conversation_id),
            WsOutboundEvent::UserLeft {
                conversation_id,
                user_id: identity.user_id,
                user_type: identity.user_type,
            },
            Some(socket),
        )
        .await;
    Ok(())
}

async fn send_message(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    conversation_id: Option<Uuid>,
    content: &str,
    timeline_id: Option<Uuid>,
    scope: ConversationScope,
) -> AppResult<()> {
    let sent = match conversation_id {
        Some(id) => {
            match state
                .service
                .send_message(id, identity.user_id, identity.user_type, content)
                .await
            {
                // the one error the gateway converts into auto-create, and
                // only when timeline context exists for this sender
                Err(AppError::NotFound) if timeline_context(identity, timeline_id).is_some() => {
                    auto_create_send(state, identity, content, timeline_id, scope).await?
                }
                other => other?,
            }
        }
        None => auto_create_send(state, identity, content, timeline_id, scope).await?,
    };

    let (message, conversation) = sent;
    broadcast_message(state, socket, &message, &conversation).await;
    Ok(())
}

/// Auto-create resolution rule: an agent must name the timeline explicitly;
/// a client's timeline comes from its connection identity.
fn timeline_context(identity: &ConnectionIdentity, payload_timeline: Option<Uuid>) -> Option<Uuid> {
    match identity.user_type {
        Party::Agent => payload_timeline,
        Party::Client => identity.bound_timeline(),
    }
}

async fn auto_create_send(
    state: &AppState,
    identity: &ConnectionIdentity,
    content: &str,
    timeline_id: Option<Uuid>,
    scope: ConversationScope,
) -> AppResult<(Message, Conversation)> {
    let timeline_id = timeline_context(identity, timeline_id).ok_or_else(|| match identity
        .user_type
    {
        Party::Agent => AppError::Validation("timeline_id is required to start a conversation".into()),
        Party::Client => AppError::Unauthorized,
    })?;

    let parties = state
        .directory
        .timeline_parties(timeline_id)
        .await?
        .ok_or_else(|| AppError::Validation("timeline not found".into()))?;

    state
        .service
        .send_message_with_auto_create(
            parties.agent_id,
            parties.client_id,
            timeline_id,
            identity.user_id,
            identity.user_type,
            content,
            scope,
        )
        .await
}

/// Fan-out after the write has committed: full message to the conversation
/// room, a notification (with property identity) to the counterpart's
/// personal room, then the ack to the sender.
async fn broadcast_message(
    state: &AppState,
    socket: SocketId,
    message: &Message,
    conversation: &Conversation,
) {
    let property_id = conversation.scope.property_id();

    state
        .registry
        .broadcast(
            Room::Conversation(conversation.id),
            WsOutboundEvent::NewMessage {
                message: MessageDto::from(message),
                property_id,
            },
            None,
        )
        .await;

    let recipient = conversation.counterpart(message.sender_type);
    state
        .registry
        .broadcast(
            Room::User(recipient),
            WsOutboundEvent::MessageNotification {
                conversation_id: conversation.id,
                sender_id: message.sender_id,
                sender_type: message.sender_type,
                content: message.content.clone(),
                timestamp: message.created_at.to_rfc3339(),
                property_id,
            },
            None,
        )
        .await;

    state
        .registry
        .send(
            socket,
            WsOutboundEvent::MessageSent {
                id: message.id,
                conversation_id: conversation.id,
            },
        )
        .await;
}

async fn typing(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    conversation_id: Uuid,
    is_typing: bool,
) -> AppResult<()> {
    // ephemeral; nothing persisted
    state
        .registry
        .broadcast(
            Room::Conversation(conversation_id),
            WsOutboundEvent::UserTyping {
                conversation_id,
                user_id: identity.user_id,
                user_type: identity.user_type,
                is_typing,
            },
            Some(socket),
        )
        .await;
    Ok(())
}

async fn mark_messages_read(
    state: &AppState,
    socket: SocketId,
    identity: &ConnectionIdentity,
    conversation_id: Uuid,
) -> AppResult<()> {
    // a repeat mark-read changes nothing and emits no receipt
    if let Some(read_at) = state
        .service
        .mark_messages_as_read(conversation_id, identity.user_id, identity.user_type)
        .await?
    {
        state
            .registry
            .broadcast(
                Room::Conversation(conversation_id),
                WsOutboundEvent::MessagesRead {
                    conversation_id,
                    user_id: identity.user_id,
                    user_type: identity.user_type,
                    read_at: read_at.to_rfc3339(),
                },
                Some(socket),
            )
            .await;
    }

    Ok(())
}
