//! Gateway-level tests: inbound events dispatched against registered
//! sockets, asserting exactly which rooms see which emissions.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use timeline_chat_service::auth::{
    ConnectionAuthenticator, ConnectionIdentity, JwtVerifier, TimelineBinding,
};
use timeline_chat_service::config::Config;
use timeline_chat_service::models::{ConversationScope, Party};
use timeline_chat_service::services::{MemoryDirectory, MessagingService};
use timeline_chat_service::state::AppState;
use timeline_chat_service::store::{ConversationStore, MemoryConversationStore};
use timeline_chat_service::websocket::dispatch::handle_event;
use timeline_chat_service::websocket::events::{WsInboundEvent, WsOutboundEvent};
use timeline_chat_service::websocket::{Room, RoomRegistry, SocketId};

struct Harness {
    state: AppState,
    store: Arc<MemoryConversationStore>,
    agent: Uuid,
    client: Uuid,
    timeline: Uuid,
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryConversationStore::new());
    let directory = Arc::new(MemoryDirectory::new());
    let jwt = JwtVerifier::from_rsa_pem(include_bytes!("data/jwt_test_public.pem")).unwrap();

    let agent = Uuid::new_v4();
    let client = Uuid::new_v4();
    let timeline = Uuid::new_v4();
    directory
        .insert_timeline(timeline, agent, client, "share-token")
        .await;

    let state = AppState {
        config: Arc::new(Config::test_defaults()),
        service: Arc::new(MessagingService::new(store.clone(), 20, None)),
        directory: directory.clone(),
        authenticator: Arc::new(ConnectionAuthenticator::new(jwt, directory.clone())),
        registry: RoomRegistry::new(),
    };

    Harness {
        state,
        store,
        agent,
        client,
        timeline,
    }
}

impl Harness {
    fn client_identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::client(
            self.client,
            TimelineBinding {
                timeline_id: self.timeline,
                share_token: "share-token".into(),
            },
        )
    }

    /// A registered socket already sitting in its personal room, the way the
    /// connection loop leaves every authenticated socket.
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
    ) -> (SocketId, UnboundedReceiver<WsOutboundEvent>) {
        let (socket, rx) = self.state.registry.register().await;
        self.state
            .registry
            .join(socket, Room::User(identity.user_id))
            .await;
        (socket, rx)
    }
}

fn drain(rx: &mut UnboundedReceiver<WsOutboundEvent>) -> Vec<WsOutboundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn client_auto_create_send_reaches_the_agent_room() {
    let h = harness().await;
    let property = Uuid::new_v4();

    let agent_identity = ConnectionIdentity::agent(h.agent);
    let client_identity = h.client_identity();
    let (_agent_socket, mut agent_rx) = h.connect(&agent_identity).await;
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;

    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::SendMessage {
            conversation_id: None,
            content: "is the garden south-facing?".into(),
            timeline_id: None,
            property_id: Some(property),
        },
    )
    .await;

    // client side: just the ack, no echo into a room it never joined
    let client_events = drain(&mut client_rx);
    assert_eq!(client_events.len(), 1);
    let conv_id = match &client_events[0] {
        WsOutboundEvent::MessageSent {
            conversation_id, ..
        } => *conversation_id,
        other => panic!("expected ack, got {other:?}"),
    };

    // agent side: exactly one notification carrying the property identity
    let agent_events = drain(&mut agent_rx);
    assert_eq!(agent_events.len(), 1);
    match &agent_events[0] {
        WsOutboundEvent::MessageNotification {
            conversation_id,
            sender_type,
            content,
            property_id,
            ..
        } => {
            assert_eq!(*conversation_id, conv_id);
            assert_eq!(*sender_type, Party::Client);
            assert_eq!(content, "is the garden south-facing?");
            assert_eq!(*property_id, Some(property));
        }
        other => panic!("expected notification, got {other:?}"),
    }

    let conv = h.store.get_conversation(conv_id).await.unwrap().unwrap();
    assert_eq!(conv.agent_unread_count, 1);
}

#[tokio::test]
async fn sends_never_bleed_across_property_rooms() {
    let h = harness().await;
    let p1 = Uuid::new_v4();
    let p2 = Uuid::new_v4();

    let conv1 = h
        .state
        .service
        .create_or_get_conversation(
            h.agent,
            h.client,
            h.timeline,
            ConversationScope::ForProperty(p1),
        )
        .await
        .unwrap()
        .conversation;
    let conv2 = h
        .state
        .service
        .create_or_get_conversation(
            h.agent,
            h.client,
            h.timeline,
            ConversationScope::ForProperty(p2),
        )
        .await
        .unwrap()
        .conversation;
    assert_ne!(conv1.id, conv2.id);

    // an observer watching only the first property's room
    let (observer, mut observer_rx) = h.state.registry.register().await;
    h.state
        .registry
        .join(observer, Room::Conversation(conv1.id))
        .await;

    let client_identity = h.client_identity();
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;

    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::SendMessage {
            conversation_id: Some(conv2.id),
            content: "second property only".into(),
            timeline_id: None,
            property_id: None,
        },
    )
    .await;

    assert!(drain(&mut observer_rx).is_empty());
    assert!(matches!(
        drain(&mut client_rx).as_slice(),
        [WsOutboundEvent::MessageSent { .. }]
    ));
}

#[tokio::test]
async fn join_replays_history_resets_unread_and_announces_to_others() {
    let h = harness().await;
    let conv = h
        .state
        .service
        .create_or_get_conversation(h.agent, h.client, h.timeline, ConversationScope::General)
        .await
        .unwrap()
        .conversation;
    h.state
        .service
        .send_message(conv.id, h.client, Party::Client, "knock knock")
        .await
        .unwrap();

    let client_identity = h.client_identity();
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;
    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::JoinConversation {
            conversation_id: conv.id,
            property_id: None,
        },
    )
    .await;
    // sole member: history for the joiner, no self-announcement
    assert!(matches!(
        drain(&mut client_rx).as_slice(),
        [WsOutboundEvent::ConversationJoined { .. }]
    ));

    let agent_identity = ConnectionIdentity::agent(h.agent);
    let (agent_socket, mut agent_rx) = h.connect(&agent_identity).await;
    handle_event(
        &h.state,
        agent_socket,
        &agent_identity,
        WsInboundEvent::JoinConversation {
            conversation_id: conv.id,
            property_id: None,
        },
    )
    .await;

    let agent_events = drain(&mut agent_rx);
    assert_eq!(agent_events.len(), 1);
    match &agent_events[0] {
        WsOutboundEvent::ConversationJoined {
            conversation_id,
            messages,
            property_id,
        } => {
            assert_eq!(*conversation_id, conv.id);
            assert_eq!(messages.len(), 1);
            assert_eq!(messages[0].content, "knock knock");
            assert!(property_id.is_none());
        }
        other => panic!("expected history replay, got {other:?}"),
    }

    // the earlier member hears about the newcomer
    let client_events = drain(&mut client_rx);
    assert_eq!(client_events.len(), 1);
    match &client_events[0] {
        WsOutboundEvent::UserJoined {
            user_id, user_type, ..
        } => {
            assert_eq!(*user_id, h.agent);
            assert_eq!(*user_type, Party::Agent);
        }
        other => panic!("expected join announcement, got {other:?}"),
    }

    // opening the thread read it
    let conv = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(conv.agent_unread_count, 0);
}

#[tokio::test]
async fn unauthorized_join_emits_error_and_grants_no_membership() {
    let h = harness().await;
    let conv = h
        .state
        .service
        .create_or_get_conversation(h.agent, h.client, h.timeline, ConversationScope::General)
        .await
        .unwrap()
        .conversation;

    let stranger = ConnectionIdentity::agent(Uuid::new_v4());
    let (socket, mut rx) = h.connect(&stranger).await;
    handle_event(
        &h.state,
        socket,
        &stranger,
        WsInboundEvent::JoinConversation {
            conversation_id: conv.id,
            property_id: None,
        },
    )
    .await;

    match drain(&mut rx).as_slice() {
        [WsOutboundEvent::Error { message }] => {
            assert_eq!(message, "not a participant of this conversation");
        }
        other => panic!("expected a single error, got {other:?}"),
    }

    // later traffic in that room must not reach the rejected socket
    let client_identity = h.client_identity();
    let (client_socket, _client_rx) = h.connect(&client_identity).await;
    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::SendMessage {
            conversation_id: Some(conv.id),
            content: "private".into(),
            timeline_id: None,
            property_id: None,
        },
    )
    .await;
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn agent_auto_create_requires_an_explicit_timeline() {
    let h = harness().await;
    let agent_identity = ConnectionIdentity::agent(h.agent);
    let (socket, mut rx) = h.connect(&agent_identity).await;

    handle_event(
        &h.state,
        socket,
        &agent_identity,
        WsInboundEvent::SendMessage {
            conversation_id: None,
            content: "hello".into(),
            timeline_id: None,
            property_id: None,
        },
    )
    .await;

    match drain(&mut rx).as_slice() {
        [WsOutboundEvent::Error { message }] => {
            assert_eq!(message, "timeline_id is required to start a conversation");
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn agent_send_to_unknown_conversation_auto_creates_with_timeline_context() {
    let h = harness().await;
    let agent_identity = ConnectionIdentity::agent(h.agent);
    let (socket, mut rx) = h.connect(&agent_identity).await;

    // stale id from a previous session; the payload still names the timeline
    handle_event(
        &h.state,
        socket,
        &agent_identity,
        WsInboundEvent::SendMessage {
            conversation_id: Some(Uuid::new_v4()),
            content: "resuming".into(),
            timeline_id: Some(h.timeline),
            property_id: None,
        },
    )
    .await;

    match drain(&mut rx).as_slice() {
        [WsOutboundEvent::MessageSent {
            conversation_id, ..
        }] => {
            let conv = h
                .store
                .get_conversation(*conversation_id)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(conv.agent_id, h.agent);
            assert_eq!(conv.client_id, h.client);
            assert!(conv.scope.is_general());
        }
        other => panic!("expected ack after auto-create, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_timeline_is_reported_as_such() {
    let h = harness().await;
    let agent_identity = ConnectionIdentity::agent(h.agent);
    let (socket, mut rx) = h.connect(&agent_identity).await;

    handle_event(
        &h.state,
        socket,
        &agent_identity,
        WsInboundEvent::SendMessage {
            conversation_id: None,
            content: "hello".into(),
            timeline_id: Some(Uuid::new_v4()),
            property_id: None,
        },
    )
    .await;

    match drain(&mut rx).as_slice() {
        [WsOutboundEvent::Error { message }] => assert_eq!(message, "timeline not found"),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn typing_is_broadcast_to_everyone_but_the_typist() {
    let h = harness().await;
    let conv = h
        .state
        .service
        .create_or_get_conversation(h.agent, h.client, h.timeline, ConversationScope::General)
        .await
        .unwrap()
        .conversation;

    let agent_identity = ConnectionIdentity::agent(h.agent);
    let client_identity = h.client_identity();
    let (agent_socket, mut agent_rx) = h.connect(&agent_identity).await;
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;
    h.state
        .registry
        .join(agent_socket, Room::Conversation(conv.id))
        .await;
    h.state
        .registry
        .join(client_socket, Room::Conversation(conv.id))
        .await;

    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::TypingStart {
            conversation_id: conv.id,
        },
    )
    .await;
    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::TypingStop {
            conversation_id: conv.id,
        },
    )
    .await;

    assert!(drain(&mut client_rx).is_empty());
    let agent_events = drain(&mut agent_rx);
    assert_eq!(agent_events.len(), 2);
    match (&agent_events[0], &agent_events[1]) {
        (
            WsOutboundEvent::UserTyping {
                is_typing: true, ..
            },
            WsOutboundEvent::UserTyping {
                is_typing: false, ..
            },
        ) => {}
        other => panic!("expected typing start then stop, got {other:?}"),
    }
}

#[tokio::test]
async fn mark_read_broadcasts_to_the_room_excluding_the_reader() {
    let h = harness().await;
    let conv = h
        .state
        .service
        .create_or_get_conversation(h.agent, h.client, h.timeline, ConversationScope::General)
        .await
        .unwrap()
        .conversation;
    h.state
        .service
        .send_message(conv.id, h.client, Party::Client, "unread for the agent")
        .await
        .unwrap();

    let agent_identity = ConnectionIdentity::agent(h.agent);
    let client_identity = h.client_identity();
    let (agent_socket, mut agent_rx) = h.connect(&agent_identity).await;
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;
    h.state
        .registry
        .join(agent_socket, Room::Conversation(conv.id))
        .await;
    h.state
        .registry
        .join(client_socket, Room::Conversation(conv.id))
        .await;

    handle_event(
        &h.state,
        agent_socket,
        &agent_identity,
        WsInboundEvent::MarkMessagesRead {
            conversation_id: conv.id,
        },
    )
    .await;

    assert!(drain(&mut agent_rx).is_empty());
    match drain(&mut client_rx).as_slice() {
        [WsOutboundEvent::MessagesRead {
            conversation_id,
            user_id,
            user_type,
            read_at,
        }] => {
            assert_eq!(*conversation_id, conv.id);
            assert_eq!(*user_id, h.agent);
            assert_eq!(*user_type, Party::Agent);
            assert!(!read_at.is_empty());
        }
        other => panic!("expected a read receipt, got {other:?}"),
    }

    let refreshed = h.store.get_conversation(conv.id).await.unwrap().unwrap();
    assert_eq!(refreshed.agent_unread_count, 0);

    // nothing left unread: the repeat emits no receipt at all
    handle_event(
        &h.state,
        agent_socket,
        &agent_identity,
        WsInboundEvent::MarkMessagesRead {
            conversation_id: conv.id,
        },
    )
    .await;
    assert!(drain(&mut client_rx).is_empty());
    assert!(drain(&mut agent_rx).is_empty());
}

#[tokio::test]
async fn second_authenticate_on_a_live_socket_is_rejected() {
    let h = harness().await;
    let agent_identity = ConnectionIdentity::agent(h.agent);
    let (socket, mut rx) = h.connect(&agent_identity).await;

    handle_event(
        &h.state,
        socket,
        &agent_identity,
        WsInboundEvent::Authenticate {
            token: Some("again".into()),
            session_token: None,
            share_token: None,
        },
    )
    .await;

    match drain(&mut rx).as_slice() {
        [WsOutboundEvent::Error { message }] => assert_eq!(message, "already authenticated"),
        other => panic!("expected an error, got {other:?}"),
    }
}

#[tokio::test]
async fn leave_stops_room_traffic_and_announces_departure() {
    let h = harness().await;
    let conv = h
        .state
        .service
        .create_or_get_conversation(h.agent, h.client, h.timeline, ConversationScope::General)
        .await
        .unwrap()
        .conversation;

    let agent_identity = ConnectionIdentity::agent(h.agent);
    let client_identity = h.client_identity();
    let (agent_socket, mut agent_rx) = h.connect(&agent_identity).await;
    let (client_socket, mut client_rx) = h.connect(&client_identity).await;
    h.state
        .registry
        .join(agent_socket, Room::Conversation(conv.id))
        .await;
    h.state
        .registry
        .join(client_socket, Room::Conversation(conv.id))
        .await;

    handle_event(
        &h.state,
        client_socket,
        &client_identity,
        WsInboundEvent::LeaveConversation {
            conversation_id: conv.id,
        },
    )
    .await;

    assert!(matches!(
        drain(&mut agent_rx).as_slice(),
        [WsOutboundEvent::UserLeft { .. }]
    ));

    handle_event(
        &h.state,
        agent_socket,
        &agent_identity,
        WsInboundEvent::SendMessage {
            conversation_id: Some(conv.id),
            content: "anyone there?".into(),
            timeline_id: None,
            property_id: None,
        },
    )
    .await;

    // the departed socket only gets the personal-room notification
    match drain(&mut client_rx).as_slice() {
        [WsOutboundEvent::MessageNotification { content, .. }] => {
            assert_eq!(content, "anyone there?");
        }
        other => panic!("expected only the notification, got {other:?}"),
    }
}
