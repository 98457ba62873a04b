//! Socket protocol schema. All payloads are JSON with a `type` tag.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessageDto, Party};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInboundEvent {
    /// Handshake credentials: either an agent bearer token or a client
    /// session token + share token pair. Must be the first event.
    #[serde(rename = "authenticate")]
    Authenticate {
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        session_token: Option<String>,
        #[serde(default)]
        share_token: Option<String>,
    },

    #[serde(rename = "join-conversation")]
    JoinConversation {
        conversation_id: Uuid,
        #[serde(default)]
        property_id: Option<Uuid>,
    },

    #[serde(rename = "leave-conversation")]
    LeaveConversation { conversation_id: Uuid },

    /// With a conversation id: plain send, falling back to auto-create when
    /// the conversation is missing and timeline context is available.
    /// Without one: always auto-create.
    #[serde(rename = "send-message")]
    SendMessage {
        #[serde(default)]
        conversation_id: Option<Uuid>,
        content: String,
        #[serde(default)]
        timeline_id: Option<Uuid>,
        #[serde(default)]
        property_id: Option<Uuid>,
    },

    #[serde(rename = "typing-start")]
    TypingStart { conversation_id: Uuid },

    #[serde(rename = "typing-stop")]
    TypingStop { conversation_id: Uuid },

    #[serde(rename = "mark-messages-read")]
    MarkMessagesRead { conversation_id: Uuid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutboundEvent {
    /// Identity confirmation; the client resolves its auth promise and
    /// drains its queue when this arrives.
    #[serde(rename = "authenticated")]
    Authenticated { user_id: Uuid, user_type: Party },

    #[serde(rename = "conversation_joined")]
    ConversationJoined {
        conversation_id: Uuid,
        messages: Vec<MessageDto>,
        property_id: Option<Uuid>,
    },

    #[serde(rename = "new-message")]
    NewMessage {
        message: MessageDto,
        property_id: Option<Uuid>,
    },

    /// Out-of-band delivery to the counterpart's personal room. Carries the
    /// property identity so per-property badges never bleed across scopes.
    #[serde(rename = "message-notification")]
    MessageNotification {
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: String,
        timestamp: String,
        property_id: Option<Uuid>,
    },

    #[serde(rename = "message-sent")]
    MessageSent { id: Uuid, conversation_id: Uuid },

    #[serde(rename = "user-joined")]
    UserJoined {
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
    },

    #[serde(rename = "user-left")]
    UserLeft {
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
    },

    #[serde(rename = "user-typing")]
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
        is_typing: bool,
    },

    #[serde(rename = "messages-read")]
    MessagesRead {
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
        read_at: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}
