//! Sans-IO connection/auth lifecycle mirrored from the browser client.
//!
//! The one correctness property this type exists to guarantee: local message
//! state is keyed by `(conversation_id, scope)`, never by conversation id
//! alone, so two properties that share an agent/client pair can never merge
//! their message lists or unread badges.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use crate::models::{ConversationScope, MessageDto, Party};
use crate::websocket::events::{WsInboundEvent, WsOutboundEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Local storage key for one visible conversation thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub conversation_id: Uuid,
    pub scope: ConversationScope,
}

impl ConversationKey {
    pub fn new(conversation_id: Uuid, property_id: Option<Uuid>) -> Self {
        Self {
            conversation_id,
            scope: ConversationScope::from_property(property_id),
        }
    }
}

/// Side effects the transport must perform after feeding an event in.
#[derive(Debug, Clone)]
pub enum ClientAction {
    Send(WsInboundEvent),
}

#[derive(Default)]
pub struct ClientSession {
    state: ConnectionState,
    identity: Option<(Uuid, Party)>,
    // inbound events that arrived before the identity confirmation
    pending: VecDeque<WsOutboundEvent>,
    messages: HashMap<ConversationKey, Vec<MessageDto>>,
    unread: HashMap<ConversationKey, u32>,
    joined: HashSet<ConversationKey>,
    // rooms to restore once the next connection reaches Connected
    rejoin: HashSet<ConversationKey>,
    last_error: Option<String>,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

impl ClientSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn identity(&self) -> Option<(Uuid, Party)> {
        self.identity
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn messages(&self, key: &ConversationKey) -> &[MessageDto] {
        self.messages.get(key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn unread(&self, key: &ConversationKey) -> u32 {
        self.unread.get(key).copied().unwrap_or(0)
    }

    pub fn joined(&self) -> &HashSet<ConversationKey> {
        &self.joined
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn transport_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
    }

    /// Transport is up but the server has not confirmed an identity yet.
    pub fn transport_connected(&mut self) {
        self.state = ConnectionState::Authenticating;
        self.pending.clear();
    }

    /// Capture the joined rooms so the next connection can restore them.
    pub fn transport_lost(&mut self) {
        if !self.joined.is_empty() {
            self.rejoin = std::mem::take(&mut self.joined);
        }
        self.state = match self.state {
            ConnectionState::Connected => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        };
    }

    /// Feed one server event. While authenticating, everything except the
    /// identity confirmation is queued in arrival order; the confirmation
    /// drains the queue through the same path live events take, then flips
    /// the session to Connected and emits rejoin requests exactly once.
    pub fn handle_event(&mut self, event: WsOutboundEvent) -> Vec<ClientAction> {
        if self.state == ConnectionState::Authenticating {
            return match event {
                WsOutboundEvent::Authenticated { user_id, user_type } => {
                    self.identity = Some((user_id, user_type));

                    let mut actions = Vec::new();
                    while let Some(queued) = self.pending.pop_front() {
                        actions.extend(self.process(queued));
                    }

                    self.state = ConnectionState::Connected;

                    for key in std::mem::take(&mut self.rejoin) {
                        actions.push(ClientAction::Send(WsInboundEvent::JoinConversation {
                            conversation_id: key.conversation_id,
                            property_id: key.scope.property_id(),
                        }));
                    }
                    actions
                }
                other => {
                    self.pending.push_back(other);
                    Vec::new()
                }
            };
        }
        self.process(event)
    }

    fn process(&mut self, event: WsOutboundEvent) -> Vec<ClientAction> {
        match event {
            WsOutboundEvent::Authenticated { user_id, user_type } => {
                self.identity = Some((user_id, user_type));
            }
            WsOutboundEvent::ConversationJoined {
                conversation_id,
                messages,
                property_id,
            } => {
                let key = ConversationKey::new(conversation_id, property_id);
                self.joined.insert(key);
                self.messages.insert(key, messages);
                self.unread.insert(key, 0);
            }
            WsOutboundEvent::NewMessage {
                message,
                property_id,
            } => {
                let key = ConversationKey::new(message.conversation_id, property_id);
                self.messages.entry(key).or_default().push(message);
            }
            WsOutboundEvent::MessageNotification {
                conversation_id,
                property_id,
                ..
            } => {
                let key = ConversationKey::new(conversation_id, property_id);
                *self.unread.entry(key).or_insert(0) += 1;
            }
            WsOutboundEvent::MessagesRead {
                conversation_id,
                user_id,
                read_at,
                ..
            } => {
                // the counterpart read our messages
                if self.identity.map(|(id, _)| id) != Some(user_id) {
                    for (key, messages) in self.messages.iter_mut() {
                        if key.conversation_id != conversation_id {
                            continue;
                        }
                        for m in messages.iter_mut().filter(|m| !m.is_read) {
                            if Some(m.sender_id) == self.identity.map(|(id, _)| id) {
                                m.is_read = true;
                                m.read_at = Some(read_at.clone());
                            }
                        }
                    }
                }
            }
            WsOutboundEvent::Error { message } => {
                self.last_error = Some(message);
            }
            WsOutboundEvent::MessageSent { .. }
            | WsOutboundEvent::UserJoined { .. }
            | WsOutboundEvent::UserLeft { .. }
            | WsOutboundEvent::UserTyping { .. } => {}
        }
        Vec::new()
    }
}
