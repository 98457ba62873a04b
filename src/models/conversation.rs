use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a conversation a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Party {
    Agent,
    Client,
}

impl Party {
    pub fn other(self) -> Party {
        match self {
            Party::Agent => Party::Client,
            Party::Client => Party::Agent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Party::Agent => "agent",
            Party::Client => "client",
        }
    }

    pub fn parse(value: &str) -> Option<Party> {
        match value {
            "agent" => Some(Party::Agent),
            "client" => Some(Party::Client),
            _ => None,
        }
    }
}

/// General timeline chat vs. chat scoped to a single property.
///
/// Storage uses a nullable column; everything above the store speaks this
/// variant so an empty-string property id can never masquerade as "general".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversationScope {
    General,
    ForProperty(Uuid),
}

impl ConversationScope {
    pub fn from_property(property_id: Option<Uuid>) -> Self {
        match property_id {
            Some(id) => ConversationScope::ForProperty(id),
            None => ConversationScope::General,
        }
    }

    pub fn property_id(&self) -> Option<Uuid> {
        match self {
            ConversationScope::General => None,
            ConversationScope::ForProperty(id) => Some(*id),
        }
    }

    pub fn is_general(&self) -> bool {
        matches!(self, ConversationScope::General)
    }
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub client_id: Uuid,
    pub timeline_id: Uuid,
    pub scope: ConversationScope,
    pub is_active: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub agent_unread_count: i32,
    pub client_unread_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn participant_id(&self, party: Party) -> Uuid {
        match party {
            Party::Agent => self.agent_id,
            Party::Client => self.client_id,
        }
    }

    /// The user on the opposite side of `sender` - the one whose unread
    /// counter grows and whose personal room receives the notification.
    pub fn counterpart(&self, sender: Party) -> Uuid {
        self.participant_id(sender.other())
    }

    pub fn unread_count(&self, party: Party) -> i32 {
        match party {
            Party::Agent => self.agent_unread_count,
            Party::Client => self.client_unread_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_nullable_column() {
        let id = Uuid::new_v4();
        assert_eq!(
            ConversationScope::from_property(Some(id)).property_id(),
            Some(id)
        );
        assert_eq!(ConversationScope::from_property(None).property_id(), None);
        assert!(ConversationScope::General.is_general());
        assert!(!ConversationScope::ForProperty(id).is_general());
    }

    #[test]
    fn party_other_is_symmetric() {
        assert_eq!(Party::Agent.other(), Party::Client);
        assert_eq!(Party::Client.other(), Party::Agent);
        assert_eq!(Party::parse("agent"), Some(Party::Agent));
        assert_eq!(Party::parse("broker"), None);
    }
}
