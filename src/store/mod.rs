use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversation, ConversationScope, Message, Party};

pub mod memory;
pub mod postgres;

pub use memory::MemoryConversationStore;
pub use postgres::PgConversationStore;

/// One page of a conversation's history, oldest first.
#[derive(Debug)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub total: i64,
}

/// Persistence contract for conversations and messages.
///
/// The store owns the two hard invariants: tuple uniqueness (NULL-aware on
/// the property column) and unread counters that only move for the
/// non-sending party.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Exact tuple match. `ConversationScope::General` matches only rows with
    /// no property, never "any property".
    async fn find_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Option<Conversation>>;

    /// Fails with `AppError::Conflict` when a concurrent insert won the
    /// tuple; the caller retries the find.
    async fn create_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Conversation>;

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>>;

    /// Inserts the message and atomically bumps `last_message_at` plus the
    /// counterpart's unread counter.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: &str,
    ) -> AppResult<Message>;

    /// Marks the other party's unread messages read and zeroes the reader's
    /// counter. Returns the timestamp recorded as `read_at`, or `None` when
    /// nothing was unread so repeat calls change no rows.
    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader: Party,
    ) -> AppResult<Option<DateTime<Utc>>>;

    /// Ascending chronological order, 1-based page.
    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> AppResult<MessagePage>;

    /// Most recent messages, newest first, for initial render preload.
    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>>;
}
