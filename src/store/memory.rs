//! In-memory store with the same semantics as the Postgres implementation,
//! including tuple-conflict detection. Backs the test suite and
//! `STORE=memory` local runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationScope, Message, Party};

use super::{ConversationStore, MessagePage};

#[derive(Default)]
struct MemoryInner {
    conversations: HashMap<Uuid, Conversation>,
    // conversation_id -> messages in append order
    messages: HashMap<Uuid, Vec<Message>>,
    // monotonic tiebreaker so created_at ordering survives fast appends
    seq: i64,
}

#[derive(Default)]
pub struct MemoryConversationStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The activity flag is owned by the platform's CRUD layer in
    /// production; this service only honors it. Exposed here so tests can
    /// exercise the inactive path.
    pub async fn set_active(&self, conversation_id: Uuid, is_active: bool) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;
        conv.is_active = is_active;
        Ok(())
    }

    fn matches(
        conv: &Conversation,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> bool {
        conv.agent_id == agent_id
            && conv.client_id == client_id
            && conv.timeline_id == timeline_id
            && conv.scope == scope
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Option<Conversation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .conversations
            .values()
            .find(|c| Self::matches(c, agent_id, client_id, timeline_id, scope))
            .cloned())
    }

    async fn create_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Conversation> {
        let mut inner = self.inner.lock().await;
        // mirror the unique index: duplicate tuple loses with Conflict
        if inner
            .conversations
            .values()
            .any(|c| Self::matches(c, agent_id, client_id, timeline_id, scope))
        {
            return Err(AppError::Conflict);
        }

        let now = Utc::now();
        let conv = Conversation {
            id: Uuid::new_v4(),
            agent_id,
            client_id,
            timeline_id,
            scope,
            is_active: true,
            last_message_at: None,
            agent_unread_count: 0,
            client_unread_count: 0,
            created_at: now,
            updated_at: now,
        };
        inner.conversations.insert(conv.id, conv.clone());
        inner.messages.insert(conv.id, Vec::new());
        Ok(conv)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let inner = self.inner.lock().await;
        Ok(inner.conversations.get(&conversation_id).cloned())
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: &str,
    ) -> AppResult<Message> {
        let mut inner = self.inner.lock().await;
        inner.seq += 1;
        let seq = inner.seq;

        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;

        let now = Utc::now() + Duration::microseconds(seq);
        conv.last_message_at = Some(now);
        conv.updated_at = now;
        match sender_type {
            Party::Agent => conv.client_unread_count += 1,
            Party::Client => conv.agent_unread_count += 1,
        }

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            sender_type,
            content: content.to_string(),
            is_read: false,
            read_at: None,
            created_at: now,
            updated_at: now,
        };
        inner
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader: Party,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        let mut changed = false;

        let conv = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound)?;
        let counter = match reader {
            Party::Agent => &mut conv.agent_unread_count,
            Party::Client => &mut conv.client_unread_count,
        };
        if *counter != 0 {
            *counter = 0;
            changed = true;
        }

        let authored_by = reader.other();
        if let Some(messages) = inner.messages.get_mut(&conversation_id) {
            for m in messages
                .iter_mut()
                .filter(|m| m.sender_type == authored_by && !m.is_read)
            {
                m.is_read = true;
                m.read_at = Some(now);
                m.updated_at = now;
                changed = true;
            }
        }
        if !changed {
            return Ok(None);
        }
        Ok(Some(now))
    }

    async fn list_messages(
        &self,
        conversation_id: Uuid,
        page: i64,
        page_size: i64,
    ) -> AppResult<MessagePage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let offset = ((page - 1) * page_size) as usize;

        let inner = self.inner.lock().await;
        let all = inner
            .messages
            .get(&conversation_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let total = all.len() as i64;
        let messages: Vec<Message> = all
            .iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();
        let has_more = offset as i64 + (messages.len() as i64) < total;

        Ok(MessagePage {
            messages,
            has_more,
            total,
        })
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        let inner = self.inner.lock().await;
        let all = inner
            .messages
            .get(&conversation_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        Ok(all
            .iter()
            .rev()
            .take(limit.clamp(1, 200) as usize)
            .cloned()
            .collect())
    }
}
