use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationScope, Message, Party};
use crate::store::{ConversationStore, MessagePage};

/// A conversation with its most recent messages preloaded (newest first),
/// as returned by create-or-get for initial render.
#[derive(Debug)]
pub struct ConversationWithMessages {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

pub struct MessagingService {
    store: Arc<dyn ConversationStore>,
    preload_limit: i64,
    max_message_length: Option<usize>,
}

impl MessagingService {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        preload_limit: i64,
        max_message_length: Option<usize>,
    ) -> Self {
        Self {
            store,
            preload_limit,
            max_message_length,
        }
    }

    /// The symmetric participant check. Repeated on every operation, never
    /// cached across calls.
    fn authorize(conversation: &Conversation, user_id: Uuid, user_type: Party) -> AppResult<()> {
        if conversation.participant_id(user_type) != user_id {
            return Err(AppError::Forbidden);
        }
        Ok(())
    }

    /// Idempotent upsert-by-tuple. A concurrent creator losing the unique
    /// index is resolved by retrying the find, never surfaced to the caller.
    pub async fn create_or_get_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<ConversationWithMessages> {
        if let Some(conversation) = self
            .store
            .find_conversation(agent_id, client_id, timeline_id, scope)
            .await?
        {
            let messages = self
                .store
                .recent_messages(conversation.id, self.preload_limit)
                .await?;
            return Ok(ConversationWithMessages {
                conversation,
                messages,
            });
        }

        match self
            .store
            .create_conversation(agent_id, client_id, timeline_id, scope)
            .await
        {
            Ok(conversation) => Ok(ConversationWithMessages {
                conversation,
                messages: Vec::new(),
            }),
            Err(AppError::Conflict) => {
                tracing::debug!(
                    %agent_id, %client_id, %timeline_id,
                    "lost conversation create race, re-fetching"
                );
                let conversation = self
                    .store
                    .find_conversation(agent_id, client_id, timeline_id, scope)
                    .await?
                    .ok_or(AppError::Internal)?;
                let messages = self
                    .store
                    .recent_messages(conversation.id, self.preload_limit)
                    .await?;
                Ok(ConversationWithMessages {
                    conversation,
                    messages,
                })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
    ) -> AppResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound)?;
        Self::authorize(&conversation, user_id, user_type)?;
        Ok(conversation)
    }

    /// Returns the message together with the conversation so the caller can
    /// route the counterpart notification without a second lookup.
    pub async fn send_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: &str,
    ) -> AppResult<(Message, Conversation)> {
        let content = self.validate_content(content)?;
        let conversation = self
            .get_conversation(conversation_id, sender_id, sender_type)
            .await?;
        if !conversation.is_active {
            return Err(AppError::Validation(
                "conversation is no longer active".into(),
            ));
        }
        let message = self
            .store
            .append_message(conversation_id, sender_id, sender_type, content)
            .await?;
        Ok((message, conversation))
    }

    /// Create-or-get composed with send, for callers that do not yet know
    /// the conversation id (first message to a property).
    #[allow(clippy::too_many_arguments)]
    pub async fn send_message_with_auto_create(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: &str,
        scope: ConversationScope,
    ) -> AppResult<(Message, Conversation)> {
        let existing = self
            .create_or_get_conversation(agent_id, client_id, timeline_id, scope)
            .await?;
        self.send_message(existing.conversation.id, sender_id, sender_type, content)
            .await
    }

    /// `None` means the reader had nothing unread and no rows moved.
    pub async fn mark_messages_as_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
    ) -> AppResult<Option<DateTime<Utc>>> {
        self.get_conversation(conversation_id, user_id, user_type)
            .await?;
        self.store.mark_read(conversation_id, user_type).await
    }

    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        user_type: Party,
        page: i64,
        page_size: i64,
    ) -> AppResult<MessagePage> {
        self.get_conversation(conversation_id, user_id, user_type)
            .await?;
        self.store
            .list_messages(conversation_id, page, page_size)
            .await
    }

    fn validate_content<'a>(&self, content: &'a str) -> AppResult<&'a str> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(AppError::Validation("message content cannot be empty".into()));
        }
        if let Some(max) = self.max_message_length {
            if trimmed.len() > max {
                return Err(AppError::Validation(format!(
                    "message content exceeds {max} characters"
                )));
            }
        }
        Ok(trimmed)
    }
}
