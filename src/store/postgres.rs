use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, ConversationScope, Message, Party};

use super::{ConversationStore, MessagePage};

pub struct PgConversationStore {
    db: Pool<Postgres>,
}

impl PgConversationStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

fn conversation_from_row(row: &sqlx::postgres::PgRow) -> AppResult<Conversation> {
    let property_id: Option<Uuid> = row.try_get("property_id")?;
    Ok(Conversation {
        id: row.try_get("id")?,
        agent_id: row.try_get("agent_id")?,
        client_id: row.try_get("client_id")?,
        timeline_id: row.try_get("timeline_id")?,
        scope: ConversationScope::from_property(property_id),
        is_active: row.try_get("is_active")?,
        last_message_at: row.try_get("last_message_at")?,
        agent_unread_count: row.try_get("agent_unread_count")?,
        client_unread_count: row.try_get("client_unread_count")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn message_from_row(row: &sqlx::postgres::PgRow) -> AppResult<Message> {
    let sender_type: String = row.try_get("sender_type")?;
    let sender_type = Party::parse(&sender_type).ok_or(AppError::Internal)?;
    Ok(Message {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        sender_id: row.try_get("sender_id")?,
        sender_type,
        content: row.try_get("content")?,
        is_read: row.try_get("is_read")?,
        read_at: row.try_get("read_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

const CONVERSATION_COLUMNS: &str = "id, agent_id, client_id, timeline_id, property_id, is_active, \
     last_message_at, agent_unread_count, client_unread_count, created_at, updated_at";

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Option<Conversation>> {
        // IS NOT DISTINCT FROM gives NULL-aware equality on the property column
        let sql = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE agent_id = $1 AND client_id = $2 AND timeline_id = $3 \
               AND property_id IS NOT DISTINCT FROM $4"
        );
        let row = sqlx::query(&sql)
            .bind(agent_id)
            .bind(client_id)
            .bind(timeline_id)
            .bind(scope.property_id())
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn create_conversation(
        &self,
        agent_id: Uuid,
        client_id: Uuid,
        timeline_id: Uuid,
        scope: ConversationScope,
    ) -> AppResult<Conversation> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO conversations \
             (id, agent_id, client_id, timeline_id, property_id, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             RETURNING {CONVERSATION_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(agent_id)
            .bind(client_id)
            .bind(timeline_id)
            .bind(scope.property_id())
            .bind(now)
            .fetch_one(&self.db)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::Conflict
                } else {
                    AppError::Database(e)
                }
            })?;
        conversation_from_row(&row)
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> AppResult<Option<Conversation>> {
        let sql = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(conversation_id)
            .fetch_optional(&self.db)
            .await?;
        row.as_ref().map(conversation_from_row).transpose()
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_type: Party,
        content: &str,
    ) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, sender_type, content, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6)",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(sender_type.as_str())
        .bind(content)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // Counter moves only for the non-sending party; the relational
        // increment keeps concurrent sends serialized without app locks.
        sqlx::query(
            "UPDATE conversations SET \
                last_message_at = $2, \
                updated_at = $2, \
                agent_unread_count = agent_unread_count + CASE WHEN $3 = 'client' THEN 1 ELSE 0 END, \
                client_unread_count = client_unread_count + CASE WHEN $3 = 'agent' THEN 1 ELSE 0 END \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(now)
        .bind(sender_type.as_str())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Message {
            id,
            conversation_id,
            sender_id,
            sender_type,
            content: content.to_string(),
            is_read: false,
            read_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader: Party,
    ) -> AppResult<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let messages_marked = sqlx::query(
            "UPDATE messages SET is_read = TRUE, read_at = $2, updated_at = $2 \
             WHERE conversation_id = $1 AND sender_type = $3 AND is_read = FALSE",
        )
        .bind(conversation_id)
        .bind(now)
        .bind(reader.other().as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let counter_column = match reader {
            Party::Agent => "agent_unread_count",
            Party::Client => "client_unread_count",
        };
        // guarded so a repeat mark-read leaves updated_at untouched
        let sql = format!(
            "UPDATE conversations SET {counter_column} = 0, updated_at = $2 \
             WHERE id = $1 AND {counter_column} <> 0"
        );
        let counters_zeroed = sqlx::query(&sql)
            .bind(conversation_id)
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        if messages_marked == 0 && counters_zeroed == 0 {
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
        let offset = (page - 1) * page_size;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM messages WHERE conversation_id = $1")
                .bind(conversation_id)
                .fetch_one(&self.db)
                .await?;

        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, sender_type, content, is_read, read_at, created_at, updated_at \
             FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at ASC, id ASC \
             LIMIT $2 OFFSET $3",
        )
        .bind(conversation_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.db)
        .await?;

        let messages: Vec<Message> = rows
            .iter()
            .map(message_from_row)
            .collect::<AppResult<_>>()?;
        let has_more = offset + (messages.len() as i64) < total;

        Ok(MessagePage {
            messages,
            has_more,
            total,
        })
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, sender_type, content, is_read, read_at, created_at, updated_at \
             FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(message_from_row).collect()
    }
}
