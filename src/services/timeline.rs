//! Narrow interfaces onto the platform that owns timelines and client
//! sessions. The realtime layer only ever sees these two lookups; it never
//! reaches into the collaborator's storage.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Resolution of a valid (session token, share token) pair.
#[derive(Debug, Clone)]
pub struct TimelineRef {
    pub timeline_id: Uuid,
    pub client_id: Uuid,
}

/// The two sides of a timeline, used to resolve auto-created conversations.
#[derive(Debug, Clone)]
pub struct TimelineParties {
    pub agent_id: Uuid,
    pub client_id: Uuid,
}

#[async_trait]
pub trait SessionValidator: Send + Sync {
    /// Returns the timeline binding for an active client session whose
    /// timeline's share token matches, or `None` on any mismatch.
    async fn validate(
        &self,
        session_token: &str,
        share_token: &str,
    ) -> AppResult<Option<TimelineRef>>;
}

#[async_trait]
pub trait TimelineDirectory: Send + Sync {
    async fn timeline_parties(&self, timeline_id: Uuid) -> AppResult<Option<TimelineParties>>;
}

/// HTTP client against the platform's internal REST surface.
pub struct TimelineClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct TimelinePartiesBody {
    agent_id: Uuid,
    client_id: Uuid,
}

#[derive(Debug, Deserialize)]
struct SessionBody {
    timeline_id: Uuid,
    client_id: Uuid,
}

impl TimelineClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl TimelineDirectory for TimelineClient {
    async fn timeline_parties(&self, timeline_id: Uuid) -> AppResult<Option<TimelineParties>> {
        let url = format!("{}/internal/timelines/{}", self.base_url, timeline_id);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("timeline lookup: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "timeline lookup: status {}",
                resp.status()
            )));
        }
        let body: TimelinePartiesBody = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("timeline lookup body: {e}")))?;
        Ok(Some(TimelineParties {
            agent_id: body.agent_id,
            client_id: body.client_id,
        }))
    }
}

#[async_trait]
impl SessionValidator for TimelineClient {
    async fn validate(
        &self,
        session_token: &str,
        share_token: &str,
    ) -> AppResult<Option<TimelineRef>> {
        let url = format!("{}/internal/client-sessions/validate", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "session_token": session_token,
                "share_token": share_token,
            }))
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("session validation: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND
            || resp.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(AppError::Upstream(format!(
                "session validation: status {}",
                resp.status()
            )));
        }
        let body: SessionBody = resp
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("session validation body: {e}")))?;
        Ok(Some(TimelineRef {
            timeline_id: body.timeline_id,
            client_id: body.client_id,
        }))
    }
}

#[derive(Debug, Clone)]
struct MemoryTimeline {
    agent_id: Uuid,
    client_id: Uuid,
    share_token: String,
}

/// Fixture-backed directory for tests and memory-store runs.
#[derive(Default)]
pub struct MemoryDirectory {
    timelines: RwLock<HashMap<Uuid, MemoryTimeline>>,
    // session token -> timeline id
    sessions: RwLock<HashMap<String, Uuid>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_timeline(
        &self,
        timeline_id: Uuid,
        agent_id: Uuid,
        client_id: Uuid,
        share_token: &str,
    ) {
        self.timelines.write().await.insert(
            timeline_id,
            MemoryTimeline {
                agent_id,
                client_id,
                share_token: share_token.to_string(),
            },
        );
    }

    pub async fn insert_session(&self, session_token: &str, timeline_id: Uuid) {
        self.sessions
            .write()
            .await
            .insert(session_token.to_string(), timeline_id);
    }
}

#[async_trait]
impl TimelineDirectory for MemoryDirectory {
    async fn timeline_parties(&self, timeline_id: Uuid) -> AppResult<Option<TimelineParties>> {
        Ok(self
            .timelines
            .read()
            .await
            .get(&timeline_id)
            .map(|t| TimelineParties {
                agent_id: t.agent_id,
                client_id: t.client_id,
            }))
    }
}

#[async_trait]
impl SessionValidator for MemoryDirectory {
    async fn validate(
        &self,
        session_token: &str,
        share_token: &str,
    ) -> AppResult<Option<TimelineRef>> {
        let timeline_id = match self.sessions.read().await.get(session_token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        let timelines = self.timelines.read().await;
        Ok(timelines.get(&timeline_id).and_then(|t| {
            if t.share_token == share_token {
                Some(TimelineRef {
                    timeline_id,
                    client_id: t.client_id,
                })
            } else {
                None
            }
        }))
    }
}
