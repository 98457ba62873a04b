use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::Party;
use crate::services::SessionValidator;

use super::JwtVerifier;

/// Ties a client socket to the one timeline its share link opened.
#[derive(Debug, Clone)]
pub struct TimelineBinding {
    pub timeline_id: Uuid,
    pub share_token: String,
}

/// Durable identity attached to a socket once the handshake succeeds.
/// Never persisted; dropped with the connection.
#[derive(Debug, Clone)]
pub struct ConnectionIdentity {
    pub user_id: Uuid,
    pub user_type: Party,
    pub timeline: Option<TimelineBinding>,
}

impl ConnectionIdentity {
    pub fn agent(user_id: Uuid) -> Self {
        Self {
            user_id,
            user_type: Party::Agent,
            timeline: None,
        }
    }

    pub fn client(user_id: Uuid, binding: TimelineBinding) -> Self {
        Self {
            user_id,
            user_type: Party::Client,
            timeline: Some(binding),
        }
    }

    /// Timeline the socket is bound to, for client auto-create resolution.
    pub fn bound_timeline(&self) -> Option<Uuid> {
        self.timeline.as_ref().map(|b| b.timeline_id)
    }
}

/// Credentials carried by the `authenticate` handshake event.
#[derive(Debug, Default)]
pub struct AuthPayload {
    pub token: Option<String>,
    pub session_token: Option<String>,
    pub share_token: Option<String>,
}

/// Validates an inbound socket as an agent (bearer token) or a client
/// (session token + share token). Any failure is terminal for the socket.
pub struct ConnectionAuthenticator {
    jwt: JwtVerifier,
    sessions: Arc<dyn SessionValidator>,
}

impl ConnectionAuthenticator {
    pub fn new(jwt: JwtVerifier, sessions: Arc<dyn SessionValidator>) -> Self {
        Self { jwt, sessions }
    }

    pub async fn authenticate(&self, payload: AuthPayload) -> AppResult<ConnectionIdentity> {
        if let Some(token) = payload.token.as_deref() {
            let claims = self.jwt.verify(token)?;
            let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthorized)?;
            return Ok(ConnectionIdentity::agent(user_id));
        }

        if let (Some(session_token), Some(share_token)) =
            (payload.session_token.as_deref(), payload.share_token.as_deref())
        {
            let timeline = self
                .sessions
                .validate(session_token, share_token)
                .await?
                .ok_or(AppError::Unauthorized)?;
            return Ok(ConnectionIdentity::client(
                timeline.client_id,
                TimelineBinding {
                    timeline_id: timeline.timeline_id,
                    share_token: share_token.to_string(),
                },
            ));
        }

        Err(AppError::Unauthorized)
    }
}
