//! Socket client used by integration tooling and as the reference
//! implementation of the connection lifecycle in `session`.

pub mod session;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::websocket::events::{WsInboundEvent, WsOutboundEvent};

pub use session::{ClientAction, ClientSession, ConnectionState, ConversationKey};

#[derive(Debug, Clone)]
pub enum Credentials {
    Agent {
        token: String,
    },
    Client {
        session_token: String,
        share_token: String,
    },
}

impl Credentials {
    fn to_event(&self) -> WsInboundEvent {
        match self {
            Credentials::Agent { token } => WsInboundEvent::Authenticate {
                token: Some(token.clone()),
                session_token: None,
                share_token: None,
            },
            Credentials::Client {
                session_token,
                share_token,
            } => WsInboundEvent::Authenticate {
                token: None,
                session_token: Some(session_token.clone()),
                share_token: Some(share_token.clone()),
            },
        }
    }
}

pub struct ChatClient {
    session: Arc<Mutex<ClientSession>>,
    outbound: mpsc::UnboundedSender<WsInboundEvent>,
}

impl ChatClient {
    /// Connects with a fresh session, sends the handshake, and waits until
    /// the session reaches `Connected` or the deadline passes.
    pub async fn connect(
        url: &str,
        credentials: Credentials,
        auth_timeout: Duration,
    ) -> AppResult<Self> {
        Self::establish(
            url,
            credentials,
            auth_timeout,
            Arc::new(Mutex::new(ClientSession::new())),
        )
        .await
    }

    /// Reconnects over a fresh transport while keeping the session from the
    /// dropped connection, so the rooms it captured on transport loss are
    /// rejoined once the new connection authenticates.
    pub async fn resume(
        url: &str,
        credentials: Credentials,
        auth_timeout: Duration,
        session: Arc<Mutex<ClientSession>>,
    ) -> AppResult<Self> {
        Self::establish(url, credentials, auth_timeout, session).await
    }

    async fn establish(
        url: &str,
        credentials: Credentials,
        auth_timeout: Duration,
        session: Arc<Mutex<ClientSession>>,
    ) -> AppResult<Self> {
        session.lock().await.transport_connecting();

        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| AppError::Upstream(format!("connect: {e}")))?;
        session.lock().await.transport_connected();

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsInboundEvent>();
        let (state_tx, state_rx) = watch::channel(false);

        // writer: one serialization point for everything leaving the client
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let payload = match serde_json::to_string(&event) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                if sink.send(WsMessage::Text(payload)).await.is_err() {
                    break;
                }
            }
        });

        // reader: feed the state machine, apply its requested effects
        {
            let session = Arc::clone(&session);
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                while let Some(frame) = stream.next().await {
                    let msg = match frame {
                        Ok(m) => m,
                        Err(_) => break,
                    };
                    match msg {
                        WsMessage::Text(txt) => {
                            let event = match serde_json::from_str::<WsOutboundEvent>(&txt) {
                                Ok(e) => e,
                                Err(_) => continue,
                            };
                            let (actions, connected) = {
                                let mut guard = session.lock().await;
                                let actions = guard.handle_event(event);
                                (actions, guard.is_authenticated())
                            };
                            for ClientAction::Send(e) in actions {
                                let _ = out_tx.send(e);
                            }
                            if connected {
                                let _ = state_tx.send(true);
                            }
                        }
                        WsMessage::Close(_) => break,
                        _ => {}
                    }
                }
                session.lock().await.transport_lost();
                let _ = state_tx.send(false);
            });
        }

        let _ = out_tx.send(credentials.to_event());

        let wait_connected = async {
            let mut rx = state_rx.clone();
            while !*rx.borrow() {
                rx.changed()
                    .await
                    .map_err(|_| AppError::Upstream("connection closed during handshake".into()))?;
            }
            Ok::<(), AppError>(())
        };
        tokio::time::timeout(auth_timeout, wait_connected)
            .await
            .map_err(|_| AppError::Unauthorized)??;

        Ok(Self {
            session,
            outbound: out_tx,
        })
    }

    pub fn session(&self) -> Arc<Mutex<ClientSession>> {
        Arc::clone(&self.session)
    }

    fn send(&self, event: WsInboundEvent) -> AppResult<()> {
        self.outbound
            .send(event)
            .map_err(|_| AppError::Upstream("connection closed".into()))
    }

    pub fn join_conversation(
        &self,
        conversation_id: Uuid,
        property_id: Option<Uuid>,
    ) -> AppResult<()> {
        self.send(WsInboundEvent::JoinConversation {
            conversation_id,
            property_id,
        })
    }

    pub fn leave_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        self.send(WsInboundEvent::LeaveConversation { conversation_id })
    }

    pub fn send_message(
        &self,
        conversation_id: Option<Uuid>,
        content: &str,
        timeline_id: Option<Uuid>,
        property_id: Option<Uuid>,
    ) -> AppResult<()> {
        self.send(WsInboundEvent::SendMessage {
            conversation_id,
            content: content.to_string(),
            timeline_id,
            property_id,
        })
    }

    pub fn set_typing(&self, conversation_id: Uuid, typing: bool) -> AppResult<()> {
        self.send(if typing {
            WsInboundEvent::TypingStart { conversation_id }
        } else {
            WsInboundEvent::TypingStop { conversation_id }
        })
    }

    pub fn mark_messages_read(&self, conversation_id: Uuid) -> AppResult<()> {
        self.send(WsInboundEvent::MarkMessagesRead { conversation_id })
    }
}
