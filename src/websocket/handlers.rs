use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::auth::{AuthPayload, ConnectionIdentity};
use crate::state::AppState;

use super::dispatch;
use super::events::{WsInboundEvent, WsOutboundEvent};
use super::Room;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// First event on a fresh socket must be `authenticate`, within the
/// configured deadline. Anything else is rejected, not deferred.
async fn await_authentication(
    state: &AppState,
    receiver: &mut SplitStream<WebSocket>,
) -> Option<ConnectionIdentity> {
    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(txt) => {
                    return match serde_json::from_str::<WsInboundEvent>(&txt) {
                        Ok(WsInboundEvent::Authenticate {
                            token,
                            session_token,
                            share_token,
                        }) => {
                            let payload = AuthPayload {
                                token,
                                session_token,
                                share_token,
                            };
                            match state.authenticator.authenticate(payload).await {
                                Ok(identity) => Some(identity),
                                Err(e) => {
                                    warn!(error = %e, "socket authentication rejected");
                                    None
                                }
                            }
                        }
                        _ => {
                            warn!("socket sent a non-authenticate event before handshake");
                            None
                        }
                    };
                }
                Message::Close(_) => return None,
                // pings are answered by the framework
                _ => continue,
            }
        }
        None
    };

    match tokio::time::timeout(state.config.auth_timeout, handshake).await {
        Ok(identity) => identity,
        Err(_) => {
            warn!("socket authentication timed out");
            None
        }
    }
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();

    let identity = match await_authentication(&state, &mut receiver).await {
        Some(identity) => identity,
        None => {
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let (socket_id, mut rx) = state.registry.register().await;
    // personal room for out-of-band notifications, independent of any
    // conversation room
    state
        .registry
        .join(socket_id, Room::User(identity.user_id))
        .await;
    state
        .registry
        .send(
            socket_id,
            WsOutboundEvent::Authenticated {
                user_id: identity.user_id,
                user_type: identity.user_type,
            },
        )
        .await;

    debug!(
        %socket_id,
        user_id = %identity.user_id,
        user_type = identity.user_type.as_str(),
        "socket authenticated"
    );

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(event) => {
                        match serde_json::to_string(&event) {
                            Ok(payload) => {
                                if sender.send(Message::Text(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(%socket_id, error = %e, "failed to serialize outbound event");
                            }
                        }
                    }
                    None => break,
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(txt))) => {
                        match serde_json::from_str::<WsInboundEvent>(&txt) {
                            Ok(event) => {
                                dispatch::handle_event(&state, socket_id, &identity, event).await;
                            }
                            Err(_) => {
                                state.registry.send(socket_id, WsOutboundEvent::Error {
                                    message: "unrecognized event".into(),
                                }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    state.registry.unregister(socket_id).await;
    debug!(%socket_id, user_id = %identity.user_id, "socket disconnected");
}
