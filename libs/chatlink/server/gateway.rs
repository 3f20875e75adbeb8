//! WebSocket session endpoint.
//!
//! Each accepted socket gets a uuid connection id, a registry entry,
//! and a dedicated write task fed by the registry's sink channel. The
//! read side consumes heartbeat envelopes itself and hands everything
//! else to the installed [`InboundHandler`].

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::classify::{classify_close, classify_error, ErrorKind};
use crate::core::envelope::Envelope;
use crate::server::http::AppState;
use crate::server::monitor::MonitorEvent;
use crate::server::sink::{ChannelSink, SinkFrame};

/// Application hook for non-reserved inbound envelopes. The gateway
/// does no business routing itself.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, connection_id: &str, envelope: Envelope, state: &AppState);
}

/// Default handler: reflect the envelope back to its sender.
pub struct EchoHandler;

#[async_trait]
impl InboundHandler for EchoHandler {
    async fn handle(&self, connection_id: &str, envelope: Envelope, state: &AppState) {
        state.registry.send_to(connection_id, &envelope);
    }
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Logical owner of the connection; enables `send_to_user` fan-out.
    pub user: Option<String>,
}

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, params.user, state))
}

async fn handle_socket(socket: WebSocket, user: Option<String>, state: AppState) {
    let id = Uuid::new_v4().to_string();
    let (sink, mut frames) = ChannelSink::new();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Writer: drains the sink channel so registry sends never block on
    // the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            match frame {
                SinkFrame::Text(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                SinkFrame::Close { code, reason } => {
                    let _ = ws_tx
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    if state
        .registry
        .add_connection(&id, user.clone(), Box::new(sink))
        .is_err()
    {
        // Refusal queued a close frame; let the writer flush it.
        let _ = writer.await;
        return;
    }
    info!(connection = %id, user = ?user, "websocket session open");

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(raw)) => {
                state.registry.touch_activity(&id);
                state.monitor.record(MonitorEvent::MessageReceived);
                match Envelope::from_json(&raw) {
                    Ok(envelope) if envelope.is_ping() => {
                        state.registry.send_to(&id, &Envelope::pong());
                    }
                    Ok(envelope) if envelope.is_pong() => {
                        state.registry.record_pong(&id);
                    }
                    Ok(envelope) => {
                        state.handler.handle(&id, envelope, &state).await;
                    }
                    Err(error) => {
                        warn!(connection = %id, %error, "malformed envelope");
                        state.errors.record(ErrorKind::Protocol);
                        state.monitor.record(MonitorEvent::Error {
                            kind: ErrorKind::Protocol,
                            message: error.to_string(),
                        });
                    }
                }
            }
            Ok(Message::Pong(_)) => {
                state.registry.record_pong(&id);
            }
            Ok(Message::Ping(_)) => {
                // Answered by the protocol layer; counts as liveness.
                state.registry.touch_activity(&id);
            }
            Ok(Message::Close(frame)) => {
                if let Some(frame) = frame {
                    debug!(connection = %id, code = frame.code, "peer close");
                    let info = classify_close(frame.code, &frame.reason);
                    if info.is_abnormal {
                        state.errors.record(info.kind);
                        state.monitor.record(MonitorEvent::Error {
                            kind: info.kind,
                            message: format!("abnormal close {} {}", info.code, info.name),
                        });
                    }
                }
                break;
            }
            Ok(_) => {}
            Err(error) => {
                let classification = classify_error(&error.to_string());
                warn!(connection = %id, kind = classification.kind.as_str(), %error, "socket error");
                state.errors.record(classification.kind);
                state.monitor.record(MonitorEvent::Error {
                    kind: classification.kind,
                    message: classification.message,
                });
                break;
            }
        }
    }

    state.registry.remove_connection(&id);
    writer.abort();
    info!(connection = %id, "websocket session closed");
}
