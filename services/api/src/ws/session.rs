//! Manages the WebSocket connection lifecycle for a live revision session.
//!
//! Each channel is bound to exactly one session by its first frame. Every
//! inbound text frame is processed as one "continue" turn; when a turn
//! completes the session, a terminal summary frame is sent and the channel
//! closes. A dropped connection abandons the in-flight turn without
//! touching durable state, since the controller only persists after the
//! reply is fully computed.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use edubot_core::flow::SessionSnapshot;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{Instrument, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Performs the initial handshake binding the channel to a session, then
/// runs the turn loop until the session completes or the client disconnects.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    info!("New WebSocket connection. Awaiting init...");
    let (mut socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be an `init` frame.
    let snapshot = match initialize_session(&mut socket_rx, &state).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => {
            info!("Client disconnected before sending init message.");
            return;
        }
        Err(err) => {
            error!("Session initialization failed: {:?}", err);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: err.to_string(),
                },
            )
            .await;
            return;
        }
    };

    tracing::Span::current().record("session_id", snapshot.session_id.as_str());
    if send_msg(
        &mut socket_tx,
        ServerMessage::Initialized {
            session_id: snapshot.session_id.clone(),
            topic: snapshot.topic.clone(),
            stage: snapshot.stage.as_str().to_string(),
            interaction_count: snapshot.interaction_count,
            is_complete: snapshot.is_complete,
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Initialized message to client.");
        return;
    }

    let session_span = tracing::info_span!(
        "revision_session",
        session_id = %snapshot.session_id,
        topic = %snapshot.topic
    );
    tokio::spawn(
        async move {
            if let Err(e) = run_session(state, socket_tx, socket_rx, snapshot).await {
                error!(error = ?e, "Revision session terminated with error.");
            }
            info!("Revision session finished.");
        }
        .instrument(session_span),
    );
}

/// Reads the `init` frame and resolves the session it names.
async fn initialize_session(
    socket_rx: &mut SplitStream<WebSocket>,
    state: &Arc<AppState>,
) -> Result<Option<SessionSnapshot>> {
    let Some(Ok(ws_msg)) = socket_rx.next().await else {
        return Ok(None);
    };
    let Message::Text(text) = ws_msg else {
        anyhow::bail!("First message was not a text `init` message.");
    };
    let init_msg: ClientMessage = serde_json::from_str(&text)?;
    let ClientMessage::Init { session_id } = init_msg else {
        anyhow::bail!("First message must be `init`");
    };

    let snapshot = state.controller.session_snapshot(&session_id).await?;
    Ok(Some(snapshot))
}

/// The turn loop for an active WebSocket session.
async fn run_session(
    state: Arc<AppState>,
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut socket_rx: SplitStream<WebSocket>,
    snapshot: SessionSnapshot,
) -> Result<()> {
    let session_id = snapshot.session_id;

    while let Some(msg_result) = socket_rx.next().await {
        let ws_msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };
        match ws_msg {
            Message::Text(text) => {
                let msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(error = %e, "Ignoring unparseable client frame.");
                        continue;
                    }
                };
                match msg {
                    ClientMessage::UserMessage { text } => {
                        let output = match state
                            .controller
                            .process_turn(&session_id, text.as_deref())
                            .await
                        {
                            Ok(output) => output,
                            Err(err) => {
                                send_msg(
                                    &mut socket_tx,
                                    ServerMessage::Error {
                                        message: err.to_string(),
                                    },
                                )
                                .await?;
                                break;
                            }
                        };

                        let is_complete = output.is_complete;
                        let summary = output.session_summary.clone();
                        send_msg(
                            &mut socket_tx,
                            ServerMessage::Turn {
                                reply: output.reply,
                                interaction_count: output.interaction_count,
                                is_complete,
                                stage: output.stage.as_str().to_string(),
                                sources: output.sources,
                            },
                        )
                        .await?;

                        if is_complete {
                            // Terminal frame, then close the channel.
                            send_msg(
                                &mut socket_tx,
                                ServerMessage::Summary {
                                    summary: summary.unwrap_or_default(),
                                },
                            )
                            .await?;
                            break;
                        }
                    }
                    ClientMessage::Init { .. } => {
                        warn!("Ignoring duplicate init frame post-handshake.");
                    }
                }
            }
            Message::Close(_) => {
                info!("Client sent close frame. Shutting down session channel.");
                break;
            }
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = socket_tx.send(Message::Close(None)).await;
    info!("WebSocket connection closed.");
    Ok(())
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
