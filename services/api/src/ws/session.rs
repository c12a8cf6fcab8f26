//! Manages the WebSocket connection lifecycle for a tutoring session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use feynman_tutor_core::{TurnEvent, TutorError};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

const EVENT_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket bound to one session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

/// Main handler for an individual WebSocket connection.
///
/// A single writer task owns the socket sink so that stream chunks, phase
/// changes and errors reach the client in the order they were produced.
#[instrument(name = "ws_session", skip_all, fields(session_id = %session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session_id: Uuid) {
    let (socket_tx, mut socket_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(EVENT_BUFFER);
    let writer = tokio::spawn(write_loop(socket_tx, out_rx).in_current_span());

    match state.orchestrator.session(session_id).await {
        Ok(ctx) => {
            info!(phase = %ctx.phase(), "WebSocket connected to session");
            let _ = out_tx
                .send(TurnEvent::phase_changed(ctx.phase()).into())
                .await;
        }
        Err(e) => {
            warn!(error = %e, "Rejecting WebSocket for unusable session");
            let _ = out_tx.send(ServerMessage::error(e.to_string())).await;
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    }

    while let Some(msg_result) = socket_rx.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                info!("Client sent close frame. Shutting down session.");
                break;
            }
            Ok(Message::Binary(_)) => {
                let _ = out_tx
                    .send(ServerMessage::error("Binary messages are not supported"))
                    .await;
                continue;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };

        let msg = match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Malformed client message");
                let _ = out_tx
                    .send(ServerMessage::error(format!("Invalid message: {}", e)))
                    .await;
                continue;
            }
        };

        let result = match msg {
            ClientMessage::Message { text } => run_turn(&state, session_id, text, &out_tx).await,
            ClientMessage::PhaseTransition { choice } => {
                apply_choice(&state, session_id, choice.as_deref(), &out_tx).await
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "Turn failed");
            let terminal = e.is_terminal();
            if out_tx.send(ServerMessage::error(e.to_string())).await.is_err() || terminal {
                break;
            }
        }
    }

    drop(out_tx);
    let _ = writer.await;
    info!("WebSocket connection closed.");
}

/// Runs one message turn while relaying its events to the writer.
async fn run_turn(
    state: &AppState,
    session_id: Uuid,
    text: String,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), TutorError> {
    let orchestrator = state.orchestrator.clone();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let turn = async move { orchestrator.handle_message(session_id, &text, &tx).await };
    let (result, ()) = tokio::join!(turn, relay(rx, out_tx));
    result.map(|_| ())
}

async fn relay(mut rx: mpsc::Receiver<TurnEvent>, out_tx: &mpsc::Sender<ServerMessage>) {
    while let Some(event) = rx.recv().await {
        if out_tx.send(event.into()).await.is_err() {
            debug!("Writer gone, dropping remaining turn events");
            break;
        }
    }
}

async fn apply_choice(
    state: &AppState,
    session_id: Uuid,
    choice: Option<&str>,
    out_tx: &mpsc::Sender<ServerMessage>,
) -> Result<(), TutorError> {
    let outcome = state
        .orchestrator
        .handle_transition(session_id, choice)
        .await?;
    for phase in &outcome.entered {
        let _ = out_tx.send(TurnEvent::phase_changed(*phase).into()).await;
    }
    if outcome.completed {
        let _ = out_tx
            .send(ServerMessage::Complete {
                phase: outcome.from,
            })
            .await;
    }
    Ok(())
}

async fn write_loop(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMessage>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut socket_tx, msg).await {
            debug!(error = %e, "Client went away, stopping writer");
            return;
        }
    }
    let _ = socket_tx.send(Message::Close(None)).await;
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
