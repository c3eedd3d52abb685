//! Pushes presentation state to HUD clients over a WebSocket.

use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use jarvis_core::hud::HudSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let hud = state.hud.clone();
    ws.on_upgrade(|socket| handle_socket(socket, hud))
}

/// Sends the current snapshot, then one per change, until either side
/// goes away. Client messages are ignored.
#[instrument(name = "hud_stream", skip_all)]
async fn handle_socket(socket: WebSocket, mut hud: watch::Receiver<HudSnapshot>) {
    info!("HUD client connected.");
    let (mut sink, mut stream) = socket.split();
    hud.mark_changed();

    loop {
        tokio::select! {
            changed = hud.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = hud.borrow_and_update().clone();
                if let Err(e) = send_snapshot(&mut sink, &snapshot).await {
                    warn!(error = ?e, "Failed to push HUD snapshot");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    warn!(error = %e, "HUD socket error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    info!("HUD client disconnected.");
}

async fn send_snapshot(
    sink: &mut SplitSink<WebSocket, Message>,
    snapshot: &HudSnapshot,
) -> anyhow::Result<()> {
    let text = serde_json::to_string(snapshot)?;
    sink.send(Message::Text(text.into())).await?;
    Ok(())
}
