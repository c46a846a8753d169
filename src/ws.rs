//! Live event stream over WebSocket.
//!
//! JSON frames: a full snapshot on connect, then every engine event
//! as it is applied. A client that reconnects with a known revision
//! can send {"type":"sync","since":N} and gets the missed events
//! replayed — or a fresh snapshot if the log no longer reaches back
//! that far.

use crate::auth::SharedState;
use crate::world::{Project, Task, TeamMember, World};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct Snapshot<'a> {
    r#type: &'static str,
    revision: u64,
    tasks: Vec<&'a Task>,
    members: Vec<&'a TeamMember>,
    projects: Vec<&'a Project>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Sync { since: u64 },
}

fn snapshot_json(world: &World) -> String {
    serde_json::to_string(&Snapshot {
        r#type: "snapshot",
        revision: world.revision,
        tasks: world.tasks.values().collect(),
        members: world.members.values().collect(),
        projects: world.projects.values().collect(),
    })
    .unwrap_or_default()
}

// ── WS upgrade handler ────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

// ── Socket lifecycle ───────────────────────────────────────────

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe to the broadcast BEFORE reading the snapshot so no
    // event can slip between snapshot and subscription.
    let mut events_rx = state.events_tx.subscribe();

    let snapshot = {
        let world = state.world.read().unwrap();
        snapshot_json(&world)
    };

    if ws_tx.send(Message::Text(snapshot)).await.is_err() {
        return; // client already gone
    }

    loop {
        tokio::select! {
            broadcast = events_rx.recv() => {
                match broadcast {
                    Ok(json) => {
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // Fell behind the channel: resync with a snapshot.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        let snapshot = {
                            let world = state.world.read().unwrap();
                            snapshot_json(&world)
                        };
                        if ws_tx.send(Message::Text(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_client_message(&state, &text);
                        for reply in replies {
                            if ws_tx.send(Message::Text(reply)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ignore binary, ping, pong
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

/// Answer a sync request with the missed events, or a fresh
/// snapshot when the log no longer covers the client's revision.
fn handle_client_message(state: &SharedState, text: &str) -> Vec<String> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(error = %e, "bad client message");
            return Vec::new();
        }
    };

    match msg {
        ClientMessage::Sync { since } => {
            let world = state.world.read().unwrap();
            match world.events_since(since) {
                Some(events) => events
                    .iter()
                    .filter_map(|(_, event)| serde_json::to_string(event).ok())
                    .collect(),
                None => vec![snapshot_json(&world)],
            }
        }
    }
}
