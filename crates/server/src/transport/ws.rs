// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket event stream: forwards the server event hub to each client,
//! preceded by a status snapshot so late subscribers converge.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;

use crate::events::ServerEvent;

use super::AppState;

/// `GET /ws`
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve(socket, state))
}

async fn serve(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let mut events = BroadcastStream::new(state.events.subscribe());

    // Snapshot first: current orchestrator and member statuses.
    for event in snapshot_events(&state) {
        if send_event(&mut sink, &event).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            event = events.next() => {
                match event {
                    Some(Ok(event)) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        debug!(skipped, "ws client lagged, dropping events");
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Inbound frames are ignored; the socket is event-only.
                    Some(Ok(_)) => {}
                }
            }
            _ = state.shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}

fn snapshot_events(state: &AppState) -> Vec<ServerEvent> {
    let mut events = vec![ServerEvent::OrchestratorStatus {
        agent_status: state.store.orchestrator_status(),
        reason: "snapshot".to_owned(),
    }];
    for (session_name, status) in state.store.all_member_statuses() {
        events.push(ServerEvent::TeamMemberStatus {
            session_name,
            member_id: None,
            agent_status: status,
            working_status: None,
            reason: "snapshot".to_owned(),
        });
    }
    events
}

async fn send_event(
    sink: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(event) else {
        return Ok(());
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
