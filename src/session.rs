//! WebSocket session layer: per-connection state, the per-message event
//! protocol, and disconnect handling.
//!
//! Each live connection is one independent task. Within a connection,
//! messages are handled strictly in order: the `user` echo for message N is
//! emitted before its `typing` and `ai` events, and everything for N
//! precedes anything for N+1. A message that arrives while a reply is still
//! streaming is buffered, not dropped.
//!
//! When the client disconnects mid-generation the delta stream is dropped,
//! which drops the underlying HTTP request and lets the LLM runtime cancel
//! the in-flight generation. Nothing further is written to that connection.

use crate::orchestrator::SessionQuery;
use crate::server::AppState;
use crate::types::{BackendKind, ChatEvent, ClientMessage};
use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// Drive one WebSocket connection from accept to disconnect.
pub async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    state.register_session(session_id);
    log::info!("session {session_id} connected");

    let mut backend = *state.default_backend.read().await;
    let welcome = {
        let model = state.current_model.read().await.clone();
        ChatEvent::System(format!("Connected to raggate. Generation model: {model}"))
    };
    if send_event(&mut socket, &welcome).await.is_err() {
        state.deregister_session(session_id);
        return;
    }

    // Messages received while a previous turn was still streaming.
    let mut pending: VecDeque<String> = VecDeque::new();

    loop {
        let text = match next_text(&mut socket, &mut pending).await {
            Some(t) => t,
            None => break,
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                let event = ChatEvent::Error(format!("invalid message: {e}"));
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if let Some(use_framework) = client_msg.use_framework {
            let requested = if use_framework {
                BackendKind::Framework
            } else {
                BackendKind::Manual
            };
            if requested != backend {
                backend = requested;
                let notice = ChatEvent::System(format!("Switched to the {backend} RAG system"));
                if send_event(&mut socket, &notice).await.is_err() {
                    break;
                }
            }
        }

        let message = client_msg.message.trim().to_string();
        if message.is_empty() {
            continue;
        }

        if send_event(&mut socket, &ChatEvent::User(message.clone()))
            .await
            .is_err()
        {
            break;
        }
        if send_event(&mut socket, &ChatEvent::Typing("Assistant is thinking...".to_string()))
            .await
            .is_err()
        {
            break;
        }

        let query = SessionQuery {
            backend,
            sources: client_msg.sources.clone(),
        };
        let model = state.current_model.read().await.clone();

        match state.orchestrator.answer(&model, &message, &query).await {
            Ok(stream) => {
                if !forward_deltas(&mut socket, stream, &mut pending, session_id).await {
                    state.deregister_session(session_id);
                    log::info!("session {session_id} dropped mid-generation");
                    return;
                }
            }
            Err(e) => {
                log::warn!("session {session_id}: turn failed: {e}");
                let event = ChatEvent::Error(e.to_string());
                if send_event(&mut socket, &event).await.is_err() {
                    break;
                }
            }
        }
    }

    state.deregister_session(session_id);
    log::info!("session {session_id} disconnected");
}

/// Next client text frame, draining the pending buffer first. `None` means
/// the connection is gone.
async fn next_text(socket: &mut WebSocket, pending: &mut VecDeque<String>) -> Option<String> {
    if let Some(text) = pending.pop_front() {
        return Some(text);
    }
    loop {
        match socket.recv().await? {
            Ok(Message::Text(t)) => return Some(t),
            Ok(Message::Binary(b)) => return Some(String::from_utf8_lossy(&b).into_owned()),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("socket read error (client closed?): {e}");
                return None;
            }
        }
    }
}

/// Forward one turn's delta stream as `ai` events. Concurrently watches the
/// socket: incoming messages are buffered for the next turn, and a
/// disconnect cancels the stream. Returns false when the connection is gone.
async fn forward_deltas(
    socket: &mut WebSocket,
    mut stream: crate::llm::DeltaStream,
    pending: &mut VecDeque<String>,
    session_id: Uuid,
) -> bool {
    loop {
        tokio::select! {
            delta = stream.next() => {
                match delta {
                    Some(Ok(text)) => {
                        if send_event(socket, &ChatEvent::Ai(text)).await.is_err() {
                            return false;
                        }
                    }
                    Some(Err(e)) => {
                        log::warn!("session {session_id}: stream error: {e}");
                        let event = ChatEvent::Error(e.to_string());
                        return send_event(socket, &event).await.is_ok();
                    }
                    None => return true,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(t))) => pending.push_back(t),
                    Some(Ok(Message::Binary(b))) => {
                        pending.push_back(String::from_utf8_lossy(&b).into_owned());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        // Dropping `stream` cancels the in-flight LLM call.
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(_)) => return false,
                }
            }
        }
    }
}

async fn send_event(
    socket: &mut WebSocket,
    event: &ChatEvent,
) -> std::result::Result<(), axum::Error> {
    let json = serde_json::to_string(event)
        .unwrap_or_else(|_| r#"{"type":"error","message":"internal serialization error"}"#.to_string());
    socket.send(Message::Text(json)).await
}
