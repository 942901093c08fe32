//! WebSocket chat handler.
//!
//! Protocol:
//! ```text
//! Client -> Server: {"session_id":"abc","content":"Hello","context":[...]}
//! Server -> Client: {"type":"start","content":"","session_id":"abc"}
//! Server -> Client: {"type":"stream","content":"Hi! ","session_id":"abc"}
//! Server -> Client: {"type":"end","content":"","session_id":"abc"}
//! Server -> Client: {"type":"full","content":"Hi! ...","session_id":"abc"}
//! ```
//!
//! Every inbound message is framed by `start`, `end` and `full`, failures
//! included; `full` then carries whatever was streamed before the error.
//! Sessions live for the lifetime of the connection.

use super::AppState;
use crate::agent::{run_turn, ConversationHistory, TurnEvent};
use crate::providers::{sanitize_api_error, ChatMessage};
use crate::tools::FileManager;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub content: String,
    /// Client-held history; when non-empty it replaces the session's.
    #[serde(default)]
    pub context: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Start,
    Stream,
    Error,
    End,
    Full,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    #[serde(rename = "type")]
    pub kind: FrameType,
    pub content: String,
    pub session_id: String,
}

impl OutboundFrame {
    pub fn new(kind: FrameType, content: impl Into<String>, session_id: &str) -> Self {
        Self {
            kind,
            content: content.into(),
            session_id: session_id.to_string(),
        }
    }
}

struct Session {
    history: ConversationHistory,
    files: Option<FileManager>,
}

impl Session {
    fn open(session_id: &str, state: &AppState) -> Self {
        let files = state
            .sandbox_root
            .as_ref()
            .and_then(|root| match FileManager::new(root) {
                Ok(files) => Some(files),
                Err(e) => {
                    tracing::warn!(session = session_id, "File tools disabled: {e}");
                    None
                }
            });
        tracing::info!(session = session_id, tools = files.is_some(), "Session created");
        Self {
            history: ConversationHistory::with_session_id(session_id),
            files,
        }
    }
}

/// GET /ws/chat: WebSocket upgrade for chat
pub async fn handle_ws_chat(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send(out: &mpsc::Sender<OutboundFrame>, frame: OutboundFrame) {
    if out.send(frame).await.is_err() {
        tracing::debug!("WebSocket writer closed");
    }
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<OutboundFrame>(EVENT_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!("Failed to encode frame: {e}");
                    continue;
                }
            };
            if let Err(e) = sender.send(Message::Text(text.into())).await {
                tracing::error!("WebSocket send failed: {e}");
                break;
            }
        }
    });

    let mut sessions: HashMap<String, Session> = HashMap::new();

    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let inbound: InboundMessage = match serde_json::from_str(&text) {
            Ok(inbound) => inbound,
            Err(e) => {
                tracing::debug!("Rejected inbound frame: {e}");
                send(&out_tx, OutboundFrame::new(FrameType::Error, "Invalid JSON", "")).await;
                continue;
            }
        };

        handle_message(&state, &mut sessions, inbound, &out_tx).await;
    }

    drop(out_tx);
    let _ = writer.await;
}

async fn handle_message(
    state: &AppState,
    sessions: &mut HashMap<String, Session>,
    inbound: InboundMessage,
    out: &mpsc::Sender<OutboundFrame>,
) {
    let session_id = inbound
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let session = match sessions.entry(session_id.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => entry.insert(Session::open(&session_id, state)),
    };

    if !inbound.context.is_empty() {
        session.history.replace_messages(inbound.context);
    }
    let content = inbound.content;
    let already_sent = session
        .history
        .messages
        .last()
        .is_some_and(|last| last.role == "user" && last.content == content);
    if !content.trim().is_empty() && !already_sent {
        tracing::debug!(session = %session_id, "User message: {content}");
        session.history.add_user_message(content);
    }

    send(out, OutboundFrame::new(FrameType::Start, "", &session_id)).await;
    let full_response = if session.history.messages.last().is_none_or(|last| last.role != "user") {
        send(out, OutboundFrame::new(FrameType::Error, "Empty message", &session_id)).await;
        String::new()
    } else {
        run_session_turn(state, session, &session_id, out).await
    };
    send(out, OutboundFrame::new(FrameType::End, "", &session_id)).await;
    send(out, OutboundFrame::new(FrameType::Full, full_response, &session_id)).await;
}

/// Run one turn, forwarding its events as frames. Returns the concatenated
/// model fragments, partial when the turn failed.
async fn run_session_turn(
    state: &AppState,
    session: &mut Session,
    session_id: &str,
    out: &mpsc::Sender<OutboundFrame>,
) -> String {
    let (tx, mut rx) = mpsc::channel::<TurnEvent>(EVENT_BUFFER);
    let turn = async move {
        let result = run_turn(
            state.provider.as_ref(),
            &mut session.history,
            session.files.as_ref(),
            &state.options,
            Some(&tx),
        )
        .await;
        drop(tx);
        result
    };
    let forward = async {
        let mut full_response = String::new();
        while let Some(event) = rx.recv().await {
            let frame = match event {
                TurnEvent::Fragment(text) => {
                    full_response.push_str(&text);
                    OutboundFrame::new(FrameType::Stream, text, session_id)
                }
                TurnEvent::ToolResult { display, .. } => {
                    OutboundFrame::new(FrameType::Stream, format!("\n{display}\n"), session_id)
                }
                TurnEvent::IterationCapReached { pending_calls } => OutboundFrame::new(
                    FrameType::Stream,
                    format!(
                        "\n[WARNING] Tool iteration limit reached; {pending_calls} pending tool call(s) skipped\n"
                    ),
                    session_id,
                ),
                TurnEvent::Error(description) => OutboundFrame::new(
                    FrameType::Error,
                    format!("Error: {}", sanitize_api_error(&description)),
                    session_id,
                ),
            };
            send(out, frame).await;
        }
        full_response
    };

    let (result, full_response) = tokio::join!(turn, forward);
    match result {
        Ok(outcome) => tracing::info!(
            session = %session_id,
            invocations = outcome.invocations,
            tool_calls = outcome.tool_results.len(),
            "Turn complete"
        ),
        Err(e) => tracing::warn!(session = %session_id, "Turn failed: {e}"),
    }
    full_response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_accepts_camel_case_session_id() {
        let msg: InboundMessage =
            serde_json::from_str(r#"{"sessionId":"s1","content":"hi"}"#).unwrap();
        assert_eq!(msg.session_id.as_deref(), Some("s1"));
        assert!(msg.context.is_empty());
    }

    #[test]
    fn inbound_parses_context_messages() {
        let msg: InboundMessage = serde_json::from_str(
            r#"{"content":"","context":[{"role":"user","content":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.context, vec![ChatMessage::user("hello")]);
    }

    #[test]
    fn outbound_frame_shape() {
        let frame = OutboundFrame::new(FrameType::Stream, "chunk", "abc");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "stream", "content": "chunk", "session_id": "abc"})
        );
    }
}
