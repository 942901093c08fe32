use crate::providers::ChatMessage;
use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Default number of most recent messages sent to the model.
pub const DEFAULT_CONTEXT_WINDOW: usize = 10;

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One session's ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub session_id: String,
    pub messages: Vec<ChatMessage>,
    pub last_modified: DateTime<Utc>,
}

impl Default for ConversationHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::with_session_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            messages: Vec::new(),
            last_modified: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.last_modified = Utc::now();
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::user(content));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::assistant(content));
    }

    pub fn add_system_message(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::system(content));
    }

    /// Replace every message, keeping the session id.
    pub fn replace_messages(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
        self.last_modified = Utc::now();
    }

    /// The most recent `window` messages, oldest first.
    pub fn context(&self, window: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(window);
        &self.messages[start..]
    }

    fn last_with_role(&self, role: &str) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == role)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize session")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write session file {}", path.display()))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read session file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse session file {}", path.display()))
    }
}

/// Format one turn the way the conversation log stores it.
pub fn format_log_entry(user: &str, assistant: &str, at: DateTime<Local>) -> String {
    let ts = at.format(LOG_TIMESTAMP_FORMAT);
    format!("\n[{ts}] 用户: {user}\n[{ts}] AI: {assistant}\n")
}

/// Append the latest user/assistant exchange to the conversation log.
///
/// Does nothing unless the history holds both a user and an assistant message.
pub async fn append_conversation_log(path: &Path, history: &ConversationHistory) -> Result<()> {
    let (Some(user), Some(assistant)) = (
        history.last_with_role("user"),
        history.last_with_role("assistant"),
    ) else {
        return Ok(());
    };

    let entry = format_log_entry(&user.content, &assistant.content, Local::now());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open conversation log {}", path.display()))?;
    file.write_all(entry.as_bytes())
        .await
        .context("Failed to append to conversation log")?;
    file.flush().await?;
    Ok(())
}
