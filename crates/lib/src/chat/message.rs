//! Chat messages as shown to the user, and conversion from thread state.

use crate::langgraph::Thread;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Convert one `values.messages` entry: `type == "human"` is the user, anything else the assistant.
    pub fn from_state(message: &Value) -> Self {
        let role = match message.get("type").and_then(Value::as_str) {
            Some("human") => Role::User,
            _ => Role::Assistant,
        };
        let content = message
            .get("content")
            .and_then(content_text)
            .unwrap_or_default();
        Self { role, content }
    }
}

/// Text of a message `content`: a plain string, or the concatenated `text` of a block list.
pub fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => Some(
            blocks
                .iter()
                .filter_map(|b| match b {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(_) => {
                        let is_text = b
                            .get("type")
                            .and_then(Value::as_str)
                            .map_or(true, |t| t == "text");
                        if is_text {
                            b.get("text").and_then(Value::as_str)
                        } else {
                            None
                        }
                    }
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    }
}

/// History of a thread's graph state.
pub fn history(messages: &[Value]) -> Vec<ChatMessage> {
    messages.iter().map(ChatMessage::from_state).collect()
}

/// One-line preview for thread listings: the generated description, otherwise the text of the
/// last message.
pub fn thread_preview(thread: &Thread) -> Option<String> {
    if let Some(d) = thread.description().filter(|d| !d.trim().is_empty()) {
        return Some(d.to_string());
    }
    thread
        .messages()
        .last()
        .and_then(|m| m.get("content"))
        .and_then(content_text)
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|text| !text.is_empty())
}
