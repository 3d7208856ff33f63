//! Folds run stream parts into the growing assistant reply and out-of-band thread updates.

use crate::chat::message::content_text;
use crate::langgraph::StreamPart;
use serde_json::Value;

/// Chunk type carrying assistant tokens.
const AI_CHUNK_TYPE: &str = "AIMessageChunk";
/// Node whose updates carry a generated title.
const TITLE_NODE: &str = "generate_title";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldEvent {
    /// New tokens were appended to the reply.
    Token(String),
    /// The graph generated a title for the thread.
    Title {
        title: String,
        description: Option<String>,
    },
    /// The run reported an error.
    RunError(String),
}

/// Coalesces `messages` tuples from one graph node into a single assistant text.
#[derive(Debug, Clone)]
pub struct MessageFold {
    node: String,
    text: String,
}

impl MessageFold {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            text: String::new(),
        }
    }

    /// Assistant text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn fold(&mut self, part: &StreamPart) -> Option<FoldEvent> {
        match part.event.as_str() {
            "messages" => self.fold_message(&part.data),
            "updates" => title_update(&part.data),
            "error" => Some(FoldEvent::RunError(error_message(&part.data))),
            _ => None,
        }
    }

    fn fold_message(&mut self, data: &Value) -> Option<FoldEvent> {
        let tuple = data.as_array()?;
        let chunk = tuple.first()?;
        let metadata = tuple.get(1);

        if chunk.get("type").and_then(Value::as_str) != Some(AI_CHUNK_TYPE) {
            return None;
        }
        let node = metadata
            .and_then(|m| m.get("langgraph_node"))
            .and_then(Value::as_str);
        if node != Some(self.node.as_str()) {
            return None;
        }
        let delta = content_text(chunk.get("content")?)?;
        self.text.push_str(&delta);
        Some(FoldEvent::Token(delta))
    }
}

fn title_update(data: &Value) -> Option<FoldEvent> {
    let update = data.get(TITLE_NODE)?;
    let title = update.get("title").and_then(Value::as_str)?;
    let description = update
        .get("description")
        .and_then(Value::as_str)
        .map(str::to_string);
    Some(FoldEvent::Title {
        title: title.to_string(),
        description,
    })
}

fn error_message(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        _ => data
            .get("message")
            .or_else(|| data.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
    }
}
