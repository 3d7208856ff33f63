//! Wire types for the agent deployment: threads, run requests, and stream parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Remote conversation thread as returned by the deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Free-form metadata (`user_id`, `created_at`, `title`, ...). `null` on the wire becomes empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Graph state values (`messages`, `title`, `description`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Thread {
    /// Raw `metadata.created_at`, when present and non-empty.
    pub fn created_at_raw(&self) -> Option<&str> {
        self.metadata
            .get("created_at")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `metadata.created_at` parsed as RFC 3339.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at_raw()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
    }

    /// Title from graph state, falling back to metadata.
    pub fn title(&self) -> Option<&str> {
        self.values
            .as_ref()
            .and_then(|v| v.get("title"))
            .and_then(Value::as_str)
            .or_else(|| self.metadata.get("title").and_then(Value::as_str))
    }

    pub fn description(&self) -> Option<&str> {
        self.values
            .as_ref()
            .and_then(|v| v.get("description"))
            .and_then(Value::as_str)
            .or_else(|| self.metadata.get("description").and_then(Value::as_str))
    }

    /// Raw `values.messages` entries (empty when the thread has no state yet).
    pub fn messages(&self) -> &[Value] {
        self.values
            .as_ref()
            .and_then(|v| v.get("messages"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Shallow-merge `patch` into metadata (patch wins).
    pub fn merge_metadata(&mut self, patch: &Map<String, Value>) {
        for (k, v) in patch {
            self.metadata.insert(k.clone(), v.clone());
        }
    }

    /// Shallow-merge `patch` into graph values; non-object values are replaced by an object.
    pub fn merge_values(&mut self, patch: &Map<String, Value>) {
        if patch.is_empty() {
            return;
        }
        let values = self
            .values
            .get_or_insert_with(|| Value::Object(Map::new()));
        if !values.is_object() {
            *values = Value::Object(Map::new());
        }
        if let Value::Object(map) = values {
            for (k, v) in patch {
                map.insert(k.clone(), v.clone());
            }
        }
    }
}

/// Body of `POST /threads/{id}/runs/stream`.
#[derive(Debug, Clone, Serialize)]
pub struct RunRequest {
    pub assistant_id: String,
    pub input: Value,
    pub config: Value,
    pub stream_mode: Vec<String>,
}

impl RunRequest {
    /// One human turn: `{messages: [{role: "human", content}]}` with `configurable.model_name`,
    /// streaming message tuples and node updates.
    pub fn human_turn(assistant_id: &str, model_name: &str, content: &str) -> Self {
        Self {
            assistant_id: assistant_id.to_string(),
            input: serde_json::json!({
                "messages": [{ "role": "human", "content": content }]
            }),
            config: serde_json::json!({
                "configurable": { "model_name": model_name }
            }),
            stream_mode: vec!["messages-tuple".to_string(), "updates".to_string()],
        }
    }
}

/// One decoded event of a run stream (`event` name + JSON `data`).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPart {
    pub event: String,
    pub data: Value,
}
