//! Persisted "last-used thread" selection.
//!
//! [`LocalStore`] is a small JSON key/value file standing in for browser local storage; the
//! selection lives under [`THREAD_ID_KEY`].

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Mutex;

/// Storage key of the last-used thread id.
pub const THREAD_ID_KEY: &str = "langgraph_thread_id";

/// Where the directory remembers the last-used thread. Failures are logged by implementations.
pub trait SelectionStore: Send + Sync {
    fn load(&self) -> Option<String>;
    fn save(&self, thread_id: &str);
}

/// JSON object file of string values (e.g. ~/.langchat/state.json).
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Map<String, Value> {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str::<Map<String, Value>>(&s).ok())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read_all()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut all = self.read_all();
        all.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&all)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let mut all = self.read_all();
        if all.remove(key).is_some() {
            self.write_all(&all)?;
        }
        Ok(())
    }

    fn write_all(&self, all: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(all).context("serializing local state")?;
        std::fs::write(&self.path, s)
            .with_context(|| format!("writing local state to {}", self.path.display()))
    }
}

impl SelectionStore for LocalStore {
    fn load(&self) -> Option<String> {
        self.get(THREAD_ID_KEY)
    }

    fn save(&self, thread_id: &str) {
        if let Err(e) = self.set(THREAD_ID_KEY, thread_id) {
            log::warn!("could not persist current thread: {:#}", e);
        }
    }
}

/// In-process selection (no persistence across runs).
#[derive(Debug, Default)]
pub struct MemorySelection {
    inner: Mutex<Option<String>>,
}

impl MemorySelection {
    pub fn new(initial: Option<String>) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }
}

impl SelectionStore for MemorySelection {
    fn load(&self) -> Option<String> {
        self.inner.lock().ok().and_then(|g| g.clone())
    }

    fn save(&self, thread_id: &str) {
        if let Ok(mut g) = self.inner.lock() {
            *g = Some(thread_id.to_string());
        }
    }
}
