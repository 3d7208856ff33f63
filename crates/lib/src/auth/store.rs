//! Persisted session file (e.g. ~/.langchat/session.json).

use crate::auth::session::Session;
use anyhow::{Context, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load from JSON file. Returns None if file missing or invalid.
    pub fn load(&self) -> Option<Session> {
        let s = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&s) {
            Ok(session) => Some(session),
            Err(e) => {
                log::warn!("ignoring unreadable session file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Save to JSON file. Creates parent dirs if needed.
    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let s = serde_json::to_string_pretty(session).context("serializing session")?;
        std::fs::write(&self.path, s)
            .with_context(|| format!("writing session to {}", self.path.display()))?;
        Ok(())
    }

    /// Remove the file; a missing file is not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", self.path.display())),
        }
    }
}
