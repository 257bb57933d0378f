//! Persistence of settled turns.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::RtloopError;
use crate::types::Message;

/// Accepts the ordered messages of each settled turn.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn append(&self, messages: &[Message]) -> Result<(), RtloopError>;
}

/// Session log storing one JSON message per line.
#[derive(Debug, Clone)]
pub struct JsonlSessionLog {
    path: PathBuf,
}

impl JsonlSessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log for session `name` under `dir`.
    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(format!("{name}.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every message back. A missing file is an empty session; lines
    /// that fail to parse are skipped.
    pub async fn load(&self) -> Result<Vec<Message>, RtloopError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(message) => Some(message),
                Err(error) => {
                    warn!(path = %self.path.display(), error = %error, "Skipping unreadable session line");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl PersistenceSink for JsonlSessionLog {
    async fn append(&self, messages: &[Message]) -> Result<(), RtloopError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut buffer = String::new();
        for message in messages {
            buffer.push_str(&serde_json::to_string(message)?);
            buffer.push('\n');
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps appended messages in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<Message>>,
    batches: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// Number of non-empty appends received.
    pub fn batches(&self) -> usize {
        self.batches.lock().map(|count| *count).unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn append(&self, messages: &[Message]) -> Result<(), RtloopError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut stored = self
            .messages
            .lock()
            .map_err(|_| RtloopError::InvalidState("memory sink poisoned".into()))?;
        stored.extend_from_slice(messages);
        drop(stored);
        if let Ok(mut batches) = self.batches.lock() {
            *batches += 1;
        }
        Ok(())
    }
}
