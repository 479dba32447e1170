//! Append-only conversation log.
//!
//! One JSON object per line in `messages.jsonl` under the data directory.
//! Writes append only; reads scan the whole file. The file is the durable
//! record that lets a reconnecting client replay recent conversation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;
use crate::extract::Role;

const LOG_FILE: &str = "messages.jsonl";

/// One logged message. `html` is only present for assistant messages whose
/// source candidate carried rendered markup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    pub format: String,
}

impl HistoryEntry {
    pub fn assistant(text: impl Into<String>, html: Option<String>) -> Self {
        let format = if html.is_some() { "html" } else { "markdown" };
        Self {
            timestamp: Utc::now(),
            role: Role::Assistant,
            text: text.into(),
            html,
            format: format.to_string(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            role: Role::User,
            text: text.into(),
            html: None,
            format: "plain".to_string(),
        }
    }
}

/// Handle to the on-disk log. Cheap to clone the path; all IO is per-call.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    path: PathBuf,
}

impl HistoryLog {
    /// Open (or create) the log under `data_dir`. The directory is created
    /// if missing; the file itself appears on first append.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).await?;
        Ok(Self {
            path: data_dir.join(LOG_FILE),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// The most recent `limit` entries, oldest first. Malformed lines are
    /// skipped with a warning rather than failing the whole replay.
    pub async fn recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(line = idx + 1, %err, "skipping malformed history line");
                }
            }
        }

        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }
}
