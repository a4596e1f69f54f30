//! Polled command inbox.
//!
//! Each command is one JSON file, `<dir>/<command-id>.json`, holding
//! `{"type": ..., "status": "pending"}`. Ids sort by submission time, so the
//! oldest pending command is the first one by file name. Handled commands
//! are rewritten in place with their final status rather than deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use engage_core::error::{EngageError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::write_atomic;

/// Lifecycle of an inbox command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Processed,
    Rejected,
}

/// On-disk shape of one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDocument {
    /// Free-form command type, e.g. `"start"` or `"end_session"`.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default = "pending")]
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handled_at: Option<DateTime<Utc>>,
}

fn pending() -> CommandStatus {
    CommandStatus::Pending
}

/// A directory of command documents.
#[derive(Debug, Clone)]
pub struct CommandInbox {
    dir: PathBuf,
}

impl CommandInbox {
    /// Open (creating if needed) the inbox directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Queue a new pending command and return its id.
    pub fn submit(&self, kind: &str) -> Result<String> {
        let id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let doc = CommandDocument {
            kind: kind.to_string(),
            status: CommandStatus::Pending,
            reason: None,
            handled_at: None,
        };
        self.write(&id, &doc)?;
        debug!(command_id = %id, kind, "command submitted");
        Ok(id)
    }

    /// The oldest command still marked pending, if any.
    ///
    /// Files that do not parse are marked rejected so they are not retried
    /// on every poll.
    pub fn fetch_pending(&self) -> Result<Option<(String, CommandDocument)>> {
        for (id, path) in self.command_files() {
            let parsed = std::fs::read_to_string(&path)
                .map_err(EngageError::from)
                .and_then(|raw| {
                    serde_json::from_str::<CommandDocument>(&raw).map_err(EngageError::from)
                });
            match parsed {
                Ok(doc) if doc.status == CommandStatus::Pending => return Ok(Some((id, doc))),
                Ok(_) => continue,
                Err(e) => {
                    warn!(command_id = %id, error = %e, "unreadable command; rejecting");
                    self.mark(&id, CommandStatus::Rejected, Some(&format!("unreadable: {e}")))?;
                }
            }
        }
        Ok(None)
    }

    /// Record the outcome of a command.
    pub fn mark(&self, id: &str, status: CommandStatus, reason: Option<&str>) -> Result<()> {
        let path = self.path_for(id);
        let mut doc = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str::<CommandDocument>(&raw).ok())
            .unwrap_or(CommandDocument {
                kind: String::new(),
                status,
                reason: None,
                handled_at: None,
            });
        doc.status = status;
        doc.reason = reason.map(str::to_string);
        doc.handled_at = Some(Utc::now());
        self.write(id, &doc)?;
        debug!(command_id = %id, ?status, "command marked");
        Ok(())
    }

    /// Read one command back.
    pub fn get(&self, id: &str) -> Result<CommandDocument> {
        let raw = std::fs::read_to_string(self.path_for(id))?;
        Ok(serde_json::from_str(&raw)?)
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn command_files(&self) -> Vec<(String, PathBuf)> {
        let mut files: Vec<(String, PathBuf)> = walkdir::WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .map(|ext| ext == "json")
                        .unwrap_or(false)
            })
            .filter_map(|entry| {
                let id = entry.path().file_stem()?.to_string_lossy().to_string();
                Some((id, entry.into_path()))
            })
            .collect();
        files.sort();
        files
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn write(&self, id: &str, doc: &CommandDocument) -> Result<()> {
        let json = serde_json::to_string_pretty(doc)?;
        write_atomic(&self.path_for(id), &json)?;
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
