//! JSON / JSONL session store.
//!
//! Layout under the store root:
//!
//! ```text
//! sessions/<session-id>/session.json   session document, rewritten atomically
//! sessions/<session-id>/ticks.jsonl    one TickRecord per line, append-only
//! ```

use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use engage_core::collaborators::SessionStore;
use engage_core::error::{EngageError, Result};
use engage_core::models::SessionStatus;
use engage_core::payloads::{SummaryPayload, TickPayload};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

const SESSIONS_DIR: &str = "sessions";
const SESSION_FILE: &str = "session.json";
const TICKS_FILE: &str = "ticks.jsonl";

// ── Documents ─────────────────────────────────────────────────────────────────

/// Top-level document for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<SummaryPayload>,
}

/// One line of a session's `ticks.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    pub write_id: String,
    pub seconds_since_start: i64,
    pub tick: TickPayload,
}

// ── JsonlSessionStore ─────────────────────────────────────────────────────────

/// Filesystem implementation of [`SessionStore`].
///
/// Safe to share across threads; writes are serialised through an internal
/// lock so concurrent appends never interleave within a line.
pub struct JsonlSessionStore {
    root: PathBuf,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl JsonlSessionStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(SESSIONS_DIR))?;
        info!(root = %root.display(), "session store opened");
        Ok(Self {
            root,
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Read a session document.
    pub fn load_session(&self, session_id: &str) -> Result<SessionDocument> {
        let path = self.session_dir(session_id)?.join(SESSION_FILE);
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Read a session's tick timeline in write order.
    ///
    /// Malformed lines are skipped with a warning.
    pub fn load_ticks(&self, session_id: &str) -> Result<Vec<TickRecord>> {
        let path = self.session_dir(session_id)?.join(TICKS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&path)?;
        let mut ticks = Vec::new();
        for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<TickRecord>(&line) {
                Ok(record) => ticks.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed tick record"
                ),
            }
        }
        Ok(ticks)
    }

    /// Ids of every session with a document on disk, sorted.
    pub fn list_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = walkdir::WalkDir::new(self.root.join(SESSIONS_DIR))
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == SESSION_FILE)
            .filter_map(|entry| {
                entry
                    .path()
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().to_string())
            })
            .collect();
        ids.sort();
        ids
    }

    // ── Private helpers ───────────────────────────────────────────────────

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(EngageError::Persistence(format!(
                "invalid session id: {session_id:?}"
            )));
        }
        Ok(self.root.join(SESSIONS_DIR).join(session_id))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(EngageError::Persistence("store closed".to_string()));
        }
        Ok(())
    }

    fn write_document(&self, session_id: &str, doc: &SessionDocument) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| persistence("create session dir", e))?;
        let json = serde_json::to_string_pretty(doc)?;
        write_atomic(&dir.join(SESSION_FILE), &json).map_err(|e| persistence("write session", e))
    }
}

impl SessionStore for JsonlSessionStore {
    fn create_session(
        &self,
        session_id: &str,
        device_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let doc = SessionDocument {
            device_id: device_id.to_string(),
            started_at,
            status: SessionStatus::Active,
            ended_at: None,
            summary: None,
        };
        self.write_document(session_id, &doc)?;
        info!(session_id, device_id, "session created");
        Ok(())
    }

    fn emit_tick(
        &self,
        session_id: &str,
        payload: &TickPayload,
        seconds_since_start: i64,
    ) -> Result<String> {
        self.ensure_open()?;
        let dir = self.session_dir(session_id)?;
        let record = TickRecord {
            write_id: uuid::Uuid::new_v4().simple().to_string(),
            seconds_since_start,
            tick: payload.clone(),
        };
        let line = serde_json::to_string(&record)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        std::fs::create_dir_all(&dir).map_err(|e| persistence("create session dir", e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(TICKS_FILE))
            .map_err(|e| persistence("open tick timeline", e))?;
        writeln!(file, "{line}").map_err(|e| persistence("append tick", e))?;

        debug!(session_id, write_id = %record.write_id, "tick emitted");
        Ok(record.write_id)
    }

    fn complete_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        summary: &SummaryPayload,
    ) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut doc = match self.load_session(session_id) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(session_id, error = %e, "session document missing; rebuilding from summary");
                SessionDocument {
                    device_id: summary.device_id.clone(),
                    started_at: summary.started_at,
                    status: SessionStatus::Active,
                    ended_at: None,
                    summary: None,
                }
            }
        };
        doc.status = SessionStatus::Completed;
        doc.ended_at = Some(ended_at);
        doc.summary = Some(summary.clone());
        self.write_document(session_id, &doc)?;
        info!(session_id, "session completed");
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(root = %self.root.display(), "session store closed");
        }
        Ok(())
    }
}

// ── Free helpers ──────────────────────────────────────────────────────────────

/// Write to a temp file then rename so readers never see a partial document.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

fn persistence(what: &str, err: std::io::Error) -> EngageError {
    EngageError::Persistence(format!("{what}: {err}"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
