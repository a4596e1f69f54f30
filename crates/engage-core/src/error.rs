use thiserror::Error;

use crate::payloads::SummaryPayload;

/// All errors produced by the engagement monitor.
#[derive(Error, Debug)]
pub enum EngageError {
    /// `start` was called while another session is still active.
    #[error("Cannot start session: session {session_id} is already active. End it first.")]
    AlreadyActive { session_id: String },

    /// `record_tick` or `end` was called with no session open.
    #[error("No active session")]
    NoActiveSession,

    /// An internal ordering guarantee was broken.
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// The frame-capture device failed.
    #[error("Capture failed: {0}")]
    Capture(String),

    /// The inference engine failed to classify a frame.
    #[error("Classification failed: {0}")]
    Classification(String),

    /// A write to the session store failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A session was cut short by a fatal failure. The partial summary was
    /// still computed and handed to the store.
    #[error("Session {} aborted: {source}", .summary.session_id)]
    SessionAborted {
        summary: Box<SummaryPayload>,
        #[source]
        source: Box<EngageError>,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngageError {
    /// `true` for failures that must end the running session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngageError::Capture(_)
                | EngageError::Classification(_)
                | EngageError::Invariant(_)
                | EngageError::SessionAborted { .. }
        )
    }
}

/// Convenience alias used throughout the engage crates.
pub type Result<T> = std::result::Result<T, EngageError>;
