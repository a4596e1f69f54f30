//! Session lifecycle state machine.
//!
//! [`SessionManager`] is either idle or holds exactly one active session
//! together with that session's tick scores. `start`, `record_tick` and `end`
//! are the only ways in; callers get snapshots, never the live session.

use chrono::{DateTime, Utc};
use engage_core::error::{EngageError, Result};
use engage_core::models::{timeline_ref, Session, SessionStatus, SessionSummary};

// ── SessionAccumulator ────────────────────────────────────────────────────────

/// Scores recorded for the active session, in capture order.
#[derive(Debug, Default)]
struct SessionAccumulator {
    scores: Vec<u8>,
    tick_count: u64,
}

impl SessionAccumulator {
    fn push(&mut self, score: u8) {
        self.scores.push(score);
        self.tick_count += 1;
    }

    fn average(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        let total: u64 = self.scores.iter().map(|&s| u64::from(s)).sum();
        total as f64 / self.scores.len() as f64
    }

    fn tick_count(&self) -> u64 {
        if self.scores.is_empty() {
            self.tick_count
        } else {
            self.tick_count.max(1)
        }
    }
}

// ── SessionManager ────────────────────────────────────────────────────────────

/// Enforces "at most one active session".
#[derive(Debug, Default)]
pub struct SessionManager {
    active: Option<Session>,
    accumulator: SessionAccumulator,
}

impl SessionManager {
    /// Create an idle manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a session is currently open.
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Snapshot of the active session.
    pub fn active_session(&self) -> Option<Session> {
        self.active.clone()
    }

    /// Number of ticks recorded for the active session so far.
    pub fn recorded_ticks(&self) -> u64 {
        self.accumulator.tick_count
    }

    /// Open a new session.
    ///
    /// Fails with [`EngageError::AlreadyActive`] if one is already open; the
    /// existing session is left untouched.
    pub fn start(&mut self, device_id: &str, user_id: Option<&str>) -> Result<Session> {
        self.start_at(device_id, user_id, Utc::now())
    }

    /// Record one tick's score for the active session.
    pub fn record_tick(&mut self, score: u8) -> Result<()> {
        if self.active.is_none() {
            return Err(EngageError::NoActiveSession);
        }
        self.accumulator.push(score);
        Ok(())
    }

    /// Close the active session and compute its summary.
    ///
    /// This is the only Active → Idle transition. A second call fails with
    /// [`EngageError::NoActiveSession`].
    pub fn end(&mut self) -> Result<SessionSummary> {
        self.end_at(Utc::now())
    }

    // ── Clock-injected variants ───────────────────────────────────────────

    pub(crate) fn start_at(
        &mut self,
        device_id: &str,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        if let Some(existing) = &self.active {
            return Err(EngageError::AlreadyActive {
                session_id: existing.id.clone(),
            });
        }

        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            device_id: device_id.to_string(),
            user_id: user_id.map(str::to_string),
            started_at: now,
            status: SessionStatus::Active,
        };
        self.accumulator = SessionAccumulator::default();
        self.active = Some(session.clone());

        tracing::info!(session_id = %session.id, device_id, "session started");
        Ok(session)
    }

    pub(crate) fn end_at(&mut self, now: DateTime<Utc>) -> Result<SessionSummary> {
        let Some(session) = self.active.as_ref() else {
            return Err(EngageError::NoActiveSession);
        };

        let duration_seconds = (now - session.started_at).num_seconds().max(1);
        let summary = SessionSummary {
            session_id: session.id.clone(),
            device_id: session.device_id.clone(),
            started_at: session.started_at,
            ended_at: now,
            duration_seconds,
            average_engagement: self.accumulator.average(),
            tick_count: self.accumulator.tick_count(),
            timeline_ref: timeline_ref(&session.id),
        };

        tracing::info!(
            session_id = %summary.session_id,
            duration_seconds,
            average_engagement = summary.average_engagement,
            tick_count = summary.tick_count,
            "session ended"
        );

        self.active = None;
        self.accumulator = SessionAccumulator::default();
        Ok(summary)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
