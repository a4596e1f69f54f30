//! Per-session tick loop.
//!
//! One [`TickLoop`] drives one session: capture, classify, score, persist,
//! record, display, then wait out the rest of the tick interval. It runs as
//! its own tokio task and stops when its [`CancellationToken`] fires. Every
//! exit path, clean or not, closes the session through
//! [`SessionManager::end`] and hands the summary to the store.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use engage_core::collaborators::{Classifier, FrameSource, Indicator, SessionStore};
use engage_core::config::MonitorConfig;
use engage_core::error::{EngageError, Result};
use engage_core::models::{Observation, Session};
use engage_core::payloads::{SummaryPayload, TickPayload};
use engage_core::scorer;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::session_manager::SessionManager;

// ── Public types ──────────────────────────────────────────────────────────────

/// The external systems a session talks to, shared across sessions.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn FrameSource>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn SessionStore>,
    pub indicator: Arc<dyn Indicator>,
}

// ── TickLoop ──────────────────────────────────────────────────────────────────

/// Background worker for the currently active session.
///
/// The session must already be open on the shared [`SessionManager`]; the
/// loop picks it up from there and owns it until it returns.
pub struct TickLoop {
    sessions: Arc<Mutex<SessionManager>>,
    config: MonitorConfig,
    collaborators: Collaborators,
    cancel: CancellationToken,
}

impl TickLoop {
    pub fn new(
        sessions: Arc<Mutex<SessionManager>>,
        config: MonitorConfig,
        collaborators: Collaborators,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            config,
            collaborators,
            cancel,
        }
    }

    /// Run the loop in a dedicated tokio task.
    pub fn spawn(self) -> JoinHandle<Result<SummaryPayload>> {
        tokio::spawn(self.run())
    }

    /// Tick until cancelled or until a fatal error, then close the session.
    ///
    /// Returns the summary on a clean stop. A fatal capture, classification
    /// or store error still closes the session and comes back as
    /// [`EngageError::SessionAborted`] carrying the summary.
    pub async fn run(self) -> Result<SummaryPayload> {
        let session = self
            .sessions
            .lock()
            .await
            .active_session()
            .ok_or(EngageError::NoActiveSession)?;

        tracing::info!(
            session_id = %session.id,
            interval_secs = self.config.tick_interval_seconds,
            threshold = self.config.confidence_threshold,
            "tick loop started"
        );

        let store = &self.collaborators.store;
        let failure = match store.create_session(&session.id, &session.device_id, session.started_at)
        {
            Ok(()) => self.tick_until_cancelled(&session).await.err(),
            Err(e) => {
                tracing::error!(session_id = %session.id, error = %e, "could not create session record");
                Some(e)
            }
        };

        let summary = match self.drain().await {
            Ok(summary) => summary,
            Err(e) => return Err(failure.unwrap_or(e)),
        };

        match failure {
            None => Ok(summary),
            Some(source) => {
                tracing::error!(session_id = %summary.session_id, error = %source, "session aborted");
                Err(EngageError::SessionAborted {
                    summary: Box::new(summary),
                    source: Box::new(source),
                })
            }
        }
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn tick_until_cancelled(&self, session: &Session) -> Result<()> {
        let interval = self.config.tick_interval();

        while !self.cancel.is_cancelled() {
            let tick_started = Instant::now();
            self.tick(session).await?;

            let remaining = interval.saturating_sub(tick_started.elapsed());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(remaining) => {}
            }
        }

        tracing::debug!(session_id = %session.id, "tick loop cancelled");
        Ok(())
    }

    async fn tick(&self, session: &Session) -> Result<u8> {
        let timestamp = Utc::now();
        let observations = self.sample().await?;
        let score = scorer::score(&observations, &self.config.weights);

        let payload = TickPayload::new(&session.device_id, &session.id, score, timestamp);
        let seconds_since_start = (timestamp - session.started_at).num_seconds().max(0);
        match self
            .collaborators
            .store
            .emit_tick(&session.id, &payload, seconds_since_start)
        {
            Ok(write_id) => tracing::debug!(%write_id, score, "tick emitted"),
            Err(e) => tracing::warn!(session_id = %session.id, error = %e, "tick emit failed; continuing"),
        }

        self.sessions
            .lock()
            .await
            .record_tick(score)
            .map_err(|e| EngageError::Invariant(format!("tick recorded outside session: {e}")))?;

        self.collaborators.indicator.show(score);
        Ok(score)
    }

    /// Capture and classify off the executor.
    async fn sample(&self) -> Result<Vec<Observation>> {
        let camera = Arc::clone(&self.collaborators.camera);
        let classifier = Arc::clone(&self.collaborators.classifier);
        let threshold = self.config.confidence_threshold;

        tokio::task::spawn_blocking(move || {
            let frame = camera.capture_frame()?;
            classifier.classify(&frame, threshold)
        })
        .await
        .map_err(|e| EngageError::Capture(format!("capture task failed: {e}")))?
    }

    /// Close the session and persist its summary. Persistence is best-effort.
    async fn drain(&self) -> Result<SummaryPayload> {
        let summary = self.sessions.lock().await.end()?;
        let payload = SummaryPayload::from(&summary);

        if let Err(e) =
            self.collaborators
                .store
                .complete_session(&summary.session_id, summary.ended_at, &payload)
        {
            tracing::warn!(session_id = %summary.session_id, error = %e, "could not persist summary");
        }
        Ok(payload)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
