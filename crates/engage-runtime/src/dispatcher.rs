//! Top-level command loop.
//!
//! The [`CommandDispatcher`] owns the configuration store, the shared
//! [`SessionManager`] and at most one tick-loop worker. Commands arrive on a
//! single `mpsc` queue fed by any number of sources (console, remote inbox).
//! A [`ShutdownFlag`] raised by a signal is observed on the next poll.
//!
//! Whatever way the loop exits, resources are released in the same order:
//! drain the active session, stop the camera, close the store.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use engage_core::config::ConfigStore;
use engage_core::error::{EngageError, Result};
use engage_core::models::Session;
use engage_core::payloads::SummaryPayload;
use engage_core::time_utils::format_duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::orchestrator::{Collaborators, TickLoop};
use crate::session_manager::SessionManager;
use crate::signals::ShutdownFlag;

/// How long `end` waits for the worker to drain.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);
/// How often the loop checks the shutdown flag while idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

// ── Commands ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    End,
    Quit,
    /// Anything else; answered with a usage hint.
    Unknown(String),
}

impl Command {
    /// Parse one line of console input.
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "s" | "start" => Self::Start,
            "e" | "end" => Self::End,
            "q" | "quit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// A queued command, optionally waiting to hear how it was handled.
#[derive(Debug)]
pub struct Request {
    pub command: Command,
    pub ack: Option<oneshot::Sender<Vec<Reply>>>,
}

impl Request {
    /// A request whose replies are sent back once it has been applied. The
    /// receiver errors if the dispatcher stops before reaching it.
    pub fn acknowledged(command: Command) -> (Self, oneshot::Receiver<Vec<Reply>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                command,
                ack: Some(tx),
            },
            rx,
        )
    }
}

impl From<Command> for Request {
    fn from(command: Command) -> Self {
        Self { command, ack: None }
    }
}

// ── Replies ───────────────────────────────────────────────────────────────────

/// User-facing outcome of a command.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Started(Session),
    /// The weights file was rejected; the last valid configuration is in use.
    ConfigWarnings(Vec<String>),
    AlreadyRunning,
    StartFailed(String),
    Ended(SummaryPayload),
    /// The worker stopped on a fatal error. `summary` is whatever the drain
    /// path could compute.
    SessionFailed {
        summary: Option<SummaryPayload>,
        error: String,
    },
    NotRunning,
    /// Cancellation was requested but the worker did not finish in time.
    EndTimedOut {
        session_id: String,
    },
    ShuttingDown,
    Usage,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Started(session) => write!(f, "Session {} started", session.id),
            Reply::ConfigWarnings(errors) => write!(
                f,
                "Config invalid, keeping last valid config: {}",
                errors.join("; ")
            ),
            Reply::AlreadyRunning => write!(f, "A session is already running"),
            Reply::StartFailed(msg) => write!(f, "Could not start session: {msg}"),
            Reply::Ended(summary) => write!(
                f,
                "Session {} ended: {} ticks, average {:.2}, {}",
                summary.session_id,
                summary.tick_count,
                summary.average_engagement,
                format_duration(summary.duration_seconds)
            ),
            Reply::SessionFailed {
                summary: Some(summary),
                error,
            } => write!(
                f,
                "Session {} failed after {} ticks (average {:.2}): {error}",
                summary.session_id, summary.tick_count, summary.average_engagement
            ),
            Reply::SessionFailed {
                summary: None,
                error,
            } => write!(f, "Session failed: {error}"),
            Reply::NotRunning => write!(f, "No session is running"),
            Reply::EndTimedOut { session_id } => {
                write!(f, "Session {session_id} is still stopping")
            }
            Reply::ShuttingDown => write!(f, "Shutting down"),
            Reply::Usage => write!(f, "Commands: 's' = start, 'e' = end, 'q' = quit"),
        }
    }
}

// ── CommandDispatcher ─────────────────────────────────────────────────────────

struct Worker {
    session_id: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<SummaryPayload>>,
}

pub struct CommandDispatcher {
    device_id: String,
    user_id: Option<String>,
    config: ConfigStore,
    sessions: Arc<Mutex<SessionManager>>,
    collaborators: Collaborators,
    worker: Option<Worker>,
    shutdown: ShutdownFlag,
    released: bool,
    join_timeout: Duration,
    poll_interval: Duration,
}

impl CommandDispatcher {
    pub fn new(
        device_id: impl Into<String>,
        user_id: Option<String>,
        config: ConfigStore,
        collaborators: Collaborators,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            user_id,
            config,
            sessions: Arc::new(Mutex::new(SessionManager::new())),
            collaborators,
            worker: None,
            shutdown,
            released: false,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Whether a worker exists that has not finished yet.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_set()
    }

    /// Snapshot of the active session, if any.
    pub async fn active_session(&self) -> Option<Session> {
        self.sessions.lock().await.active_session()
    }

    /// Read commands until `quit`, a raised shutdown flag, or every sender
    /// hanging up. Releases all resources before returning.
    pub async fn run<F>(&mut self, mut commands: mpsc::Receiver<Request>, mut report: F)
    where
        F: FnMut(&Reply),
    {
        while !self.shutdown.is_set() {
            if let Some(reply) = self.reap_finished().await {
                report(&reply);
            }

            match time::timeout(self.poll_interval, commands.recv()).await {
                Err(_) => {}
                Ok(Some(Request { command, ack })) => {
                    let replies = self.handle(command).await;
                    for reply in &replies {
                        report(reply);
                    }
                    if let Some(ack) = ack {
                        let _ = ack.send(replies);
                    }
                }
                Ok(None) => {
                    tracing::info!("all command sources closed");
                    break;
                }
            }
        }

        for reply in self.shutdown().await {
            report(&reply);
        }
    }

    /// Apply one command.
    pub async fn handle(&mut self, command: Command) -> Vec<Reply> {
        if self.shutdown.is_set() {
            tracing::debug!(?command, "ignoring command during shutdown");
            return vec![Reply::ShuttingDown];
        }

        let mut replies: Vec<Reply> = self.reap_finished().await.into_iter().collect();
        match command {
            Command::Start => replies.extend(self.start_session().await),
            Command::End => replies.push(self.end_session().await),
            Command::Quit => replies.extend(self.quit().await),
            Command::Unknown(input) => {
                tracing::debug!(%input, "unrecognised command");
                replies.push(Reply::Usage);
            }
        }
        replies
    }

    /// Collect a worker that stopped on its own, e.g. after a capture failure.
    pub async fn reap_finished(&mut self) -> Option<Reply> {
        if !self.worker.as_ref()?.handle.is_finished() {
            return None;
        }
        let worker = self.worker.take()?;
        let joined = worker.handle.await;
        Some(self.settle(joined).await)
    }

    /// Drain the worker, stop the camera, close the store. Runs once.
    pub async fn shutdown(&mut self) -> Vec<Reply> {
        if self.released {
            return Vec::new();
        }
        self.shutdown.set();

        let mut replies = Vec::new();
        if self.worker.is_some() {
            replies.push(self.end_session().await);
        }
        self.collaborators.camera.stop();
        if let Err(e) = self.collaborators.store.close() {
            tracing::warn!(error = %e, "store close failed");
        }
        self.released = true;
        tracing::info!("resources released");
        replies
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn start_session(&mut self) -> Vec<Reply> {
        if self.worker.is_some() {
            tracing::warn!("start ignored; a session is already running");
            return vec![Reply::AlreadyRunning];
        }

        let mut replies = Vec::new();
        let (config, errors) = self.config.reload();
        if !errors.is_empty() {
            replies.push(Reply::ConfigWarnings(errors));
        }

        if let Err(e) = self.collaborators.camera.start() {
            tracing::error!(error = %e, "camera failed to start");
            replies.push(Reply::StartFailed(e.to_string()));
            return replies;
        }

        let started = self
            .sessions
            .lock()
            .await
            .start(&self.device_id, self.user_id.as_deref());
        let session = match started {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "session start refused");
                replies.push(Reply::StartFailed(e.to_string()));
                return replies;
            }
        };

        let cancel = CancellationToken::new();
        let handle = TickLoop::new(
            Arc::clone(&self.sessions),
            config,
            self.collaborators.clone(),
            cancel.clone(),
        )
        .spawn();
        self.worker = Some(Worker {
            session_id: session.id.clone(),
            cancel,
            handle,
        });

        replies.push(Reply::Started(session));
        replies
    }

    async fn end_session(&mut self) -> Reply {
        let Some(worker) = self.worker.as_mut() else {
            tracing::warn!("end ignored; no session is running");
            return Reply::NotRunning;
        };
        let session_id = worker.session_id.clone();
        worker.cancel.cancel();

        let joined = time::timeout(self.join_timeout, &mut worker.handle).await;
        match joined {
            Ok(joined) => {
                self.worker = None;
                self.settle(joined).await
            }
            Err(_) => {
                tracing::warn!(
                    %session_id,
                    timeout_secs = self.join_timeout.as_secs_f64(),
                    "worker did not stop in time; it will be reaped when it finishes"
                );
                Reply::EndTimedOut { session_id }
            }
        }
    }

    async fn quit(&mut self) -> Vec<Reply> {
        let mut replies = Vec::new();
        if self.worker.is_some() {
            replies.push(self.end_session().await);
        }
        self.shutdown.set();
        replies.push(Reply::ShuttingDown);
        replies
    }

    /// Turn a joined worker into a reply, closing the session if the worker
    /// could not.
    async fn settle(
        &self,
        joined: std::result::Result<Result<SummaryPayload>, JoinError>,
    ) -> Reply {
        match joined {
            Ok(Ok(summary)) => Reply::Ended(summary),
            Ok(Err(EngageError::SessionAborted { summary, source })) => Reply::SessionFailed {
                summary: Some(*summary),
                error: source.to_string(),
            },
            Ok(Err(e)) => {
                tracing::error!(error = %e, "worker failed");
                Reply::SessionFailed {
                    summary: self.force_close().await,
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "worker crashed");
                Reply::SessionFailed {
                    summary: self.force_close().await,
                    error: format!("tick loop crashed: {e}"),
                }
            }
        }
    }

    async fn force_close(&self) -> Option<SummaryPayload> {
        let summary = self.sessions.lock().await.end().ok()?;
        let payload = SummaryPayload::from(&summary);
        if let Err(e) =
            self.collaborators
                .store
                .complete_session(&summary.session_id, summary.ended_at, &payload)
        {
            tracing::warn!(session_id = %summary.session_id, error = %e, "could not persist summary");
        }
        Some(payload)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use engage_core::config::MonitorConfig;
    use engage_core::models::Observation;
    use tempfile::TempDir;

    fn fast_config(tmp: &TempDir) -> ConfigStore {
        let path = tmp.path().join("weights.json");
        let config = MonitorConfig {
            tick_interval_seconds: 0.01,
            ..MonitorConfig::default()
        };
        std::fs::write(&path, serde_json::to_string(&config.to_value()).unwrap()).unwrap();
        ConfigStore::load(path)
    }

    fn dispatcher(tmp: &TempDir, f: &Fakes) -> CommandDispatcher {
        CommandDispatcher::new(
            "dev-1",
            Some("instructor-7".into()),
            fast_config(tmp),
            f.collaborators.clone(),
            ShutdownFlag::new(),
        )
        .with_join_timeout(Duration::from_secs(2))
        .with_poll_interval(Duration::from_millis(10))
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn attentive() -> Vec<Vec<Observation>> {
        vec![vec![Observation::new("raising_hand", 0.9)]]
    }

    #[test]
    fn test_parse_console_commands() {
        assert_eq!(Command::parse("s"), Command::Start);
        assert_eq!(Command::parse(" START \n"), Command::Start);
        assert_eq!(Command::parse("e"), Command::End);
        assert_eq!(Command::parse("Quit"), Command::Quit);
        assert_eq!(Command::parse("x"), Command::Unknown("x".into()));
    }

    #[tokio::test]
    async fn test_start_then_end() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);

        let replies = d.handle(Command::Start).await;
        let [Reply::Started(session)] = replies.as_slice() else {
            panic!("unexpected replies {replies:?}");
        };
        assert_eq!(session.user_id.as_deref(), Some("instructor-7"));
        assert!(d.is_running());

        let indicator = f.indicator.clone();
        wait_until(|| indicator.shown.lock().unwrap().len() >= 2).await;

        let replies = d.handle(Command::End).await;
        let [Reply::Ended(summary)] = replies.as_slice() else {
            panic!("unexpected replies {replies:?}");
        };
        assert_eq!(summary.session_id, session.id);
        assert!(summary.tick_count >= 2);
        assert_eq!(summary.average_engagement, 100.0);
        assert!(!d.is_running());
        assert!(d.active_session().await.is_none());
        assert_eq!(f.store.completed().len(), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_refused() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);

        d.handle(Command::Start).await;
        let first = d.active_session().await.unwrap();

        assert_eq!(d.handle(Command::Start).await, vec![Reply::AlreadyRunning]);
        assert_eq!(d.active_session().await.unwrap().id, first.id);

        d.handle(Command::End).await;
    }

    #[tokio::test]
    async fn test_end_without_session() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);
        assert_eq!(d.handle(Command::End).await, vec![Reply::NotRunning]);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_usage() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);
        assert_eq!(
            d.handle(Command::Unknown("dance".into())).await,
            vec![Reply::Usage]
        );
        assert!(!d.is_shutting_down());
    }

    #[tokio::test]
    async fn test_quit_drains_then_refuses_commands() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);
        d.handle(Command::Start).await;

        let replies = d.handle(Command::Quit).await;
        assert!(matches!(replies[0], Reply::Ended(_)));
        assert_eq!(replies[1], Reply::ShuttingDown);
        assert!(d.is_shutting_down());
        assert!(d.active_session().await.is_none());

        assert_eq!(d.handle(Command::Start).await, vec![Reply::ShuttingDown]);
    }

    #[tokio::test]
    async fn test_worker_failure_is_reaped_and_restart_allowed() {
        let tmp = TempDir::new().unwrap();
        let log = EventLog::default();
        let f = fakes_with(
            FakeCamera::failing_after(log.clone(), 1),
            ScriptedClassifier::new(attentive()),
            RecordingStore::new(log.clone()),
            log,
        );
        let mut d = dispatcher(&tmp, &f);
        d.handle(Command::Start).await;

        for _ in 0..400 {
            if !d.is_running() {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }

        match d.reap_finished().await {
            Some(Reply::SessionFailed {
                summary: Some(summary),
                error,
            }) => {
                assert_eq!(summary.tick_count, 1);
                assert!(error.contains("sensor disconnected"));
            }
            other => panic!("expected SessionFailed, got {other:?}"),
        }
        assert!(d.active_session().await.is_none());
        assert!(d.reap_finished().await.is_none());

        let replies = d.handle(Command::Start).await;
        assert!(matches!(replies.as_slice(), [Reply::Started(_)]));
        d.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_warns_and_uses_last_valid() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);
        std::fs::write(tmp.path().join("weights.json"), r#"{"raising_hand": "lots"}"#).unwrap();

        let replies = d.handle(Command::Start).await;
        assert!(matches!(&replies[0], Reply::ConfigWarnings(errors) if !errors.is_empty()));
        assert!(matches!(replies[1], Reply::Started(_)));

        let indicator = f.indicator.clone();
        wait_until(|| !indicator.shown.lock().unwrap().is_empty()).await;
        d.handle(Command::End).await;
    }

    #[tokio::test]
    async fn test_run_quit_releases_in_order() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);

        let (tx, rx) = mpsc::channel(8);
        tx.send(Command::Start.into()).await.unwrap();
        tx.send(Command::Quit.into()).await.unwrap();

        let mut replies = Vec::new();
        d.run(rx, |r| replies.push(r.clone())).await;

        assert!(matches!(replies[0], Reply::Started(_)));
        assert!(matches!(replies[1], Reply::Ended(_)));
        assert_eq!(replies[2], Reply::ShuttingDown);

        let log = events(&f.log);
        let tail = &log[log.len() - 3..];
        assert!(tail[0].starts_with("store.complete"));
        assert_eq!(tail[1], "camera.stop");
        assert_eq!(tail[2], "store.close");
    }

    #[tokio::test]
    async fn test_shutdown_flag_drains_running_session() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let flag = ShutdownFlag::new();
        let mut d = CommandDispatcher::new(
            "dev-1",
            None,
            fast_config(&tmp),
            f.collaborators.clone(),
            flag.clone(),
        )
        .with_poll_interval(Duration::from_millis(10));

        let (tx, rx) = mpsc::channel(8);
        tx.send(Command::Start.into()).await.unwrap();
        let indicator = f.indicator.clone();
        tokio::spawn(async move {
            wait_until(|| !indicator.shown.lock().unwrap().is_empty()).await;
            flag.set();
        });

        let mut replies = Vec::new();
        time::timeout(Duration::from_secs(5), d.run(rx, |r| replies.push(r.clone())))
            .await
            .expect("dispatcher should exit after the flag is raised");
        drop(tx);

        assert!(matches!(replies.last(), Some(Reply::Ended(_))));
        let log = events(&f.log);
        assert_eq!(&log[log.len() - 2..], ["camera.stop", "store.close"]);
        assert_eq!(f.store.completed().len(), 1);
    }

    #[tokio::test]
    async fn test_run_acknowledges_with_replies() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);

        let (tx, rx) = mpsc::channel(8);
        let (end, end_ack) = Request::acknowledged(Command::End);
        let (quit, quit_ack) = Request::acknowledged(Command::Quit);
        let (late, late_ack) = Request::acknowledged(Command::Start);
        tx.send(end).await.unwrap();
        tx.send(quit).await.unwrap();
        tx.send(late).await.unwrap();
        d.run(rx, |_| {}).await;

        assert_eq!(end_ack.await.unwrap(), vec![Reply::NotRunning]);
        assert!(quit_ack.await.unwrap().contains(&Reply::ShuttingDown));
        assert!(late_ack.await.is_err());
        assert_eq!(f.camera.captures(), 0);
    }

    #[tokio::test]
    async fn test_closed_queue_is_treated_as_quit() {
        let tmp = TempDir::new().unwrap();
        let f = fakes(attentive());
        let mut d = dispatcher(&tmp, &f);

        let (tx, rx) = mpsc::channel::<Request>(1);
        drop(tx);
        d.run(rx, |_| {}).await;

        assert_eq!(events(&f.log), vec!["camera.stop", "store.close"]);
        assert!(d.shutdown().await.is_empty());
    }
}
