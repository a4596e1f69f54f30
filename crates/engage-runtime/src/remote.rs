//! Remote command intake.
//!
//! Polls the [`CommandInbox`] and forwards recognised commands into the same
//! queue the console feeds. Unrecognised types are rejected in the inbox
//! and never reach the dispatcher. A forwarded command is only marked once
//! the dispatcher has applied it.

use std::time::Duration;

use engage_core::error::Result;
use engage_data::inbox::{CommandInbox, CommandStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::{Command, Reply, Request};

const SHUTTING_DOWN: &str = "monitor shutting down";

/// Map a remote command type onto a dispatcher command.
pub fn remote_command(kind: &str) -> Option<Command> {
    match kind.trim().to_ascii_lowercase().as_str() {
        "start" | "start_session" => Some(Command::Start),
        "end" | "stop" | "end_session" => Some(Command::End),
        "shutdown" | "quit" => Some(Command::Quit),
        _ => None,
    }
}

/// Poll `inbox` every `poll_interval` until `cancel` fires or the command
/// queue closes.
pub fn spawn_inbox_poller(
    inbox: CommandInbox,
    commands: mpsc::Sender<Request>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(dir = %inbox.dir().display(), "remote command polling enabled");
        loop {
            match forward_pending(&inbox, &commands).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!("command queue closed; stopping inbox poller");
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "inbox poll failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(poll_interval) => {}
            }
        }
    })
}

/// Drain every pending command, waiting for each to be applied. Returns
/// `false` once the dispatcher is gone.
pub async fn forward_pending(inbox: &CommandInbox, commands: &mpsc::Sender<Request>) -> Result<bool> {
    while let Some((id, doc)) = inbox.fetch_pending()? {
        let Some(command) = remote_command(&doc.kind) else {
            let reason = format!("Unknown command type: {}", doc.kind);
            tracing::warn!(command_id = %id, "{reason}");
            inbox.mark(&id, CommandStatus::Rejected, Some(&reason))?;
            continue;
        };

        tracing::info!(command_id = %id, ?command, "remote command received");
        let is_quit = command == Command::Quit;
        let (request, ack) = Request::acknowledged(command);
        if commands.send(request).await.is_err() {
            inbox.mark(&id, CommandStatus::Rejected, Some(SHUTTING_DOWN))?;
            return Ok(false);
        }
        match ack.await {
            Ok(replies) if !is_quit && replies.contains(&Reply::ShuttingDown) => {
                inbox.mark(&id, CommandStatus::Rejected, Some(SHUTTING_DOWN))?;
            }
            Ok(_) => inbox.mark(&id, CommandStatus::Processed, None)?,
            Err(_) => {
                inbox.mark(&id, CommandStatus::Rejected, Some(SHUTTING_DOWN))?;
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Stand-in dispatcher: records each command and answers with `reply`.
    fn answer_with(
        mut rx: mpsc::Receiver<Request>,
        reply: fn(&Command) -> Vec<Reply>,
    ) -> JoinHandle<Vec<Command>> {
        tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(Request { command, ack }) = rx.recv().await {
                if let Some(ack) = ack {
                    let _ = ack.send(reply(&command));
                }
                seen.push(command);
            }
            seen
        })
    }

    #[test]
    fn test_remote_command_types() {
        assert_eq!(remote_command("start"), Some(Command::Start));
        assert_eq!(remote_command("start_session"), Some(Command::Start));
        assert_eq!(remote_command("STOP"), Some(Command::End));
        assert_eq!(remote_command("end_session"), Some(Command::End));
        assert_eq!(remote_command("shutdown"), Some(Command::Quit));
        assert_eq!(remote_command("dance"), None);
        assert_eq!(remote_command("s"), None);
    }

    #[tokio::test]
    async fn test_forward_pending_in_order_and_rejects_unknown() {
        let tmp = TempDir::new().unwrap();
        let inbox = CommandInbox::open(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("001.json"), r#"{"type":"start"}"#).unwrap();
        std::fs::write(tmp.path().join("002.json"), r#"{"type":"dance"}"#).unwrap();
        std::fs::write(tmp.path().join("003.json"), r#"{"type":"end_session"}"#).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = answer_with(rx, |_| vec![Reply::NotRunning]);
        assert!(forward_pending(&inbox, &tx).await.unwrap());
        drop(tx);

        assert_eq!(dispatcher.await.unwrap(), vec![Command::Start, Command::End]);

        assert_eq!(inbox.get("001").unwrap().status, CommandStatus::Processed);
        let rejected = inbox.get("002").unwrap();
        assert_eq!(rejected.status, CommandStatus::Rejected);
        assert_eq!(rejected.reason.as_deref(), Some("Unknown command type: dance"));
        assert!(inbox.fetch_pending().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_queue_stops_forwarding() {
        let tmp = TempDir::new().unwrap();
        let inbox = CommandInbox::open(tmp.path()).unwrap();
        inbox.submit("quit").unwrap();

        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        assert!(!forward_pending(&inbox, &tx).await.unwrap());
    }

    #[tokio::test]
    async fn test_command_refused_during_shutdown_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let inbox = CommandInbox::open(tmp.path()).unwrap();
        let start = inbox.submit("start").unwrap();
        let quit = inbox.submit("shutdown").unwrap();

        let (tx, rx) = mpsc::channel(8);
        let dispatcher = answer_with(rx, |_| vec![Reply::ShuttingDown]);
        assert!(forward_pending(&inbox, &tx).await.unwrap());
        drop(tx);
        dispatcher.await.unwrap();

        let refused = inbox.get(&start).unwrap();
        assert_eq!(refused.status, CommandStatus::Rejected);
        assert_eq!(refused.reason.as_deref(), Some("monitor shutting down"));
        assert_eq!(inbox.get(&quit).unwrap().status, CommandStatus::Processed);
    }

    #[tokio::test]
    async fn test_unanswered_command_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let inbox = CommandInbox::open(tmp.path()).unwrap();
        let id = inbox.submit("start").unwrap();

        let (tx, mut rx) = mpsc::channel::<Request>(1);
        let dropper = tokio::spawn(async move {
            // Dequeued but never applied, as when the dispatcher exits.
            drop(rx.recv().await);
        });
        assert!(!forward_pending(&inbox, &tx).await.unwrap());
        dropper.await.unwrap();

        assert_eq!(inbox.get(&id).unwrap().status, CommandStatus::Rejected);
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancel() {
        let tmp = TempDir::new().unwrap();
        let inbox = CommandInbox::open(tmp.path()).unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let handle = spawn_inbox_poller(inbox.clone(), tx, Duration::from_millis(10), cancel.clone());
        inbox.submit("start").unwrap();
        let received = time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.command, Command::Start);
        received.ack.unwrap().send(vec![Reply::NotRunning]).unwrap();

        cancel.cancel();
        time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
