use std::io::BufRead;

use chrono_tz::Tz;
use engage_core::settings::Settings;
use engage_core::time_utils::{format_duration, format_local_time};
use engage_runtime::dispatcher::{Command, Reply, Request};
use tokio::sync::mpsc;

// ── Command source ─────────────────────────────────────────────────────────────

/// Forward stdin lines as commands from a plain OS thread.
///
/// A blocked stdin read cannot be cancelled, so this stays off the tokio
/// blocking pool. End of input is treated as `quit`.
pub fn spawn_stdin_reader(commands: mpsc::Sender<Request>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin-commands".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                if commands.blocking_send(Command::parse(&line).into()).is_err() {
                    return;
                }
            }
            tracing::debug!("stdin closed");
            let _ = commands.blocking_send(Command::Quit.into());
        })?;
    Ok(())
}

// ── Output ─────────────────────────────────────────────────────────────────────

pub fn banner(settings: &Settings, remote_dir: Option<&str>) -> String {
    let mut lines = vec![
        format!("Engagement Monitor v{}", env!("CARGO_PKG_VERSION")),
        format!("  Device: {}", settings.device_id()),
        format!("  Config: {}", settings.config_path().display()),
        format!("  Store:  {}", settings.data_dir().display()),
    ];
    if let Some(dir) = remote_dir {
        lines.push(format!("  Remote: {dir}"));
    }
    if settings.stdin_commands {
        lines.push(Reply::Usage.to_string());
    }
    lines.join("\n")
}

/// Console text for a dispatcher reply, with times in `tz`.
pub fn render_reply(reply: &Reply, tz: Tz) -> String {
    match reply {
        Reply::Started(session) => format!(
            "[SESSION STARTED] {} at {}",
            session.id,
            format_local_time(session.started_at, tz)
        ),
        Reply::Ended(summary) => format!(
            "[SESSION ENDED] {}\n  {} - {} | Duration: {} | Ticks: {}\n  Average Engagement: {:.1}/100",
            summary.session_id,
            format_local_time(summary.started_at, tz),
            format_local_time(summary.ended_at, tz),
            format_duration(summary.duration_seconds),
            summary.tick_count,
            summary.average_engagement
        ),
        Reply::SessionFailed {
            summary: Some(summary),
            error,
        } => format!(
            "[SESSION FAILED] {}: {error}\n  Ticks: {} | Average Engagement: {:.1}/100",
            summary.session_id, summary.tick_count, summary.average_engagement
        ),
        Reply::ConfigWarnings(errors) => {
            let mut out = String::from("[CONFIG] Invalid weights file, keeping last valid config:");
            for err in errors {
                out.push_str("\n  - ");
                out.push_str(err);
            }
            out
        }
        other => other.to_string(),
    }
}

/// Whether the indicator line should be closed before printing `reply`.
pub fn ends_indicator_line(reply: &Reply) -> bool {
    matches!(
        reply,
        Reply::Ended(_) | Reply::SessionFailed { .. } | Reply::EndTimedOut { .. }
    )
}
