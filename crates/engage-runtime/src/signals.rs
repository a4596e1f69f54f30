//! Process-signal handling.
//!
//! Signals only flip a [`ShutdownFlag`]; the dispatcher notices the flag on
//! its next poll and performs the actual drain and release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

/// Shared "please shut down" flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Returns `true` if it was already raised.
    pub fn set(&self) -> bool {
        self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Raise `flag` on SIGINT or SIGTERM.
///
/// Repeated signals while a shutdown is already under way are logged and
/// otherwise ignored.
pub fn install_signal_handlers(flag: ShutdownFlag) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let name = wait_for_signal().await;
            if flag.set() {
                tracing::warn!(signal = name, "shutdown already in progress");
            } else {
                tracing::info!(signal = name, "shutdown requested");
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = term.recv() => "SIGTERM",
        },
        Err(e) => {
            tracing::warn!(error = %e, "SIGTERM handler unavailable; listening for Ctrl+C only");
            ctrl_c_only().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c_only().await
}

async fn ctrl_c_only() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        assert!(!other.is_set());

        assert!(!flag.set());
        assert!(other.is_set());
        assert!(other.set());
    }
}
