mod bootstrap;
mod console;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use engage_core::collaborators::FrameSource;
use engage_core::config::ConfigStore;
use engage_core::settings::Settings;
use engage_core::time_utils::resolve_timezone;
use engage_data::inbox::CommandInbox;
use engage_data::store::JsonlSessionStore;
use engage_runtime::dispatcher::CommandDispatcher;
use engage_runtime::orchestrator::Collaborators;
use engage_runtime::remote::spawn_inbox_poller;
use engage_runtime::signals::{install_signal_handlers, ShutdownFlag};
use engage_runtime::simulated::{SimulatedCamera, SimulatedClassifier};
use engage_ui::TerminalIndicator;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();

    bootstrap::ensure_directories(settings.data_dir())?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::info!("Engagement Monitor v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(device_id = settings.device_id(), "device");

    let config_path = settings.config_path();
    if ConfigStore::write_default_if_missing(&config_path)? {
        tracing::info!(path = %config_path.display(), "wrote default weights file");
    }
    let config = ConfigStore::load(&config_path);
    let tz = resolve_timezone(&settings.timezone);

    // ── Collaborators ─────────────────────────────────────────────────────────
    let camera = Arc::new(SimulatedCamera::default());
    camera.start()?;
    let classifier = Arc::new(SimulatedClassifier::new(settings.engagement_bias, settings.seed));
    classifier.load();
    let store = Arc::new(JsonlSessionStore::open(settings.data_dir())?);
    let indicator = Arc::new(TerminalIndicator::stdout());

    let collaborators = Collaborators {
        camera,
        classifier,
        store,
        indicator: indicator.clone(),
    };

    // ── Command sources ───────────────────────────────────────────────────────
    let shutdown = ShutdownFlag::new();
    install_signal_handlers(shutdown.clone());

    let (tx, rx) = mpsc::channel(16);
    let sources = CancellationToken::new();

    if settings.stdin_commands {
        console::spawn_stdin_reader(tx.clone())?;
    }
    let mut remote_dir = None;
    if settings.remote_commands {
        let inbox = CommandInbox::open(settings.command_dir())?;
        remote_dir = Some(inbox.dir().display().to_string());
        let poll = Duration::from_secs_f64(settings.command_poll_seconds.max(0.1));
        spawn_inbox_poller(inbox, tx.clone(), poll, sources.clone());
    }
    if !settings.stdin_commands && !settings.remote_commands {
        tracing::warn!("no command source enabled; nothing to do");
    }
    drop(tx);

    println!("{}", console::banner(&settings, remote_dir.as_deref()));

    // ── Dispatch ──────────────────────────────────────────────────────────────
    let mut dispatcher = CommandDispatcher::new(
        settings.device_id(),
        settings.user_id.clone(),
        config,
        collaborators,
        shutdown,
    );

    dispatcher
        .run(rx, |reply| {
            if console::ends_indicator_line(reply) {
                indicator.finish_line();
            }
            println!("{}", console::render_reply(reply, tz));
        })
        .await;

    sources.cancel();
    tracing::info!("Engagement Monitor stopped");
    Ok(())
}
