use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};

/// Device id used when neither `--device-id`, `DEVICE_ID` nor `HOSTNAME` is set.
pub const FALLBACK_DEVICE_ID: &str = "engage-device";

/// Bounds for `--command-poll-seconds`.
pub const MIN_COMMAND_POLL_SECONDS: f64 = 0.1;
pub const MAX_COMMAND_POLL_SECONDS: f64 = 3600.0;

/// Root of the per-user state directory, `~/.engage-monitor/`.
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".engage-monitor")
}

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Live group engagement monitor
#[derive(Parser, Debug, Clone)]
#[command(
    name = "engage-monitor",
    about = "Live group engagement monitor",
    version
)]
pub struct Settings {
    /// Device identifier (defaults to the host name)
    #[arg(long, env = "DEVICE_ID")]
    pub device_id: Option<String>,

    /// User the sessions are attributed to
    #[arg(long, env = "ENGAGE_USER_ID")]
    pub user_id: Option<String>,

    /// Behaviour weights file
    #[arg(long, env = "ENGAGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Root directory of the session store
    #[arg(long, env = "ENGAGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Accept commands typed on stdin
    #[arg(
        long,
        env = "ENABLE_STDIN_COMMANDS",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub stdin_commands: bool,

    /// Poll the remote command inbox
    #[arg(
        long,
        env = "ENABLE_REMOTE_COMMANDS",
        default_value = "false",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub remote_commands: bool,

    /// Remote command inbox directory (defaults to <data-dir>/commands)
    #[arg(long)]
    pub command_dir: Option<PathBuf>,

    /// Seconds between remote inbox polls
    #[arg(long, default_value = "2.0", value_parser = parse_poll_seconds)]
    pub command_poll_seconds: f64,

    /// Probability that a simulated subject shows an engaged behaviour (0-1)
    #[arg(long, default_value = "0.6", value_parser = parse_finite)]
    pub engagement_bias: f64,

    /// Seed for the simulated classifier
    #[arg(long)]
    pub seed: Option<u64>,

    /// Timezone for console timestamps (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,
}

impl Settings {
    /// Parse the process arguments and resolve derived defaults.
    pub fn load() -> Self {
        Self::parse().resolve()
    }

    /// Same as [`Settings::load`] with an explicit argument list.
    pub fn load_from_args<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Self::parse_from(args).resolve()
    }

    /// Fill every optional path and id, and apply `--debug`.
    pub fn resolve(mut self) -> Self {
        if self.device_id.is_none() {
            self.device_id = Some(
                std::env::var("HOSTNAME")
                    .ok()
                    .filter(|h| !h.trim().is_empty())
                    .unwrap_or_else(|| FALLBACK_DEVICE_ID.to_string()),
            );
        }
        if self.config.is_none() {
            self.config = Some(app_dir().join("weights.json"));
        }
        if self.data_dir.is_none() {
            self.data_dir = Some(app_dir().join("data"));
        }
        if self.command_dir.is_none() {
            self.command_dir = Some(self.data_dir().join("commands"));
        }
        if !self.engagement_bias.is_finite() {
            self.engagement_bias = 0.6;
        }
        self.engagement_bias = self.engagement_bias.clamp(0.0, 1.0);
        if !self.command_poll_seconds.is_finite() {
            self.command_poll_seconds = 2.0;
        }
        self.command_poll_seconds = self
            .command_poll_seconds
            .clamp(MIN_COMMAND_POLL_SECONDS, MAX_COMMAND_POLL_SECONDS);
        if self.debug {
            self.log_level = "DEBUG".to_string();
        }
        self
    }

    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or(FALLBACK_DEVICE_ID)
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| app_dir().join("weights.json"))
    }

    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or(Path::new("data"))
    }

    pub fn command_dir(&self) -> PathBuf {
        self.command_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("commands"))
    }
}

fn parse_finite(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.trim().parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("{raw} is not a finite number"))
    }
}

fn parse_poll_seconds(raw: &str) -> Result<f64, String> {
    let value = parse_finite(raw)?;
    if (MIN_COMMAND_POLL_SECONDS..=MAX_COMMAND_POLL_SECONDS).contains(&value) {
        Ok(value)
    } else {
        Err(format!(
            "{value} is outside [{MIN_COMMAND_POLL_SECONDS}, {MAX_COMMAND_POLL_SECONDS}]"
        ))
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
