//! Weight configuration loading and validation.
//!
//! The weights file is a flat JSON object: one integer weight per behaviour
//! label plus a few scoring knobs. [`ConfigStore`] owns the last
//! configuration that validated, and falls back to it whenever a reload
//! fails, so a bad edit on disk never reaches the tick loop.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{EngageError, Result};
use crate::models::{BehaviorWeightConfig, BEHAVIOR_KEYS};

pub const DEFAULT_TICK_INTERVAL_SECONDS: f64 = 0.5;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

/// Longest accepted tick interval (one day).
pub const MAX_TICK_INTERVAL_SECONDS: f64 = 86_400.0;

const MIN_WEIGHT: i64 = 0;
const MAX_WEIGHT: i64 = 100;

const KEY_THRESHOLD: &str = "confidenceThreshold";
const KEY_INTERVAL: &str = "tickIntervalSeconds";
const KEY_USE_CONFIDENCE: &str = "useConfidenceInScoring";
const KEY_STRENGTH: &str = "confidenceImpactStrength";
const KEY_SCHEMA_VERSION: &str = "schemaVersion";

// ── MonitorConfig ─────────────────────────────────────────────────────────────

/// Everything a session needs from the weights file.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub weights: BehaviorWeightConfig,
    /// Target seconds between ticks, in `[0, MAX_TICK_INTERVAL_SECONDS]`.
    pub tick_interval_seconds: f64,
    /// Minimum classifier confidence for an observation, in `[0, 1]`.
    pub confidence_threshold: f64,
}

impl MonitorConfig {
    /// Tick interval as a [`Duration`].
    pub fn tick_interval(&self) -> Duration {
        let secs = self.tick_interval_seconds.max(0.0);
        Duration::try_from_secs_f64(secs.min(MAX_TICK_INTERVAL_SECONDS))
            .unwrap_or(Duration::from_secs_f64(DEFAULT_TICK_INTERVAL_SECONDS))
    }

    /// Parse and validate a weights document.
    ///
    /// Returns every problem found as `"<path>: <message>"` rather than
    /// stopping at the first one.
    pub fn from_value(value: &Value) -> std::result::Result<Self, Vec<String>> {
        let Some(obj) = value.as_object() else {
            return Err(vec!["(root): config must be a JSON object".to_string()]);
        };

        let mut errors = Vec::new();
        let mut config = MonitorConfig::default();
        config.weights.weights.clear();

        for key in BEHAVIOR_KEYS {
            if !obj.contains_key(key) {
                errors.push(format!("(root): '{key}' is a required property"));
            }
        }

        for (key, v) in obj {
            match key.as_str() {
                KEY_THRESHOLD => match v.as_f64() {
                    Some(t) if (0.0..=1.0).contains(&t) => config.confidence_threshold = t,
                    Some(t) => errors.push(format!("{key}: {t} is outside [0, 1]")),
                    None => errors.push(format!("{key}: must be a number")),
                },
                KEY_INTERVAL => match v.as_f64() {
                    Some(i) if i < 0.0 => {
                        errors.push(format!("{key}: {i} is less than the minimum of 0"))
                    }
                    Some(i) if !i.is_finite() || i > MAX_TICK_INTERVAL_SECONDS => errors.push(
                        format!("{key}: {i} is greater than the maximum of {MAX_TICK_INTERVAL_SECONDS}"),
                    ),
                    Some(i) => config.tick_interval_seconds = i,
                    None => errors.push(format!("{key}: must be a number")),
                },
                KEY_USE_CONFIDENCE => match v.as_bool() {
                    Some(b) => config.weights.use_confidence = b,
                    None => errors.push(format!("{key}: must be a boolean")),
                },
                // Out-of-range strengths are clamped when scoring.
                KEY_STRENGTH => match v.as_f64() {
                    Some(s) => config.weights.confidence_impact_strength = s,
                    None => errors.push(format!("{key}: must be a number")),
                },
                KEY_SCHEMA_VERSION => {}
                label if label_pattern().is_match(label) => match v.as_i64() {
                    Some(w) if (MIN_WEIGHT..=MAX_WEIGHT).contains(&w) => {
                        config.weights.weights.insert(label.to_string(), w);
                    }
                    Some(w) => errors.push(format!(
                        "{label}: {w} is outside [{MIN_WEIGHT}, {MAX_WEIGHT}]"
                    )),
                    None => errors.push(format!("{label}: must be an integer")),
                },
                other => errors.push(format!("{other}: unrecognised property")),
            }
        }

        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }

    /// Render as a weights document that [`MonitorConfig::from_value`] accepts.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::new();
        for (label, weight) in &self.weights.weights {
            obj.insert(label.clone(), Value::from(*weight));
        }
        obj.insert(KEY_THRESHOLD.into(), Value::from(self.confidence_threshold));
        obj.insert(KEY_INTERVAL.into(), Value::from(self.tick_interval_seconds));
        obj.insert(KEY_USE_CONFIDENCE.into(), Value::from(self.weights.use_confidence));
        obj.insert(
            KEY_STRENGTH.into(),
            Value::from(self.weights.confidence_impact_strength),
        );
        Value::Object(obj)
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            weights: BehaviorWeightConfig::default(),
            tick_interval_seconds: DEFAULT_TICK_INTERVAL_SECONDS,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("regex is valid"))
}

// ── ConfigStore ───────────────────────────────────────────────────────────────

/// Owner of the weights file path and the last configuration that validated.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    last_valid: MonitorConfig,
}

impl ConfigStore {
    /// Default weights file, `~/.engage-monitor/weights.json`.
    pub fn default_path() -> PathBuf {
        crate::settings::app_dir().join("weights.json")
    }

    /// Initial load. Anything short of a valid file yields the built-in
    /// defaults as the last-known-good configuration.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let last_valid = match read_config(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "config loaded");
                config
            }
            Err(errors) => {
                for err in &errors {
                    tracing::warn!("config rejected: {err}");
                }
                tracing::warn!(path = %path.display(), "using default config");
                MonitorConfig::default()
            }
        };
        Self { path, last_valid }
    }

    /// Re-read the weights file.
    ///
    /// Returns `(config, errors)`. On failure `config` is the previous
    /// last-known-good configuration and `errors` is non-empty.
    pub fn reload(&mut self) -> (MonitorConfig, Vec<String>) {
        match read_config(&self.path) {
            Ok(config) => {
                tracing::info!(path = %self.path.display(), "config reloaded");
                self.last_valid = config.clone();
                (config, Vec::new())
            }
            Err(errors) => {
                for err in &errors {
                    tracing::error!("config validation error: {err}");
                }
                (self.last_valid.clone(), errors)
            }
        }
    }

    /// The last configuration that validated.
    pub fn current(&self) -> &MonitorConfig {
        &self.last_valid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the built-in defaults to `path` unless a file is already there.
    pub fn write_default_if_missing(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&MonitorConfig::default().to_value())?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(true)
    }
}

fn read_config(path: &Path) -> std::result::Result<MonitorConfig, Vec<String>> {
    let value = read_document(path).map_err(|e| vec![e.to_string()])?;
    MonitorConfig::from_value(&value)
}

fn read_document(path: &Path) -> Result<Value> {
    if !path.exists() {
        return Err(EngageError::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
