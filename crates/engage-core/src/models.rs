use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Behaviour labels the stock classifier model emits, in label-file order.
pub const BEHAVIOR_KEYS: [&str; 8] = [
    "raising_hand",
    "writing_notes",
    "looking_at_board",
    "on_phone",
    "head_down",
    "talking_to_group",
    "hands_on_head",
    "looking_away_long",
];

/// Weights shipped with the device when no weights file is usable.
pub const DEFAULT_WEIGHTS: [(&str, i64); 8] = [
    ("raising_hand", 100),
    ("writing_notes", 80),
    ("looking_at_board", 75),
    ("on_phone", 0),
    ("head_down", 0),
    ("talking_to_group", 15),
    ("hands_on_head", 30),
    ("looking_away_long", 20),
];

/// Default strength of the confidence modifier.
pub const DEFAULT_CONFIDENCE_IMPACT_STRENGTH: f64 = 0.35;

/// Maps behaviour labels to engagement weights and carries the scoring
/// modifiers.
///
/// Labels missing from `weights` are simply ignored by the scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorWeightConfig {
    /// Weight per behaviour label, practically in `[0, 100]`.
    pub weights: BTreeMap<String, i64>,
    /// Scale the mean weight by the mean observation confidence.
    pub use_confidence: bool,
    /// How strongly confidence pulls the score down. Clamped to `[0, 1]` at
    /// scoring time.
    pub confidence_impact_strength: f64,
}

impl BehaviorWeightConfig {
    /// Weight for `label`, or `None` when the label is unknown.
    pub fn weight(&self, label: &str) -> Option<i64> {
        self.weights.get(label).copied()
    }

    /// Labels with a configured weight, sorted.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }
}

impl Default for BehaviorWeightConfig {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS
                .iter()
                .map(|(label, weight)| (label.to_string(), *weight))
                .collect(),
            use_confidence: false,
            confidence_impact_strength: DEFAULT_CONFIDENCE_IMPACT_STRENGTH,
        }
    }
}

/// One classified subject in a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Behaviour label as emitted by the classifier.
    pub label: String,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Observation {
    pub fn new(label: impl Into<String>, confidence: f64) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Active => write!(f, "active"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A bounded monitoring period.
///
/// Callers only ever hold a snapshot; the live value stays inside the
/// session manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque unique token.
    pub id: String,
    /// Device the session runs on.
    pub device_id: String,
    /// Optional owning user.
    pub user_id: Option<String>,
    /// UTC instant the session was opened.
    pub started_at: DateTime<Utc>,
    pub status: SessionStatus,
}

/// Aggregate statistics computed once, when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub device_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    /// Whole seconds between start and end, never below 1.
    pub duration_seconds: i64,
    /// Mean of the recorded tick scores, `0.0` when none were recorded.
    pub average_engagement: f64,
    pub tick_count: u64,
    /// Locator of the tick timeline in the session store.
    pub timeline_ref: String,
}

/// Timeline locator for a session's ticks.
pub fn timeline_ref(session_id: &str) -> String {
    format!("sessions/{session_id}/ticks")
}
