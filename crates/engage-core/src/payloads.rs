//! Wire shapes written to the session store.
//!
//! Field names are camelCase to match the document store that consumes them.
//! Timestamps serialise as RFC 3339 / ISO-8601 UTC strings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::SessionSummary;

/// Version tag stamped on every payload.
pub const SCHEMA_VERSION: &str = "1.0";

/// One tick's engagement score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickPayload {
    pub schema_version: String,
    pub device_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    /// Score in `[0, 100]`.
    pub engagement_score: u8,
}

impl TickPayload {
    pub fn new(
        device_id: &str,
        session_id: &str,
        engagement_score: u8,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            timestamp,
            engagement_score,
        }
    }
}

/// End-of-session statistics as handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryPayload {
    pub schema_version: String,
    pub device_id: String,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: i64,
    /// Rounded to two decimal places.
    pub average_engagement: f64,
    pub tick_count: u64,
    pub timeline_ref: String,
}

impl From<&SessionSummary> for SummaryPayload {
    fn from(summary: &SessionSummary) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            device_id: summary.device_id.clone(),
            session_id: summary.session_id.clone(),
            started_at: summary.started_at,
            ended_at: summary.ended_at,
            duration_seconds: summary.duration_seconds,
            average_engagement: round_to_hundredths(summary.average_engagement),
            tick_count: summary.tick_count,
            timeline_ref: summary.timeline_ref.clone(),
        }
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round_ties_even() / 100.0
}
