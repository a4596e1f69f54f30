//! Contracts for the external systems the monitor drives.
//!
//! Capture and classification are blocking calls and are run off the async
//! executor by the tick loop. All collaborators are shared across sessions,
//! so every method takes `&self` and implementations handle their own
//! interior mutability.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::Observation;
use crate::payloads::{SummaryPayload, TickPayload};

/// A captured image. Opaque to the core; only the classifier looks inside.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB888 pixels, row-major.
    pub pixels: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

/// Frame-capture device.
pub trait FrameSource: Send + Sync {
    /// Power up the device. Calling it twice is harmless.
    fn start(&self) -> Result<()>;

    /// Grab one frame. Fails if the device has not been started.
    fn capture_frame(&self) -> Result<Frame>;

    /// Release the device.
    fn stop(&self);
}

/// Inference engine mapping a frame to behaviour observations.
pub trait Classifier: Send + Sync {
    /// Observations with confidence at or above `confidence_threshold`.
    /// Order is not significant. Fails if the model is not loaded.
    fn classify(&self, frame: &Frame, confidence_threshold: f64) -> Result<Vec<Observation>>;
}

/// Remote document store for sessions, ticks and summaries.
pub trait SessionStore: Send + Sync {
    fn create_session(&self, session_id: &str, device_id: &str, started_at: DateTime<Utc>)
        -> Result<()>;

    /// Append one tick; returns the store's id for the written record.
    fn emit_tick(
        &self,
        session_id: &str,
        payload: &TickPayload,
        seconds_since_start: i64,
    ) -> Result<String>;

    fn complete_session(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
        summary: &SummaryPayload,
    ) -> Result<()>;

    /// Flush and release the client. Later writes fail.
    fn close(&self) -> Result<()>;
}

/// Glanceable local display of the latest score. Must never block.
pub trait Indicator: Send + Sync {
    fn show(&self, score: u8);
}
