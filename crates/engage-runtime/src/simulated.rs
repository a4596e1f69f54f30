//! Hardware-free camera and classifier.
//!
//! The camera hands out a small synthetic RGB frame; the classifier invents
//! a handful of observations per frame, skewed towards attentive behaviours
//! by `engagement_bias`. Seeding the classifier makes a run repeatable.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use engage_core::collaborators::{Classifier, Frame, FrameSource};
use engage_core::error::{EngageError, Result};
use engage_core::models::Observation;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

const ATTENTIVE: [&str; 3] = ["raising_hand", "writing_notes", "looking_at_board"];
const DISTRACTED: [&str; 5] = [
    "on_phone",
    "head_down",
    "talking_to_group",
    "hands_on_head",
    "looking_away_long",
];

// ── SimulatedCamera ───────────────────────────────────────────────────────────

pub struct SimulatedCamera {
    width: u32,
    height: u32,
    started: AtomicBool,
    frames: AtomicU64,
}

impl SimulatedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Frames captured since construction.
    pub fn frames_captured(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedCamera {
    fn default() -> Self {
        Self::new(64, 48)
    }
}

impl FrameSource for SimulatedCamera {
    fn start(&self) -> Result<()> {
        if !self.started.swap(true, Ordering::SeqCst) {
            tracing::info!(width = self.width, height = self.height, "simulated camera started");
        }
        Ok(())
    }

    fn capture_frame(&self) -> Result<Frame> {
        if !self.is_started() {
            return Err(EngageError::Capture("camera not started".into()));
        }
        let n = self.frames.fetch_add(1, Ordering::SeqCst);
        let len = self.width as usize * self.height as usize * 3;
        Ok(Frame {
            width: self.width,
            height: self.height,
            pixels: vec![(n % 256) as u8; len],
            captured_at: Utc::now(),
        })
    }

    fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            tracing::info!(frames = self.frames_captured(), "simulated camera stopped");
        }
    }
}

// ── SimulatedClassifier ───────────────────────────────────────────────────────

pub struct SimulatedClassifier {
    /// Probability that a subject shows an attentive behaviour.
    engagement_bias: f64,
    max_subjects: usize,
    loaded: AtomicBool,
    rng: Mutex<StdRng>,
}

impl SimulatedClassifier {
    /// `seed` of `None` draws from OS entropy.
    pub fn new(engagement_bias: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            engagement_bias: if engagement_bias.is_finite() {
                engagement_bias.clamp(0.0, 1.0)
            } else {
                0.5
            },
            max_subjects: 6,
            loaded: AtomicBool::new(false),
            rng: Mutex::new(rng),
        }
    }

    /// Mark the model as loaded. Until then `classify` fails.
    pub fn load(&self) {
        self.loaded.store(true, Ordering::SeqCst);
        tracing::info!(bias = self.engagement_bias, "simulated classifier loaded");
    }
}

impl Classifier for SimulatedClassifier {
    fn classify(&self, _frame: &Frame, confidence_threshold: f64) -> Result<Vec<Observation>> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(EngageError::Classification("model not loaded".into()));
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| EngageError::Classification("rng lock poisoned".into()))?;

        let subjects = rng.gen_range(0..=self.max_subjects);
        let mut observations = Vec::with_capacity(subjects);
        for _ in 0..subjects {
            let pool: &[&str] = if rng.gen_bool(self.engagement_bias) {
                &ATTENTIVE
            } else {
                &DISTRACTED
            };
            let label = pool.choose(&mut *rng).copied().unwrap_or("head_down");
            let confidence: f64 = rng.gen_range(0.5..1.0);
            if confidence >= confidence_threshold {
                observations.push(Observation::new(label, confidence));
            }
        }
        Ok(observations)
    }
}
