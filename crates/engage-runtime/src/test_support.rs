//! Hand-rolled collaborator fakes shared by the runtime tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use engage_core::collaborators::{Classifier, Frame, FrameSource, Indicator, SessionStore};
use engage_core::error::{EngageError, Result};
use engage_core::models::Observation;
use engage_core::payloads::{SummaryPayload, TickPayload};

use crate::orchestrator::Collaborators;

/// Ordered record of collaborator calls, shared between fakes.
pub type EventLog = Arc<Mutex<Vec<String>>>;

pub fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn tiny_frame() -> Frame {
    Frame {
        width: 2,
        height: 1,
        pixels: vec![0; 6],
        captured_at: Utc::now(),
    }
}

// ── Camera ────────────────────────────────────────────────────────────────────

pub struct FakeCamera {
    log: EventLog,
    started: AtomicBool,
    captures: AtomicUsize,
    /// Fail every capture after this many successful ones.
    fail_after: Option<usize>,
}

impl FakeCamera {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            started: AtomicBool::new(true),
            captures: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    pub fn failing_after(log: EventLog, n: usize) -> Self {
        Self {
            fail_after: Some(n),
            ..Self::new(log)
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl FrameSource for FakeCamera {
    fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn capture_frame(&self) -> Result<Frame> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(EngageError::Capture("camera not started".into()));
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.is_some_and(|limit| n >= limit) {
            return Err(EngageError::Capture("sensor disconnected".into()));
        }
        Ok(tiny_frame())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.log.lock().unwrap().push("camera.stop".into());
    }
}

// ── Classifier ────────────────────────────────────────────────────────────────

/// Replays scripted observation sets, then repeats the last one.
pub struct ScriptedClassifier {
    script: Mutex<VecDeque<Vec<Observation>>>,
    last: Mutex<Vec<Observation>>,
    fail: bool,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Vec<Observation>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&self, _frame: &Frame, confidence_threshold: f64) -> Result<Vec<Observation>> {
        if self.fail {
            return Err(EngageError::Classification("model not loaded".into()));
        }
        let next = self.script.lock().unwrap().pop_front();
        let observations = match next {
            Some(obs) => {
                *self.last.lock().unwrap() = obs.clone();
                obs
            }
            None => self.last.lock().unwrap().clone(),
        };
        Ok(observations
            .into_iter()
            .filter(|o| o.confidence >= confidence_threshold)
            .collect())
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingStore {
    log: EventLog,
    fail_ticks: bool,
    fail_create: bool,
    pub ticks: Mutex<Vec<(String, u8, i64)>>,
    pub completed: Mutex<Vec<(String, DateTime<Utc>, SummaryPayload)>>,
}

impl RecordingStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Every `emit_tick` fails.
    pub fn failing_ticks(log: EventLog) -> Self {
        Self {
            fail_ticks: true,
            ..Self::new(log)
        }
    }

    /// `create_session` fails.
    pub fn failing_create(log: EventLog) -> Self {
        Self {
            fail_create: true,
            ..Self::new(log)
        }
    }

    pub fn scores(&self) -> Vec<u8> {
        self.ticks.lock().unwrap().iter().map(|(_, s, _)| *s).collect()
    }

    pub fn completed(&self) -> Vec<SummaryPayload> {
        self.completed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, s)| s.clone())
            .collect()
    }
}

impl SessionStore for RecordingStore {
    fn create_session(&self, session_id: &str, _device_id: &str, _started_at: DateTime<Utc>) -> Result<()> {
        if self.fail_create {
            return Err(EngageError::Persistence("create refused".into()));
        }
        self.log
            .lock()
            .unwrap()
            .push(format!("store.create {session_id}"));
        Ok(())
    }

    fn emit_tick(&self, session_id: &str, payload: &TickPayload, seconds_since_start: i64) -> Result<String> {
        if self.fail_ticks {
            return Err(EngageError::Persistence("network down".into()));
        }
        let mut ticks = self.ticks.lock().unwrap();
        ticks.push((
            session_id.to_string(),
            payload.engagement_score,
            seconds_since_start,
        ));
        Ok(format!("w{}", ticks.len()))
    }

    fn complete_session(&self, session_id: &str, ended_at: DateTime<Utc>, summary: &SummaryPayload) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("store.complete {session_id}"));
        self.completed
            .lock()
            .unwrap()
            .push((session_id.to_string(), ended_at, summary.clone()));
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.log.lock().unwrap().push("store.close".into());
        Ok(())
    }
}

// ── Indicator ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingIndicator {
    pub shown: Mutex<Vec<u8>>,
}

impl Indicator for RecordingIndicator {
    fn show(&self, score: u8) {
        self.shown.lock().unwrap().push(score);
    }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// Fakes plus the type-erased bundle handed to the code under test.
pub struct Fakes {
    pub log: EventLog,
    pub camera: Arc<FakeCamera>,
    pub store: Arc<RecordingStore>,
    pub indicator: Arc<RecordingIndicator>,
    pub collaborators: Collaborators,
}

pub fn fakes_with(
    camera: FakeCamera,
    classifier: ScriptedClassifier,
    store: RecordingStore,
    log: EventLog,
) -> Fakes {
    let camera = Arc::new(camera);
    let store = Arc::new(store);
    let indicator = Arc::new(RecordingIndicator::default());
    let collaborators = Collaborators {
        camera: camera.clone(),
        classifier: Arc::new(classifier),
        store: store.clone(),
        indicator: indicator.clone(),
    };
    Fakes {
        log,
        camera,
        store,
        indicator,
        collaborators,
    }
}

/// Working camera and store, classifier replaying `script`.
pub fn fakes(script: Vec<Vec<Observation>>) -> Fakes {
    let log = EventLog::default();
    fakes_with(
        FakeCamera::new(log.clone()),
        ScriptedClassifier::new(script),
        RecordingStore::new(log.clone()),
        log,
    )
}
