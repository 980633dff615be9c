//! Per-run timing and outcome bookkeeping.
//!
//! A [`MetricsRecorder`] is opened when a run starts and turned into an immutable
//! [`RunMetrics`] by [`MetricsRecorder::finish`]. `finish` consumes the recorder,
//! so a run cannot be completed twice.

use crate::error::{ErrorKind, SceneError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub started_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderAttempt {
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<usize>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<PhaseTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<PhaseTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<PhaseTiming>,
    pub render_attempts: Vec<RenderAttempt>,
    pub repairs: u32,
    pub notes: BTreeMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl RunMetrics {
    pub fn render_time_secs(&self) -> f64 {
        self.render_attempts.iter().map(|a| a.duration_secs).sum()
    }
}

/// Wall-clock start of a phase, paired with a monotonic clock for its duration.
#[derive(Debug, Clone, Copy)]
pub struct PhaseClock {
    started_at: DateTime<Utc>,
    started: Instant,
}

impl PhaseClock {
    pub fn start() -> Self {
        Self {
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn stop(self, error: Option<&SceneError>) -> PhaseTiming {
        PhaseTiming {
            started_at: self.started_at,
            duration_secs: self.started.elapsed().as_secs_f64(),
            error: error.map(ToString::to_string),
        }
    }
}

#[derive(Debug)]
pub struct MetricsRecorder {
    operation: String,
    clock: PhaseClock,
    generation: Option<PhaseTiming>,
    verification: Option<PhaseTiming>,
    encoding: Option<PhaseTiming>,
    render_attempts: Vec<RenderAttempt>,
    repairs: u32,
    notes: BTreeMap<String, serde_json::Value>,
}

impl MetricsRecorder {
    pub fn start(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            clock: PhaseClock::start(),
            generation: None,
            verification: None,
            encoding: None,
            render_attempts: Vec::new(),
            repairs: 0,
            notes: BTreeMap::new(),
        }
    }

    pub fn record_generation(&mut self, clock: PhaseClock, error: Option<&SceneError>) {
        self.generation = Some(clock.stop(error));
    }

    pub fn record_verification(&mut self, clock: PhaseClock, error: Option<&SceneError>) {
        self.verification = Some(clock.stop(error));
    }

    pub fn record_encoding(&mut self, clock: PhaseClock, error: Option<&SceneError>) {
        self.encoding = Some(clock.stop(error));
    }

    pub fn record_render_attempt(
        &mut self,
        attempt: u32,
        frame: Option<usize>,
        elapsed: Duration,
        error: Option<&SceneError>,
    ) {
        self.render_attempts.push(RenderAttempt {
            attempt,
            frame,
            duration_secs: elapsed.as_secs_f64(),
            error: error.map(ToString::to_string),
        });
    }

    pub fn record_repair(&mut self) {
        self.repairs += 1;
    }

    pub fn note(&mut self, key: &str, value: impl Into<serde_json::Value>) {
        self.notes.insert(key.to_string(), value.into());
    }

    /// Closes the run. `error` is the terminal error, if the run failed.
    pub fn finish(self, error: Option<&SceneError>) -> RunMetrics {
        RunMetrics {
            operation: self.operation,
            started_at: self.clock.started_at,
            finished_at: Utc::now(),
            duration_secs: self.clock.elapsed().as_secs_f64(),
            generation: self.generation,
            verification: self.verification,
            encoding: self.encoding,
            render_attempts: self.render_attempts,
            repairs: self.repairs,
            notes: self.notes,
            error: error.map(ToString::to_string),
            error_kind: error.map(SceneError::kind),
        }
    }
}
