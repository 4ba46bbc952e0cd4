//! Job status record schema.

use serde::{Deserialize, Serialize};

/// The three points in a job's life a status record can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Enqueued,
    Processing,
    Complete,
}

/// The outcome recorded alongside a [`JobState`] transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Success,
    Error,
}

/// One entry in a job's append-only status log.
///
/// Invariant: the first record for any job is always `(Success,
/// Enqueued)`; the last is always `(_, Complete)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Seconds since the Unix epoch, matching the source's `time.time()`.
    pub when: f64,
    pub state: JobState,
    pub success: Outcome,
    pub description: String,
    /// Formatted backtrace, populated only when the record was emitted
    /// with the "include diagnosis" flag (action failures).
    pub diagnosis: String,
}

impl StatusRecord {
    pub fn new(success: Outcome, state: JobState, description: impl Into<String>) -> Self {
        Self {
            when: now_secs(),
            state,
            success,
            description: description.into(),
            diagnosis: String::new(),
        }
    }

    pub fn with_diagnosis(success: Outcome, state: JobState, description: impl Into<String>, diagnosis: impl Into<String>) -> Self {
        Self {
            when: now_secs(),
            state,
            success,
            description: description.into(),
            diagnosis: diagnosis.into(),
        }
    }
}

fn now_secs() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
