//! Synthesis job state machine.
//!
//! ```text
//! Pending → InFlight → Succeeded
//!              ↓    ↘
//!           Retrying  Failed
//!              ↓
//!           InFlight
//! ```

use serde::Serialize;
use speech_client::SynthesisError;
use std::time::Duration;

use super::retry::RetryPolicy;
use crate::text::Chunk;

/// Why a job ended without audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Every allowed attempt failed transiently
    Exhausted,
    /// An error another attempt cannot fix
    Fatal,
    /// The run was stopped before the job could finish
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Retrying,
    Succeeded(Vec<u8>),
    Failed(JobFailure),
}

/// One chunk's progress through synthesis.
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub chunk: Chunk,
    /// Attempts started so far
    pub attempt_count: u32,
    pub state: JobState,
}

impl SynthesisJob {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            attempt_count: 0,
            state: JobState::Pending,
        }
    }

    /// Begin an attempt. Only valid from `Pending` or `Retrying`.
    pub fn start(&mut self) -> bool {
        match self.state {
            JobState::Pending | JobState::Retrying => {
                self.attempt_count += 1;
                self.state = JobState::InFlight;
                true
            }
            _ => false,
        }
    }

    /// Record the audio of a successful attempt.
    pub fn succeed(&mut self, audio: Vec<u8>) {
        if self.state == JobState::InFlight {
            self.state = JobState::Succeeded(audio);
        }
    }

    /// Record a failed attempt.
    ///
    /// Returns the backoff before the next attempt when the job moved to
    /// `Retrying`, or `None` when it is now `Failed`.
    pub fn fail(&mut self, error: &SynthesisError, policy: &RetryPolicy) -> Option<Duration> {
        if self.state != JobState::InFlight {
            return None;
        }

        if !error.is_transient() {
            self.state = JobState::Failed(JobFailure {
                kind: FailureKind::Fatal,
                message: error.to_string(),
            });
            return None;
        }

        if policy.allows_another(self.attempt_count) {
            self.state = JobState::Retrying;
            Some(policy.delay_after(self.attempt_count))
        } else {
            self.state = JobState::Failed(JobFailure {
                kind: FailureKind::Exhausted,
                message: format!("{} (after {} attempts)", error, self.attempt_count),
            });
            None
        }
    }

    /// Stop a job that has not finished; an in-flight attempt is left alone.
    pub fn cancel(&mut self) {
        if matches!(self.state, JobState::Pending | JobState::Retrying) {
            self.state = JobState::Failed(JobFailure {
                kind: FailureKind::Cancelled,
                message: "cancelled".to_string(),
            });
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Succeeded(_) | JobState::Failed(_))
    }

    pub fn audio(&self) -> Option<&[u8]> {
        match &self.state {
            JobState::Succeeded(audio) => Some(audio),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            JobState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.failure()
            .is_some_and(|f| f.kind == FailureKind::Cancelled)
    }
}
