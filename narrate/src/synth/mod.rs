//! Resilient synthesis: job state, retry policy, scheduling, and reassembly.

pub mod assemble;
pub mod job;
pub mod retry;
pub mod scheduler;

pub use assemble::{ArtifactWriter, Assembly, INCOMPLETE_TAG, assemble};
pub use job::{FailureKind, JobState, SynthesisJob};
pub use retry::RetryPolicy;
pub use scheduler::{DriveSummary, Scheduler, SettledUnit, StopSignal, UnitSink};
