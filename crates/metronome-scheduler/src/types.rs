use async_trait::async_trait;
use metronome_core::config::DEFAULT_RANDOM_RATIO;
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Error type a job body may return. Opaque to the scheduler, which only
/// decides between [`RunResult::Ok`] and [`RunResult::Failed`].
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A recurring unit of work.
///
/// Implementations are registered as `Arc<dyn Job>` and owned by the caller.
/// `name` must be globally unique across the fleet; it is the persistence
/// key. `perform` takes no arguments; anything the body needs is captured at
/// construction time.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Execute one occurrence. Errors (and panics) are contained by the
    /// runner and recorded as a failed run; they never reach the scheduler.
    async fn perform(&self) -> Result<(), JobError>;
}

/// Outcome of the most recent execution, persisted for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunResult {
    /// Never executed (or never completed) so far.
    #[default]
    Unknown,
    /// Last execution completed without error.
    Ok,
    /// Last execution returned an error, panicked, or timed out.
    Failed,
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunResult::Unknown => "unknown",
            RunResult::Ok => "ok",
            RunResult::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunResult {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(RunResult::Unknown),
            "ok" => Ok(RunResult::Ok),
            "failed" => Ok(RunResult::Failed),
            other => Err(format!("unknown run result: {other}")),
        }
    }
}

/// When and how often a job recurs.
///
/// `random_ratio` is the fractional jitter applied to the interval so that
/// many jobs registered together do not fire in lockstep: each occurrence is
/// placed `every_secs * (1 ± random_ratio/2)` after the previous decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Recurrence {
    /// Base interval in seconds. Must be > 0.
    pub every_secs: u64,
    /// Fractional jitter, `0 <= r < 1`.
    pub random_ratio: f64,
}

impl Recurrence {
    /// Recur every `secs` seconds with the default jitter ratio.
    pub fn every_secs(secs: u64) -> Self {
        Self {
            every_secs: secs,
            random_ratio: DEFAULT_RANDOM_RATIO,
        }
    }

    /// Override the jitter ratio. `0.0` pins occurrences to the exact
    /// interval.
    pub fn with_random_ratio(mut self, ratio: f64) -> Self {
        self.random_ratio = ratio;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.every_secs == 0 {
            return Err(SchedulerError::InvalidRecurrence(
                "every_secs must be greater than zero".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.random_ratio) {
            return Err(SchedulerError::InvalidRecurrence(format!(
                "random_ratio must be in [0, 1), got {}",
                self.random_ratio
            )));
        }
        Ok(())
    }
}
