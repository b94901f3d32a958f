use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Recurrence, RunResult};

/// Persisted per-job schedule state.
///
/// Stored as JSON under `<namespace>:job:<name>`. `next_run_at` is the state
/// machine: `Some(t)` with `t` in the future means Scheduled, `Some(t)` in
/// the past means Due, `None` means the job is not currently schedulable
/// (a dispatch decision is in flight, or the job was removed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRecord {
    /// Epoch seconds of the next planned occurrence, if any.
    pub next_run_at: Option<i64>,
    /// Epoch seconds at which the last occurrence was dispatched.
    pub prev_run_at: Option<i64>,
    /// Wall-clock duration of the last execution.
    pub prev_duration_ms: Option<u64>,
    /// Outcome of the last execution.
    #[serde(default)]
    pub prev_result: RunResult,
}

impl ScheduleRecord {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Key layout of one scheduler namespace inside the coordination store.
///
/// Every process of a cluster must be constructed with the same namespace;
/// distinct namespaces are fully isolated schedulers.
#[derive(Debug, Clone)]
pub struct Keys {
    namespace: String,
}

impl Keys {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
        }
    }

    /// The distributed-lock token key.
    pub fn lock(&self) -> String {
        format!("{}:lock", self.namespace)
    }

    /// The shared due-queue (scored set).
    pub fn due_queue(&self) -> String {
        format!("{}:due-queue", self.namespace)
    }

    /// The schedule record of one job.
    pub fn job(&self, name: &str) -> String {
        format!("{}:job:{}", self.namespace, name)
    }
}

/// Place the next occurrence of `recurrence` after `now_secs`.
///
/// `next = now + every_secs * (1 + uniform(-ratio/2, +ratio/2))`, rounded to
/// whole seconds. A zero ratio yields exactly `now + every_secs`.
pub fn next_occurrence(now_secs: i64, recurrence: &Recurrence) -> i64 {
    let half = recurrence.random_ratio / 2.0;
    let factor = if half > 0.0 {
        1.0 + rand::thread_rng().gen_range(-half..=half)
    } else {
        1.0
    };
    now_secs + (recurrence.every_secs as f64 * factor).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Recurrence;

    #[test]
    fn jitter_stays_within_ratio_bounds() {
        // every_secs=86400, ratio=0.1 from now=1000 must land in
        // [1000 + 86400*0.95, 1000 + 86400*1.05].
        let recurrence = Recurrence::every_secs(86_400).with_random_ratio(0.1);
        let (lo, hi) = (1000 + 82_080, 1000 + 90_720);
        for _ in 0..200 {
            let next = next_occurrence(1000, &recurrence);
            assert!((lo..=hi).contains(&next), "next {next} outside [{lo}, {hi}]");
        }
    }

    #[test]
    fn zero_ratio_is_exact() {
        let recurrence = Recurrence::every_secs(60).with_random_ratio(0.0);
        for _ in 0..10 {
            assert_eq!(next_occurrence(1000, &recurrence), 1060);
        }
    }

    #[test]
    fn jitter_actually_spreads() {
        // With a wide ratio, 50 samples should not all collapse onto one value.
        let recurrence = Recurrence::every_secs(86_400).with_random_ratio(0.5);
        let first = next_occurrence(0, &recurrence);
        let spread = (0..50).any(|_| next_occurrence(0, &recurrence) != first);
        assert!(spread);
    }

    #[test]
    fn key_layout() {
        let keys = Keys::new("scheduler");
        assert_eq!(keys.lock(), "scheduler:lock");
        assert_eq!(keys.due_queue(), "scheduler:due-queue");
        assert_eq!(keys.job("daily-digest"), "scheduler:job:daily-digest");
    }

    #[test]
    fn record_json_field_names_are_stable() {
        // The JSON shape is shared store state read by every process;
        // field names must not drift.
        let record = ScheduleRecord {
            next_run_at: Some(1060),
            prev_run_at: Some(1000),
            prev_duration_ms: Some(42),
            prev_result: RunResult::Ok,
        };
        let json = record.to_json().unwrap();
        assert!(json.contains(r#""next_run_at":1060"#));
        assert!(json.contains(r#""prev_run_at":1000"#));
        assert!(json.contains(r#""prev_duration_ms":42"#));
        assert!(json.contains(r#""prev_result":"ok""#));

        let parsed = ScheduleRecord::from_json(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
