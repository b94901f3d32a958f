//! `metronome-scheduler` — distributed periodic-job scheduling over a shared
//! coordination store.
//!
//! # Overview
//!
//! Any number of cooperating processes each construct a [`Manager`] against
//! the same store namespace and call [`Manager::tick`] on a periodic cadence
//! (or let [`run`] do it). Each tick takes the fleet-wide
//! [`DistributedLock`], peeks the shared due-queue, and, when the earliest
//! entry is due, advances that job's schedule and hands it to the
//! process-local [`Runner`] for execution. The lock guarantees that every
//! due occurrence is dispatched exactly once across the fleet; the runner
//! guarantees that job bodies execute one at a time per process and that
//! their failures never reach the scheduling loop.
//!
//! # Shared state layout
//!
//! | Key                       | Contents                                  |
//! |---------------------------|-------------------------------------------|
//! | `<ns>:lock`               | Lock token (value = holder expiry, epoch seconds) |
//! | `<ns>:due-queue`          | Scored set: job name → next occurrence    |
//! | `<ns>:job:<name>`         | JSON [`ScheduleRecord`]                   |
//!
//! Occurrences are spread with fractional jitter
//! (`interval * (1 ± random_ratio/2)`) so fleets of similar jobs do not
//! thunder in lockstep.

pub mod error;
pub mod lock;
pub mod manager;
pub mod record;
pub mod runner;
pub mod types;

pub use error::{Result, SchedulerError};
pub use lock::DistributedLock;
pub use manager::{run, Manager};
pub use record::{Keys, ScheduleRecord};
pub use runner::{Dispatch, Runner};
pub use types::{Job, JobError, Recurrence, RunResult};
