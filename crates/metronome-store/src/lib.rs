//! `metronome-store` — coordination-store primitives shared by every
//! scheduler process.
//!
//! # Overview
//!
//! The scheduler does not talk to a concrete database; it talks to the
//! [`CoordinationStore`] trait, a minimal key-value + scored-set interface.
//! Mutual exclusion, schedule records and the due-queue are all built from
//! these primitives in `metronome-scheduler`.
//!
//! # Backends
//!
//! | Backend       | Scope                                   |
//! |---------------|-----------------------------------------|
//! | [`MemoryStore`] | In-process; tests and single-host fleets simulated in one process |
//! | [`SqliteStore`] | Shared database file; co-located processes on one host |
//!
//! A networked backend (Redis, etcd, …) only has to implement the trait; the
//! scheduler semantics do not change.

pub mod db;
pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::CoordinationStore;
