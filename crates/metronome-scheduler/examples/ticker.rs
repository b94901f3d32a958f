//! Minimal end-to-end demo: two jobs on short intervals, driven by the
//! scheduler loop against an in-memory store.
//!
//! Run with: `cargo run -p metronome-scheduler --example ticker`

use std::sync::Arc;

use async_trait::async_trait;
use metronome_core::{MetronomeConfig, SystemClock};
use metronome_scheduler::{run, Job, JobError, Manager, Recurrence};
use metronome_store::MemoryStore;
use tokio::sync::watch;

struct PrintJob {
    name: String,
}

#[async_trait]
impl Job for PrintJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self) -> Result<(), JobError> {
        println!("[{}] performing", self.name);
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = MetronomeConfig::default();
    let clock = Arc::new(SystemClock);
    let store = Arc::new(MemoryStore::new(clock.clone()));
    let manager = Arc::new(Manager::new(store, clock, config.scheduler));

    // One job with the config's default jitter, one pinned to its interval.
    manager
        .ensure_schedule_every(
            Arc::new(PrintJob {
                name: "heartbeat".into(),
            }),
            5,
        )
        .await
        .expect("schedule heartbeat");
    manager
        .ensure_schedule(
            Arc::new(PrintJob {
                name: "digest".into(),
            }),
            Recurrence::every_secs(13).with_random_ratio(0.0),
        )
        .await
        .expect("schedule digest");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn(run(manager, shutdown_rx));

    tokio::signal::ctrl_c().await.expect("install ctrl-c handler");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;
}
