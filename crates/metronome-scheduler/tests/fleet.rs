// Fleet-level behavior: several Manager instances sharing one coordination
// store must dispatch each due occurrence exactly once, end to end.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metronome_core::{ManualClock, SchedulerConfig};
use metronome_scheduler::{Job, JobError, Manager, Recurrence};
use metronome_store::{CoordinationStore, MemoryStore, SqliteStore};

struct CountingJob {
    name: String,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Job for CountingJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform(&self) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn counting_job(name: &str, calls: &Arc<AtomicUsize>) -> Arc<CountingJob> {
    Arc::new(CountingJob {
        name: name.into(),
        calls: calls.clone(),
    })
}

#[tokio::test]
async fn one_due_occurrence_is_dispatched_exactly_once_across_the_fleet() {
    let clock = Arc::new(ManualClock::at_epoch(1000));
    let store = MemoryStore::new(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    // Three "processes" sharing one store, each registering the same job,
    // as in a deployment where every node runs identical code.
    let managers: Vec<Arc<Manager>> = (0..3)
        .map(|_| {
            Arc::new(Manager::new(
                Arc::new(store.clone()),
                clock.clone(),
                SchedulerConfig::default(),
            ))
        })
        .collect();
    for manager in &managers {
        manager
            .ensure_schedule(
                counting_job("shared", &calls),
                Recurrence::every_secs(60).with_random_ratio(0.0),
            )
            .await
            .unwrap();
    }

    clock.advance_secs(61);

    // All processes tick concurrently against the one due occurrence.
    let mut handles = Vec::new();
    for manager in &managers {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move { manager.tick().await.unwrap() }));
    }
    let mut dispatched = 0;
    for handle in handles {
        if handle.await.unwrap() {
            dispatched += 1;
        }
    }

    for manager in &managers {
        manager.blocking_tick().await.unwrap();
    }

    assert_eq!(dispatched, 1, "exactly one process won the dispatch");
    assert_eq!(calls.load(Ordering::SeqCst), 1, "the body ran exactly once");

    for manager in &managers {
        manager.stop();
    }
}

#[tokio::test]
async fn end_to_end_single_process() {
    let clock = Arc::new(ManualClock::at_epoch(1000));
    let store = MemoryStore::new(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::new(
        Arc::new(store.clone()),
        clock.clone(),
        SchedulerConfig::default(),
    );

    manager
        .ensure_schedule(
            counting_job("daily-digest", &calls),
            Recurrence::every_secs(60).with_random_ratio(0.0),
        )
        .await
        .unwrap();
    assert_eq!(manager.next_run("daily-digest").await.unwrap(), Some(1060));

    clock.advance_secs(61);
    assert!(manager.blocking_tick().await.unwrap());

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // The schedule advanced 60s from the decision instant.
    assert_eq!(manager.next_run("daily-digest").await.unwrap(), Some(1121));

    // Nothing further is due until the clock moves again.
    assert!(!manager.blocking_tick().await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    manager.stop();
}

#[tokio::test]
async fn repeated_occurrences_keep_flowing() {
    let clock = Arc::new(ManualClock::at_epoch(0));
    let store = MemoryStore::new(clock.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::new(
        Arc::new(store.clone()),
        clock.clone(),
        SchedulerConfig::default(),
    );

    manager
        .ensure_schedule(
            counting_job("heartbeat", &calls),
            Recurrence::every_secs(10).with_random_ratio(0.0),
        )
        .await
        .unwrap();

    for round in 1..=5 {
        clock.advance_secs(10);
        assert!(manager.blocking_tick().await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), round);
    }

    manager.stop();
}

#[tokio::test]
async fn scheduler_works_over_the_sqlite_backend() {
    let clock = Arc::new(ManualClock::at_epoch(1000));
    let store: Arc<dyn CoordinationStore> =
        Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
    let calls = Arc::new(AtomicUsize::new(0));
    let manager = Manager::new(store, clock.clone(), SchedulerConfig::default());

    manager
        .ensure_schedule(
            counting_job("sqlite-job", &calls),
            Recurrence::every_secs(60).with_random_ratio(0.0),
        )
        .await
        .unwrap();

    clock.advance_secs(61);
    assert!(manager.blocking_tick().await.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.next_run("sqlite-job").await.unwrap(), Some(1121));

    manager.stop();
}
