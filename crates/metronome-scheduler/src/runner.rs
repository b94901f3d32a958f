use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use metronome_store::CoordinationStore;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::record::{Keys, ScheduleRecord};
use crate::types::{Job, JobError, RunResult};

/// How many compare-and-swap rounds the outcome write-back attempts before
/// giving up (the fields are observability data, not scheduling state).
const WRITE_BACK_ATTEMPTS: usize = 3;

/// A dispatch decision handed from the scheduling step to the runner.
pub struct Dispatch {
    pub job: Arc<dyn Job>,
    /// Epoch seconds of the scheduling decision; recorded as `prev_run_at`.
    pub dispatched_at: i64,
}

/// In-process job executor: an unbounded FIFO queue consumed by exactly one
/// worker task, so job bodies never run concurrently within a process.
///
/// The worker contains failures completely: an `Err`, a panic or a timeout
/// is logged, recorded in the job's schedule record, and the loop moves on.
/// A job's own next occurrence is its retry mechanism; the runner performs
/// none.
pub struct Runner {
    tx: mpsc::UnboundedSender<Dispatch>,
    outstanding_tx: Arc<watch::Sender<usize>>,
    outstanding_rx: watch::Receiver<usize>,
    shutdown_tx: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Runner {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: Keys,
        job_timeout: Option<Duration>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding_tx, outstanding_rx) = watch::channel(0usize);
        let outstanding_tx = Arc::new(outstanding_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(worker_loop(
            rx,
            shutdown_rx,
            outstanding_tx.clone(),
            store,
            keys,
            job_timeout,
        ));

        Self {
            tx,
            outstanding_tx,
            outstanding_rx,
            shutdown_tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Append a dispatch to the queue. Never blocks.
    pub fn enq(&self, dispatch: Dispatch) {
        // Count before sending so a concurrent `wait_till_done` cannot
        // observe an empty queue between the two steps.
        self.outstanding_tx.send_modify(|n| *n += 1);
        if self.tx.send(dispatch).is_err() {
            self.outstanding_tx.send_modify(|n| *n = n.saturating_sub(1));
            warn!("runner is stopped; dropping dispatch");
        }
    }

    /// Wait until the queue is empty and no job is executing.
    ///
    /// May never resolve if [`stop`](Runner::stop) aborted the worker while
    /// dispatches were still outstanding.
    pub async fn wait_till_done(&self) {
        let mut rx = self.outstanding_rx.clone();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Terminate the worker abruptly. Still-queued dispatches and any
    /// in-flight execution are abandoned, best-effort.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
        }
        info!("runner stopped");
    }
}

async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    mut shutdown: watch::Receiver<bool>,
    outstanding: Arc<watch::Sender<usize>>,
    store: Arc<dyn CoordinationStore>,
    keys: Keys,
    job_timeout: Option<Duration>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("runner worker shutting down");
                    break;
                }
            }
            dispatch = rx.recv() => {
                let Some(dispatch) = dispatch else { break };
                execute(&store, &keys, dispatch, job_timeout).await;
                outstanding.send_modify(|n| *n = n.saturating_sub(1));
            }
        }
    }
}

/// Run one dispatch to completion and record its outcome.
async fn execute(
    store: &Arc<dyn CoordinationStore>,
    keys: &Keys,
    dispatch: Dispatch,
    job_timeout: Option<Duration>,
) {
    let name = dispatch.job.name().to_string();
    debug!(job = %name, "executing job");
    let started = Instant::now();

    // The body runs in its own task so a panic surfaces as a JoinError here
    // instead of tearing down the worker loop.
    let body = dispatch.job.clone();
    let mut handle = tokio::spawn(async move { body.perform().await });

    let result = match job_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => settle(joined, &name),
            Err(_) => {
                handle.abort();
                warn!(job = %name, timeout_ms = limit.as_millis() as u64, "job timed out");
                RunResult::Failed
            }
        },
        None => settle(handle.await, &name),
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        RunResult::Ok => info!(job = %name, duration_ms, "job completed"),
        _ => warn!(job = %name, duration_ms, "job failed"),
    }

    if let Err(e) = record_outcome(
        store,
        keys,
        &name,
        dispatch.dispatched_at,
        duration_ms,
        result,
    )
    .await
    {
        error!(job = %name, error = %e, "failed to record job outcome");
    }
}

/// Collapse the joined body result into a run outcome.
fn settle(
    joined: std::result::Result<std::result::Result<(), JobError>, JoinError>,
    name: &str,
) -> RunResult {
    match joined {
        Ok(Ok(())) => RunResult::Ok,
        Ok(Err(e)) => {
            warn!(job = %name, error = %e, "job returned error");
            RunResult::Failed
        }
        Err(join_err) if join_err.is_panic() => {
            warn!(job = %name, "job panicked");
            RunResult::Failed
        }
        Err(_) => {
            warn!(job = %name, "job task aborted");
            RunResult::Failed
        }
    }
}

/// Update the prev_* observability fields of the job's schedule record.
///
/// Uses compare-and-swap so a tick that concurrently rewrote `next_run_at`
/// is never clobbered. A record that vanished mid-flight (job removed) is
/// left alone.
async fn record_outcome(
    store: &Arc<dyn CoordinationStore>,
    keys: &Keys,
    name: &str,
    dispatched_at: i64,
    duration_ms: u64,
    result: RunResult,
) -> Result<()> {
    let key = keys.job(name);
    for _ in 0..WRITE_BACK_ATTEMPTS {
        let Some(old_json) = store.get(&key).await? else {
            debug!(job = %name, "record gone before outcome write-back; skipping");
            return Ok(());
        };
        let mut record = ScheduleRecord::from_json(&old_json)?;
        record.prev_run_at = Some(dispatched_at);
        record.prev_duration_ms = Some(duration_ms);
        record.prev_result = result;
        let new_json = record.to_json()?;
        if store.compare_and_swap(&key, &old_json, &new_json).await? {
            return Ok(());
        }
    }
    warn!(job = %name, "outcome write-back lost {WRITE_BACK_ATTEMPTS} swap races; giving up");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use metronome_core::ManualClock;
    use metronome_store::MemoryStore;

    use super::*;

    struct SleepingJob {
        name: String,
        sleep: Duration,
        spans: Arc<Mutex<Vec<(Instant, Instant)>>>,
    }

    #[async_trait]
    impl Job for SleepingJob {
        fn name(&self) -> &str {
            &self.name
        }

        async fn perform(&self) -> std::result::Result<(), JobError> {
            let start = Instant::now();
            tokio::time::sleep(self.sleep).await;
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(())
        }
    }

    struct CountingJob {
        name: String,
        calls: Arc<AtomicUsize>,
        fail: bool,
        panic: bool,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &str {
            &self.name
        }

        async fn perform(&self) -> std::result::Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.panic {
                panic!("job blew up");
            }
            if self.fail {
                return Err("job failed on purpose".into());
            }
            Ok(())
        }
    }

    fn runner_fixture(timeout: Option<Duration>) -> (MemoryStore, Keys, Runner) {
        let clock = Arc::new(ManualClock::at_epoch(1000));
        let store = MemoryStore::new(clock.clone());
        let keys = Keys::new("scheduler");
        let runner = Runner::new(Arc::new(store.clone()), keys.clone(), timeout);
        (store, keys, runner)
    }

    async fn seed_record(store: &MemoryStore, keys: &Keys, name: &str) {
        let record = ScheduleRecord::default();
        store
            .set(&keys.job(name), &record.to_json().unwrap())
            .await
            .unwrap();
    }

    async fn read_record(store: &MemoryStore, keys: &Keys, name: &str) -> ScheduleRecord {
        let json = store.get(&keys.job(name)).await.unwrap().unwrap();
        ScheduleRecord::from_json(&json).unwrap()
    }

    #[tokio::test]
    async fn executes_strictly_sequentially() {
        let (_store, _keys, runner) = runner_fixture(None);
        let spans = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            runner.enq(Dispatch {
                job: Arc::new(SleepingJob {
                    name: format!("sleeper-{i}"),
                    sleep: Duration::from_millis(30),
                    spans: spans.clone(),
                }),
                dispatched_at: 1000,
            });
        }
        runner.wait_till_done().await;

        let spans = spans.lock().unwrap();
        assert_eq!(spans.len(), 3);
        for pair in spans.windows(2) {
            let (_, end_a) = pair[0];
            let (start_b, _) = pair[1];
            assert!(end_a <= start_b, "job executions overlapped");
        }
    }

    #[tokio::test]
    async fn failure_is_isolated_and_recorded() {
        let (store, keys, runner) = runner_fixture(None);
        let calls = Arc::new(AtomicUsize::new(0));
        seed_record(&store, &keys, "bad").await;
        seed_record(&store, &keys, "good").await;

        runner.enq(Dispatch {
            job: Arc::new(CountingJob {
                name: "bad".into(),
                calls: calls.clone(),
                fail: true,
                panic: false,
            }),
            dispatched_at: 1000,
        });
        runner.enq(Dispatch {
            job: Arc::new(CountingJob {
                name: "good".into(),
                calls: calls.clone(),
                fail: false,
                panic: false,
            }),
            dispatched_at: 1001,
        });
        runner.wait_till_done().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let bad = read_record(&store, &keys, "bad").await;
        assert_eq!(bad.prev_result, RunResult::Failed);
        assert_eq!(bad.prev_run_at, Some(1000));
        assert!(bad.prev_duration_ms.is_some());

        let good = read_record(&store, &keys, "good").await;
        assert_eq!(good.prev_result, RunResult::Ok);
        assert_eq!(good.prev_run_at, Some(1001));
    }

    #[tokio::test]
    async fn panic_does_not_kill_the_worker() {
        let (store, keys, runner) = runner_fixture(None);
        let calls = Arc::new(AtomicUsize::new(0));
        seed_record(&store, &keys, "panicky").await;
        seed_record(&store, &keys, "after").await;

        runner.enq(Dispatch {
            job: Arc::new(CountingJob {
                name: "panicky".into(),
                calls: calls.clone(),
                fail: false,
                panic: true,
            }),
            dispatched_at: 1000,
        });
        runner.enq(Dispatch {
            job: Arc::new(CountingJob {
                name: "after".into(),
                calls: calls.clone(),
                fail: false,
                panic: false,
            }),
            dispatched_at: 1001,
        });
        runner.wait_till_done().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            read_record(&store, &keys, "panicky").await.prev_result,
            RunResult::Failed
        );
        assert_eq!(
            read_record(&store, &keys, "after").await.prev_result,
            RunResult::Ok
        );
    }

    #[tokio::test]
    async fn hung_job_is_cut_off_by_timeout() {
        let (store, keys, runner) = runner_fixture(Some(Duration::from_millis(50)));
        seed_record(&store, &keys, "hung").await;

        runner.enq(Dispatch {
            job: Arc::new(SleepingJob {
                name: "hung".into(),
                sleep: Duration::from_secs(30),
                spans: Arc::new(Mutex::new(Vec::new())),
            }),
            dispatched_at: 1000,
        });
        runner.wait_till_done().await;

        let record = read_record(&store, &keys, "hung").await;
        assert_eq!(record.prev_result, RunResult::Failed);
    }

    #[tokio::test]
    async fn enq_after_stop_is_dropped() {
        let (_store, _keys, runner) = runner_fixture(None);
        let calls = Arc::new(AtomicUsize::new(0));

        runner.stop();
        // Give the abort a moment to land.
        tokio::time::sleep(Duration::from_millis(10)).await;

        runner.enq(Dispatch {
            job: Arc::new(CountingJob {
                name: "late".into(),
                calls: calls.clone(),
                fail: false,
                panic: false,
            }),
            dispatched_at: 1000,
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
