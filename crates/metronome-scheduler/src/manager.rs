use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use metronome_core::{Clock, SchedulerConfig};
use metronome_store::CoordinationStore;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::lock::DistributedLock;
use crate::record::{next_occurrence, Keys, ScheduleRecord};
use crate::runner::{Dispatch, Runner};
use crate::types::{Job, Recurrence};

/// A locally registered job with its recurrence policy.
struct Registered {
    job: Arc<dyn Job>,
    recurrence: Recurrence,
}

/// Orchestrates scheduling decisions for one process.
///
/// Every cooperating process constructs one `Manager` against the shared
/// coordination store (same namespace) and drives it on a periodic cadence,
/// either by calling [`tick`](Manager::tick) itself or through [`run`]. The
/// manager owns the process-local [`Runner`] and the distributed lock; all
/// shared-state mutation happens inside the lock's critical section, so a
/// due occurrence is dispatched by exactly one process fleet-wide.
pub struct Manager {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    keys: Keys,
    lock: DistributedLock,
    runner: Runner,
    registry: DashMap<String, Registered>,
    /// Identifies this process in log output only.
    node_id: Uuid,
}

impl Manager {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        let keys = Keys::new(&config.namespace);
        let lock = DistributedLock::new(
            store.clone(),
            clock.clone(),
            keys.lock(),
            Duration::from_secs(config.lock_ttl_secs),
        );
        let runner = Runner::new(
            store.clone(),
            keys.clone(),
            config.job_timeout_secs.map(Duration::from_secs),
        );
        let node_id = Uuid::new_v4();
        info!(node = %node_id, namespace = %config.namespace, "scheduler manager created");

        Self {
            store,
            clock,
            config,
            keys,
            lock,
            runner,
            registry: DashMap::new(),
            node_id,
        }
    }

    /// Recur `job` every `every_secs` seconds with the config's default
    /// jitter ratio. See [`ensure_schedule`](Manager::ensure_schedule).
    pub async fn ensure_schedule_every(&self, job: Arc<dyn Job>, every_secs: u64) -> Result<()> {
        let recurrence =
            Recurrence::every_secs(every_secs).with_random_ratio(self.config.random_ratio);
        self.ensure_schedule(job, recurrence).await
    }

    /// Idempotently make `job` schedulable.
    ///
    /// Registers the job in this process (required before its occurrences can
    /// execute here) and, under the lock, creates its schedule record with a
    /// jittered first occurrence. A record that already has a pending
    /// `next_run_at` is left untouched; re-registration never re-jitters a
    /// pending occurrence.
    pub async fn ensure_schedule(&self, job: Arc<dyn Job>, recurrence: Recurrence) -> Result<()> {
        recurrence.validate()?;
        let name = job.name().to_string();
        self.registry
            .insert(name.clone(), Registered { job, recurrence });

        self.lock
            .with_lock(|| async {
                let key = self.keys.job(&name);
                let existing = match self.store.get(&key).await? {
                    Some(json) => Some(ScheduleRecord::from_json(&json)?),
                    None => None,
                };
                if let Some(record) = &existing {
                    if let Some(next) = record.next_run_at {
                        debug!(job = %name, next_run_at = next, "job already scheduled");
                        return Ok(());
                    }
                }

                // Absent record, or one stranded with next_run_at = None by a
                // crash between the in-flight mark and the reschedule: give
                // it a fresh occurrence either way.
                let mut record = existing.unwrap_or_default();
                let next = next_occurrence(self.clock.epoch_secs(), &recurrence);
                record.next_run_at = Some(next);
                self.store.set(&key, &record.to_json()?).await?;
                self.store.zadd(&self.keys.due_queue(), &name, next).await?;
                info!(job = %name, next_run_at = next, "job scheduled");
                Ok(())
            })
            .await
    }

    /// Delete `job`'s schedule record and due-queue entry. Removing an
    /// absent job is a no-op.
    pub async fn remove(&self, name: &str) -> Result<()> {
        self.registry.remove(name);
        self.lock
            .with_lock(|| async {
                self.store.delete(&self.keys.job(name)).await?;
                self.store.zremove(&self.keys.due_queue(), name).await?;
                info!(job = %name, "job removed");
                Ok(())
            })
            .await
    }

    /// Read-only lookup of the job's next planned occurrence.
    ///
    /// Deliberately lock-free: the answer may be stale against a concurrent
    /// tick, which is fine for observability.
    pub async fn next_run(&self, name: &str) -> Result<Option<i64>> {
        match self.store.get(&self.keys.job(name)).await? {
            Some(json) => Ok(ScheduleRecord::from_json(&json)?.next_run_at),
            None => Ok(None),
        }
    }

    /// One scheduling decision step.
    ///
    /// Under the lock: peek the earliest due-queue entry; if it is due, mark
    /// its record in flight, advance its schedule to the next jittered
    /// occurrence, and hand it to the local runner. The schedule advances
    /// before the body executes, so lock hold time stays O(1) store
    /// operations and a slow job never delays other scheduling decisions.
    ///
    /// Returns `true` when a job was dispatched to this process's runner.
    pub async fn tick(&self) -> Result<bool> {
        self.lock
            .with_lock(|| async {
                let now = self.clock.epoch_secs();
                let Some((name, score)) = self.store.zpeek_min(&self.keys.due_queue()).await?
                else {
                    return Ok(false);
                };
                if score > now {
                    return Ok(false);
                }

                let Some(entry) = self.registry.get(&name) else {
                    // Registered in another process but not here. Leave the
                    // entry; a process that knows the job will dispatch it.
                    warn!(job = %name, "due job not registered in this process");
                    return Ok(false);
                };
                let job = entry.job.clone();
                let recurrence = entry.recurrence;
                drop(entry);

                let key = self.keys.job(&name);
                let mut record = match self.store.get(&key).await? {
                    Some(json) => ScheduleRecord::from_json(&json)?,
                    None => ScheduleRecord::default(),
                };

                // Mark the dispatch in flight, then advance the schedule,
                // both inside this critical section, so no other process can
                // observe the occurrence as still pending or dispatch it
                // twice.
                record.next_run_at = None;
                self.store.set(&key, &record.to_json()?).await?;
                self.store.zremove(&self.keys.due_queue(), &name).await?;

                let next = next_occurrence(now, &recurrence);
                record.next_run_at = Some(next);
                self.store.set(&key, &record.to_json()?).await?;
                self.store.zadd(&self.keys.due_queue(), &name, next).await?;

                self.runner.enq(Dispatch {
                    job,
                    dispatched_at: now,
                });
                info!(job = %name, node = %self.node_id, next_run_at = next, "job dispatched");
                Ok(true)
            })
            .await
    }

    /// [`tick`](Manager::tick), then block until this process's runner has
    /// drained. For test harnesses and callers needing synchronous behavior.
    pub async fn blocking_tick(&self) -> Result<bool> {
        let dispatched = self.tick().await?;
        self.runner.wait_till_done().await;
        Ok(dispatched)
    }

    /// Stop this process's runner. Other processes are unaffected.
    pub fn stop(&self) {
        self.runner.stop();
    }

    /// Snapshot of every locally registered job and its persisted record,
    /// sorted by name. Read-only, lock-free.
    pub async fn jobs(&self) -> Result<Vec<(String, ScheduleRecord)>> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let record = match self.store.get(&self.keys.job(&name)).await? {
                Some(json) => ScheduleRecord::from_json(&json)?,
                None => ScheduleRecord::default(),
            };
            out.push((name, record));
        }
        Ok(out)
    }
}

/// Drive `manager` on its configured cadence until `shutdown` broadcasts
/// `true`.
///
/// Every process of the fleet runs this same loop; the distributed lock
/// inside [`Manager::tick`] decides which of them advances a due job.
pub async fn run(manager: Arc<Manager>, mut shutdown: watch::Receiver<bool>) {
    let cadence = Duration::from_secs(manager.config.tick_interval_secs.max(1));
    info!(node = %manager.node_id, cadence_secs = cadence.as_secs(), "scheduler loop started");

    let mut interval = tokio::time::interval(cadence);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = manager.tick().await {
                    error!("scheduler tick error: {e}");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("scheduler loop shutting down");
                    manager.stop();
                    break;
                }
            }
        }
    }
}
