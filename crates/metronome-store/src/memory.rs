use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use metronome_core::Clock;

use crate::error::{Result, StoreError};
use crate::store::CoordinationStore;

/// In-memory coordination store.
///
/// Thread-safe: all state sits behind one `Mutex`, so every operation is
/// atomic with respect to every other, the same guarantee a real backend
/// gives per command. TTLs are checked lazily against the injected [`Clock`],
/// which lets tests expire a lock token by advancing a `ManualClock` instead
/// of sleeping.
///
/// Cloning the handle shares the underlying state, so N simulated "processes"
/// in one test can share a single store.
#[derive(Clone)]
pub struct MemoryStore {
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    kv: HashMap<String, Entry>,
    // zset name -> member -> score
    zsets: HashMap<String, BTreeMap<String, i64>>,
}

struct Entry {
    value: String,
    expires_at: Option<i64>,
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".into()))
    }

    /// Drop `key` if its TTL has passed. Expiry is `expires_at <= now` so a
    /// token and its store TTL lapse at the same instant.
    fn purge_expired(inner: &mut Inner, key: &str, now: i64) {
        if let Some(entry) = inner.kv.get(key) {
            if entry.expires_at.is_some_and(|at| at <= now) {
                inner.kv.remove(key);
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = self.clock.epoch_secs();
        let mut inner = self.lock()?;
        Self::purge_expired(&mut inner, key, now);
        Ok(inner.kv.get(key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = self.clock.epoch_secs();
        let mut inner = self.lock()?;
        Self::purge_expired(&mut inner, key, now);
        if inner.kv.contains_key(key) {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl.as_secs() as i64),
            },
        );
        Ok(true)
    }

    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool> {
        let now = self.clock.epoch_secs();
        let mut inner = self.lock()?;
        Self::purge_expired(&mut inner, key, now);
        match inner.kv.get_mut(key) {
            Some(entry) if entry.value == expected => {
                entry.value = new.to_string();
                // A swapped value carries no store-level TTL; staleness is
                // encoded in the value by callers that need it.
                entry.expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.kv.remove(key);
        Ok(())
    }

    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .zsets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zpeek_min(&self, set: &str) -> Result<Option<(String, i64)>> {
        let inner = self.lock()?;
        let Some(members) = inner.zsets.get(set) else {
            return Ok(None);
        };
        // BTreeMap iterates members lexicographically, so the first entry at
        // the minimum score also settles ties deterministically.
        let min = members
            .iter()
            .min_by_key(|&(member, score)| (*score, member))
            .map(|(member, score)| (member.clone(), *score));
        Ok(min)
    }

    async fn zremove(&self, set: &str, member: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if let Some(members) = inner.zsets.get_mut(set) {
            members.remove(member);
            if members.is_empty() {
                inner.zsets.remove(set);
            }
        }
        Ok(())
    }
}
