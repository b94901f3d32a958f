use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Minimal primitive interface every coordination backend must provide.
///
/// Keys and values are opaque strings; scores are whole epoch seconds.
/// Semantics follow the usual shared-KV conventions:
///
/// - [`set_if_absent`](CoordinationStore::set_if_absent) is atomic and the
///   only way to create a key with a time-to-live. An expired key counts as
///   absent.
/// - [`compare_and_swap`](CoordinationStore::compare_and_swap) succeeds only
///   when the key currently holds `expected` (and is not expired). The
///   swapped-in value persists **without** a TTL; callers that need
///   staleness detection after a swap must encode an expiry into the value
///   itself, which is exactly what the distributed lock does.
/// - The scored-set operations model a priority queue:
///   [`zadd`](CoordinationStore::zadd) inserts or updates a member's score,
///   [`zpeek_min`](CoordinationStore::zpeek_min) returns the lowest-scored
///   member without removing it (ties broken lexicographically), and
///   [`zremove`](CoordinationStore::zremove) deletes a member.
///
/// All operations may fail with [`StoreError`](crate::StoreError) when the
/// backend is unreachable; callers treat that as fatal for the current
/// operation and rely on their own retry cadence.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read a key. Returns `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditionally write a key with no expiry.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Atomically create `key` with the given time-to-live.
    ///
    /// Returns `true` when the key was created, `false` when a live value
    /// already existed.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically replace the value of `key` iff it currently equals
    /// `expected`. Returns `false` when the key is absent, expired, or holds
    /// a different value.
    async fn compare_and_swap(&self, key: &str, expected: &str, new: &str) -> Result<bool>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Insert `member` into the scored set, or update its score.
    async fn zadd(&self, set: &str, member: &str, score: i64) -> Result<()>;

    /// Peek the member with the lowest score. Returns `None` on an empty set.
    async fn zpeek_min(&self, set: &str) -> Result<Option<(String, i64)>>;

    /// Remove `member` from the scored set. Absent members are a no-op.
    async fn zremove(&self, set: &str, member: &str) -> Result<()>;
}
