//! Connection slot arena and host-keyed idle pool.
//!
//! Connections live in a fixed-size arena indexed by a stable integer id,
//! with a free list of indices: O(1) allocate/release and no per-request
//! heap churn. The idle pool maps remote host identity to ids of parked,
//! reusable connections.
//!
//! This is the single piece of cross-thread mutable shared state in the
//! core. Every mutation (claim, check-in, sweep eviction) happens under one
//! short-held mutex that never spans a network I/O call. Claiming is
//! remove-then-use: once a connection leaves the pool exactly one owner
//! holds it, so a concurrent submitter and timeout sweep can never both win
//! the same connection.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

/// Stable arena index identifying a connection slot.
pub type ConnId = usize;

/// Remote endpoint identity used for keepalive reuse.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostKey {
    pub host: String,
    pub port: u16,
}

/// What the pool needs to know about a pooled connection.
pub trait PoolEntry: Send {
    fn id(&self) -> ConnId;
    fn last_activity(&self) -> Instant;
    fn requests_processed(&self) -> usize;
    /// Release transport resources. Must be idempotent.
    fn close(&mut self);
}

enum Slot<C> {
    /// Unallocated; id is on the free list.
    Free,
    /// Checked out to exactly one worker.
    Busy,
    /// Parked for reuse; the pool owns the connection value.
    Idle(Box<C>),
}

struct Inner<C> {
    slots: Vec<Slot<C>>,
    free: Vec<ConnId>,
    idle: HashMap<HostKey, VecDeque<ConnId>>,
}

pub struct ConnPool<C: PoolEntry> {
    inner: Mutex<Inner<C>>,
}

impl<C: PoolEntry> ConnPool<C> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || Slot::Free);
        // Pop order gives out low ids first.
        let free = (0..capacity).rev().collect();
        Self {
            inner: Mutex::new(Inner { slots, free, idle: HashMap::new() }),
        }
    }

    /// Claim a free slot for a new connection. Returns `None` when the
    /// arena is exhausted (retryable resource exhaustion, not a fault).
    pub fn allocate(&self) -> Option<ConnId> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.free.pop()?;
        inner.slots[id] = Slot::Busy;
        Some(id)
    }

    /// Park a connection for keepalive reuse under its host key.
    pub fn check_in_idle(&self, key: HostKey, conn: Box<C>) {
        let id = conn.id();
        let mut inner = self.inner.lock().unwrap();
        inner.slots[id] = Slot::Idle(conn);
        inner.idle.entry(key).or_default().push_back(id);
    }

    /// Claim an idle connection for `key` whose completed-request count is
    /// below `max_requests`. The connection is removed before it is
    /// returned, so no two requests can share it.
    ///
    /// Connections found at the cap are closed and their slots freed during
    /// the scan; they are never handed out again.
    pub fn claim_idle(&self, key: &HostKey, max_requests: usize) -> Option<Box<C>> {
        let mut inner = self.inner.lock().unwrap();
        while let Some(id) = inner.idle.get_mut(key)?.pop_front() {
            match std::mem::replace(&mut inner.slots[id], Slot::Busy) {
                Slot::Idle(mut conn) => {
                    if conn.requests_processed() < max_requests {
                        return Some(conn);
                    }
                    conn.close();
                    inner.slots[id] = Slot::Free;
                    inner.free.push(id);
                }
                other => {
                    // Stale idle-list entry; the slot was already
                    // reclaimed through the close path.
                    inner.slots[id] = other;
                }
            }
        }
        None
    }

    /// Return a checked-out slot to the free list. Safe to call repeatedly
    /// from error paths; releasing an already free slot has no effect.
    pub fn free_slot(&self, id: ConnId) {
        let mut inner = self.inner.lock().unwrap();
        match inner.slots[id] {
            Slot::Busy => {
                inner.slots[id] = Slot::Free;
                inner.free.push(id);
            }
            Slot::Free => {
                tracing::debug!(conn_id = id, "slot already free");
            }
            Slot::Idle(_) => {
                tracing::error!(conn_id = id, "free_slot on idle slot; claim it first");
            }
        }
    }

    /// Claim every idle connection whose last activity predates
    /// `older_than`. The caller owns the returned connections and drives
    /// them through the close path.
    pub fn sweep_idle_expired(&self, older_than: Instant) -> Vec<Box<C>> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        let mut expired = Vec::new();
        let mut expired_ids = Vec::new();
        for ids in inner.idle.values() {
            for &id in ids {
                if let Slot::Idle(conn) = &inner.slots[id] {
                    if conn.last_activity() < older_than {
                        expired_ids.push(id);
                    }
                }
            }
        }
        for id in expired_ids {
            if let Slot::Idle(conn) = std::mem::replace(&mut inner.slots[id], Slot::Busy) {
                expired.push(conn);
            }
        }
        let slots = &inner.slots;
        for ids in inner.idle.values_mut() {
            ids.retain(|id| matches!(slots[*id], Slot::Idle(_)));
        }
        inner.idle.retain(|_, ids| !ids.is_empty());
        expired
    }

    /// Idle connections currently parked for `key`.
    pub fn idle_count(&self, key: &HostKey) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.idle.get(key).map(|ids| ids.len()).unwrap_or(0)
    }

    /// Free slots remaining in the arena.
    pub fn available(&self) -> usize {
        self.inner.lock().unwrap().free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeConn {
        id: ConnId,
        last_activity: Instant,
        requests_processed: usize,
        closed: bool,
    }

    impl FakeConn {
        fn new(id: ConnId) -> Self {
            Self { id, last_activity: Instant::now(), requests_processed: 0, closed: false }
        }
    }

    impl PoolEntry for FakeConn {
        fn id(&self) -> ConnId {
            self.id
        }
        fn last_activity(&self) -> Instant {
            self.last_activity
        }
        fn requests_processed(&self) -> usize {
            self.requests_processed
        }
        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn key() -> HostKey {
        HostKey { host: "example.com".to_string(), port: 80 }
    }

    #[test]
    fn allocate_until_exhausted() {
        let pool: ConnPool<FakeConn> = ConnPool::new(2);
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn claim_removes_before_use() {
        let pool: ConnPool<FakeConn> = ConnPool::new(4);
        let id = pool.allocate().unwrap();
        pool.check_in_idle(key(), Box::new(FakeConn::new(id)));
        assert_eq!(pool.idle_count(&key()), 1);

        let conn = pool.claim_idle(&key(), 10).unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(pool.idle_count(&key()), 0);
        assert!(pool.claim_idle(&key(), 10).is_none());
    }

    #[test]
    fn claim_skips_and_frees_capped_connections() {
        let pool: ConnPool<FakeConn> = ConnPool::new(4);
        let id = pool.allocate().unwrap();
        let mut conn = FakeConn::new(id);
        conn.requests_processed = 2;
        pool.check_in_idle(key(), Box::new(conn));

        assert!(pool.claim_idle(&key(), 2).is_none());
        // The capped connection's slot went back to the free list.
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn under_cap_connection_is_reusable() {
        let pool: ConnPool<FakeConn> = ConnPool::new(4);
        let id = pool.allocate().unwrap();
        let mut conn = FakeConn::new(id);
        conn.requests_processed = 1;
        pool.check_in_idle(key(), Box::new(conn));

        assert!(pool.claim_idle(&key(), 2).is_some());
    }

    #[test]
    fn free_slot_is_idempotent() {
        let pool: ConnPool<FakeConn> = ConnPool::new(2);
        let id = pool.allocate().unwrap();
        pool.free_slot(id);
        pool.free_slot(id);
        pool.free_slot(id);
        assert_eq!(pool.available(), 2);
        // Both slots still allocate exactly once each.
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_some());
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn sweep_claims_only_expired() {
        let pool: ConnPool<FakeConn> = ConnPool::new(4);
        let stale_id = pool.allocate().unwrap();
        let fresh_id = pool.allocate().unwrap();

        let mut stale = FakeConn::new(stale_id);
        stale.last_activity = Instant::now() - Duration::from_secs(60);
        pool.check_in_idle(key(), Box::new(stale));
        pool.check_in_idle(key(), Box::new(FakeConn::new(fresh_id)));

        let expired = pool.sweep_idle_expired(Instant::now() - Duration::from_secs(5));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id(), stale_id);
        assert_eq!(pool.idle_count(&key()), 1);
    }

    #[test]
    fn claim_and_sweep_race_has_one_winner() {
        use std::sync::Arc;

        for _ in 0..64 {
            let pool: Arc<ConnPool<FakeConn>> = Arc::new(ConnPool::new(2));
            let id = pool.allocate().unwrap();
            let mut conn = FakeConn::new(id);
            conn.last_activity = Instant::now() - Duration::from_secs(60);
            pool.check_in_idle(key(), Box::new(conn));

            let claimer = {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.claim_idle(&key(), 10).is_some())
            };
            let sweeper = {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    !pool.sweep_idle_expired(Instant::now()).is_empty()
                })
            };

            let claimed = claimer.join().unwrap();
            let swept = sweeper.join().unwrap();
            assert!(
                claimed != swept,
                "exactly one of claim/sweep must win (claimed={claimed}, swept={swept})"
            );
        }
    }
}
