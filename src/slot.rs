//! Latest-wins handoff between workers.
//!
//! A `LatestSlot` is a bounded holding area. Producers never block: when the
//! slot is full the oldest entry is evicted to admit the new one. Consumers
//! always receive the newest entry available at call time; older entries
//! still queued behind it are discarded, since a stale frame or command is
//! worse than a skipped one.
//!
//! The check-evict-insert sequence runs under a single mutex so concurrent
//! producers cannot lose updates and a value is never delivered twice.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Capacity used for decoded frames.
pub const DEFAULT_FRAME_CAPACITY: usize = 2;

/// Capacity used for steering commands.
pub const DEFAULT_COMMAND_CAPACITY: usize = 5;

/// What happened to the producer's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PutOutcome {
    /// Stored without displacing anything.
    Stored,
    /// Stored after evicting the oldest entry.
    Evicted,
}

pub struct LatestSlot<T> {
    entries: Mutex<VecDeque<T>>,
    available: Condvar,
    capacity: usize,
    evicted: AtomicU64,
    skipped: AtomicU64,
}

impl<T> LatestSlot<T> {
    /// Create a slot. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Condvar::new(),
            capacity,
            evicted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert without blocking, evicting the oldest entry when full.
    pub fn put(&self, value: T) -> PutOutcome {
        let mut entries = self.lock();
        let mut outcome = PutOutcome::Stored;
        while entries.len() >= self.capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
            outcome = PutOutcome::Evicted;
        }
        entries.push_back(value);
        drop(entries);
        self.available.notify_one();
        outcome
    }

    /// Wait up to `timeout` for an entry and return the newest one.
    ///
    /// Entries older than the returned one are dropped.
    pub fn get(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        loop {
            if let Some(newest) = entries.pop_back() {
                let stale = entries.len() as u64;
                entries.clear();
                if stale > 0 {
                    self.skipped.fetch_add(stale, Ordering::Relaxed);
                }
                return Some(newest);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            entries = match self.available.wait_timeout(entries, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Non-blocking variant of `get`.
    pub fn try_get(&self) -> Option<T> {
        self.get(Duration::ZERO)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            capacity: self.capacity,
            len: self.len(),
            evicted: self.evicted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        // No operation leaves the deque half-updated; poisoning is ignored.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Counters for health logging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotStats {
    pub capacity: usize,
    pub len: usize,
    /// Entries displaced by a producer because the slot was full.
    pub evicted: u64,
    /// Entries discarded by a consumer because a newer one was present.
    pub skipped: u64,
}
