//! Elastic fallback tier shared by the tiered pools.
//!
//! This tier plays the part of a runtime-managed recycling facility: it is
//! unbounded in principle, cheap to hit from many threads, and gives no
//! retention guarantees. Values are spread over a set of lock-free queues
//! (shards); each thread has a home shard it pushes to and pops from first,
//! stealing from the other shards only when its own is empty.
//!
//! Retention is advisory. A soft cap on the number of retained values makes
//! `push` discard under pressure, and [`ElasticPool::trim_to`] (driven manually
//! or by a [`Trimmer`](crate::Trimmer)) releases cached values at any time.
//! Nothing placed here may be assumed to still be here later.

use std::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;

use crate::cpu::{CpuProbe, SystemCpus};

/// Default soft cap on the number of values an elastic tier keeps.
pub const DEFAULT_MAX_RETAINED: usize = 4096;

/// Upper bound on the shard count derived from the CPU count.
const MAX_DEFAULT_SHARDS: usize = 64;

/// Source of home-shard assignments, handed out round-robin to threads.
static NEXT_SLOT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static HOME_SLOT: Cell<Option<usize>> = const { Cell::new(None) };
}

#[inline]
fn home_slot() -> usize {
    HOME_SLOT.with(|slot| match slot.get() {
        Some(idx) => idx,
        None => {
            let idx = NEXT_SLOT.fetch_add(1, Ordering::Relaxed);
            slot.set(Some(idx));
            idx
        }
    })
}

/// Shape of an elastic tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElasticConfig {
    /// Number of independent queues. Zero is treated as one.
    pub shards: usize,
    /// Soft cap on retained values; pushes past it are discarded.
    pub max_retained: usize,
}

impl ElasticConfig {
    /// One shard per CPU, capped at 64.
    pub fn for_cpus(probe: &dyn CpuProbe) -> Self {
        Self {
            shards: probe.cpu_count().clamp(1, MAX_DEFAULT_SHARDS),
            max_retained: DEFAULT_MAX_RETAINED,
        }
    }

    /// Overrides the retention cap.
    pub fn with_max_retained(mut self, max_retained: usize) -> Self {
        self.max_retained = max_retained;
        self
    }
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self::for_cpus(&SystemCpus)
    }
}

/// Sharded, unbounded, advisory-retention pool.
///
/// # Performance
///
/// - **Push / pop on the home shard**: one lock-free queue operation plus one
///   atomic update of the shared counter
/// - **Pop miss on the home shard**: scans the other shards in order, so a
///   total miss costs one failed pop per shard
///
/// # Example
///
/// ```rust
/// use recyclepool::{ElasticConfig, ElasticPool};
///
/// let pool = ElasticPool::new(ElasticConfig { shards: 2, max_retained: 1 });
/// assert!(pool.push(1));
/// assert!(!pool.push(2)); // over the retention cap
/// assert_eq!(pool.pop(), Some(1));
/// ```
pub struct ElasticPool<T> {
    shards: Box<[CachePadded<SegQueue<T>>]>,
    /// Approximate count of values across all shards.
    retained: CachePadded<AtomicUsize>,
    max_retained: usize,
}

impl<T> ElasticPool<T> {
    /// Creates an empty tier shaped by `config`. Zero shards is treated as one.
    pub fn new(config: ElasticConfig) -> Self {
        let shards = config.shards.max(1);
        Self {
            shards: (0..shards)
                .map(|_| CachePadded::new(SegQueue::new()))
                .collect(),
            retained: CachePadded::new(AtomicUsize::new(0)),
            max_retained: config.max_retained,
        }
    }

    #[inline]
    fn home(&self) -> usize {
        home_slot() % self.shards.len()
    }

    /// Offers a value to the tier.
    ///
    /// Returns `false` when the value was discarded because the tier is at
    /// its retention cap.
    pub fn push(&self, value: T) -> bool {
        if self.retained.fetch_add(1, Ordering::AcqRel) >= self.max_retained {
            self.retained.fetch_sub(1, Ordering::AcqRel);
            log::trace!("elastic tier at retention cap {}, discarding", self.max_retained);
            return false;
        }

        self.shards[self.home()].push(value);
        true
    }

    /// Takes a value from the home shard, falling back to the other shards.
    pub fn pop(&self) -> Option<T> {
        let home = self.home();
        let n = self.shards.len();
        for i in 0..n {
            if let Some(value) = self.shards[(home + i) % n].pop() {
                self.retained.fetch_sub(1, Ordering::AcqRel);
                return Some(value);
            }
        }
        None
    }

    /// Approximate number of retained values.
    pub fn len(&self) -> usize {
        self.retained.load(Ordering::Acquire)
    }

    /// `true` when nothing is retained, subject to the same approximation as `len`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of independent queues.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Releases cached values until at most `keep` remain.
    ///
    /// Returns how many values were dropped. Concurrent pushes may leave the
    /// tier slightly above `keep` once this returns.
    pub fn trim_to(&self, keep: usize) -> usize {
        let mut released = 0;
        'outer: for shard in self.shards.iter() {
            while self.len() > keep {
                match shard.pop() {
                    Some(value) => {
                        self.retained.fetch_sub(1, Ordering::AcqRel);
                        drop(value);
                        released += 1;
                    }
                    None => continue 'outer,
                }
            }
            break;
        }
        released
    }

    /// Drops every cached value.
    pub fn clear(&self) -> usize {
        self.trim_to(0)
    }
}

impl<T: Send> crate::trim::Trim for ElasticPool<T> {
    /// Halves the retained population.
    ///
    /// Two consecutive passes with no intervening returns release roughly
    /// three quarters of what was cached, so idle values decay away while a
    /// busy pool refills between passes.
    fn trim(&self) -> usize {
        self.trim_to(self.len() / 2)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::trim::Trim;

    fn config(shards: usize, max_retained: usize) -> ElasticConfig {
        ElasticConfig {
            shards,
            max_retained,
        }
    }

    #[test]
    fn test_push_pop_same_thread() {
        let pool = ElasticPool::new(config(4, 16));
        assert!(pool.push(1));
        assert!(pool.push(2));
        assert_eq!(pool.len(), 2);

        let mut got = vec![pool.pop().unwrap(), pool.pop().unwrap()];
        got.sort();
        assert_eq!(got, vec![1, 2]);
        assert!(pool.pop().is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_retention_cap_discards() {
        let pool = ElasticPool::new(config(2, 3));
        assert!(pool.push(1));
        assert!(pool.push(2));
        assert!(pool.push(3));
        assert!(!pool.push(4));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_zero_shards_is_one() {
        let pool: ElasticPool<u8> = ElasticPool::new(config(0, 8));
        assert_eq!(pool.shard_count(), 1);
    }

    #[test]
    fn test_steals_from_other_shards() {
        let pool = Arc::new(ElasticPool::new(config(8, 64)));
        let producer = pool.clone();
        thread::spawn(move || {
            for i in 0..10 {
                producer.push(i);
            }
        })
        .join()
        .unwrap();

        let mut drained = 0;
        while pool.pop().is_some() {
            drained += 1;
        }
        assert_eq!(drained, 10);
    }

    #[test]
    fn test_trim_halves_and_clear_empties() {
        let pool = ElasticPool::new(config(3, 100));
        for i in 0..40 {
            pool.push(i);
        }

        assert_eq!(pool.trim(), 20);
        assert_eq!(pool.len(), 20);

        assert_eq!(pool.trim_to(5), 15);
        assert_eq!(pool.len(), 5);

        assert_eq!(pool.clear(), 5);
        assert!(pool.pop().is_none());
    }

    #[test]
    fn test_concurrent_traffic_keeps_count_consistent() {
        let pool = Arc::new(ElasticPool::new(config(4, 1 << 20)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    let mut popped = 0;
                    for i in 0..1000 {
                        pool.push(i);
                        if i % 2 == 0 && pool.pop().is_some() {
                            popped += 1;
                        }
                    }
                    popped
                })
            })
            .collect();
        let popped: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        let mut remaining = 0;
        while pool.pop().is_some() {
            remaining += 1;
        }
        assert_eq!(remaining + popped, 4000);
        assert_eq!(pool.len(), 0);
    }
}
