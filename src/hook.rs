//! Hit-ratio instrumentation shared by every pool.
//!
//! A hook is a sink for two monotonically increasing counters: the number of
//! `get` attempts (`total`) and the number of those attempts served from a
//! cache tier instead of a fresh construction (`hit`). Pools only ever call
//! into a hook from `get`, never from `put`.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Receiver of hit-ratio events.
///
/// Implement this to forward pool efficiency into an external metrics
/// registry, or use [`HitCounters`] for an in-process pair of counters.
pub trait HitRatioHook: Send + Sync {
    fn incr_total(&self, n: u64);

    fn incr_hit(&self, n: u64);
}

/// In-process counters implementing [`HitRatioHook`].
///
/// The two counters live on separate cache lines: every `get` bumps `total`
/// while only cache-served ones bump `hit`, and keeping them apart stops
/// the hot counter from dragging the other one between cores.
#[derive(Debug, Default)]
pub struct HitCounters {
    total: CachePadded<AtomicU64>,
    hit: CachePadded<AtomicU64>,
}

impl HitCounters {
    /// Both counters start at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads both counters.
    ///
    /// `hit` is loaded before `total`, so a snapshot taken while other
    /// threads are calling `get` still satisfies `hit <= total`.
    pub fn snapshot(&self) -> HitStats {
        let hit = self.hit.load(Ordering::Acquire);
        let total = self.total.load(Ordering::Acquire);
        HitStats { total, hit }
    }
}

impl HitRatioHook for HitCounters {
    #[inline]
    fn incr_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::Release);
    }

    #[inline]
    fn incr_hit(&self, n: u64) {
        self.hit.fetch_add(n, Ordering::Release);
    }
}

/// Point-in-time view of a [`HitCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HitStats {
    pub total: u64,
    pub hit: u64,
}

impl HitStats {
    /// Fraction of `get` calls served from cache, `0.0` when nothing was requested.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hit as f64 / self.total as f64
        }
    }

    /// `get` calls that had to construct a value.
    pub fn misses(&self) -> u64 {
        self.total.saturating_sub(self.hit)
    }
}

/// Hook built from a pair of closures, one per counter.
///
/// # Example
///
/// ```rust
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use recyclepool::{FnHook, HitRatioHook};
///
/// static GETS: AtomicU64 = AtomicU64::new(0);
/// static HITS: AtomicU64 = AtomicU64::new(0);
///
/// let hook = FnHook::new(
///     |n| {
///         GETS.fetch_add(n, Ordering::Relaxed);
///     },
///     |n| {
///         HITS.fetch_add(n, Ordering::Relaxed);
///     },
/// );
/// hook.incr_total(1);
/// assert_eq!(GETS.load(Ordering::Relaxed), 1);
/// ```
pub struct FnHook<T, H> {
    total: T,
    hit: H,
}

impl<T, H> FnHook<T, H>
where
    T: Fn(u64) + Send + Sync,
    H: Fn(u64) + Send + Sync,
{
    /// `total` receives every `incr_total`, `hit` every `incr_hit`.
    pub fn new(total: T, hit: H) -> Self {
        Self { total, hit }
    }
}

impl<T, H> HitRatioHook for FnHook<T, H>
where
    T: Fn(u64) + Send + Sync,
    H: Fn(u64) + Send + Sync,
{
    fn incr_total(&self, n: u64) {
        (self.total)(n)
    }

    fn incr_hit(&self, n: u64) {
        (self.hit)(n)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_counters_snapshot() {
        let counters = HitCounters::new();
        counters.incr_total(3);
        counters.incr_hit(1);

        let stats = counters.snapshot();
        assert_eq!(stats, HitStats { total: 3, hit: 1 });
        assert_eq!(stats.misses(), 2);
        assert!((stats.ratio() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_ratio() {
        assert_eq!(HitStats::default().ratio(), 0.0);
    }

    #[test]
    fn test_fn_hook_forwards() {
        let total = Arc::new(AtomicU64::new(0));
        let hit = Arc::new(AtomicU64::new(0));
        let (t, h) = (total.clone(), hit.clone());
        let hook = FnHook::new(
            move |n| {
                t.fetch_add(n, Ordering::Relaxed);
            },
            move |n| {
                h.fetch_add(n, Ordering::Relaxed);
            },
        );

        hook.incr_total(2);
        hook.incr_hit(1);
        assert_eq!(total.load(Ordering::Relaxed), 2);
        assert_eq!(hit.load(Ordering::Relaxed), 1);
    }
}
