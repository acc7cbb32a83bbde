//! Self-sizing two-tier pool.
//!
//! [`FixedCachePool`] pairs a bounded fast tier, sized from the CPU count,
//! with an [`ElasticPool`] that absorbs overflow. Where [`FixedPool`]
//! drops a value the fast tier has no room for, this pool keeps it in the
//! elastic tier instead.
//!
//! [`FixedPool`]: crate::FixedPool

use crate::{
    cpu::{CpuProbe, SystemCpus},
    elastic::{ElasticConfig, ElasticPool},
    fixed::Factory,
    freelist::FreeList,
    trim::Trim,
};

/// Lower clamp for the CPU-derived fast-tier capacity.
pub const MIN_CACHE_POOL_CAPACITY: usize = 4;

/// Upper clamp for the CPU-derived fast-tier capacity.
pub const MAX_CACHE_POOL_CAPACITY: usize = 256;

/// Fast-tier capacity for a machine with `cpus` CPUs: two slots per CPU,
/// clamped to `[4, 256]`.
pub fn default_capacity(cpus: usize) -> usize {
    cpus.saturating_mul(2)
        .clamp(MIN_CACHE_POOL_CAPACITY, MAX_CACHE_POOL_CAPACITY)
}

/// Two-tier pool: a bounded fast tier backed by an elastic tier.
///
/// # Example
///
/// ```rust
/// use recyclepool::FixedCachePool;
///
/// let pool = FixedCachePool::with_capacity(2).with_factory(|| Vec::<u8>::with_capacity(256));
/// for _ in 0..3 {
///     pool.put(Vec::with_capacity(256));
/// }
/// // Two values fit the fast tier, the third spilled into the elastic tier.
/// assert_eq!(pool.len(), 2);
/// assert_eq!(pool.elastic_len(), 1);
/// ```
pub struct FixedCachePool<T> {
    cache: FreeList<T>,
    pool: ElasticPool<T>,
    factory: Option<Factory<T>>,
}

impl<T> FixedCachePool<T> {
    /// Sizes the fast tier from the CPUs visible to this process.
    pub fn new() -> Self {
        Self::with_probe(&SystemCpus)
    }

    /// Sizes the fast tier with [`default_capacity`] of the CPU count that
    /// `probe` reports, and shards the elastic tier to match.
    pub fn with_probe(probe: &dyn CpuProbe) -> Self {
        let cpus = probe.cpu_count().max(1);
        let capacity = default_capacity(cpus);
        log::debug!(
            "fixed cache pool sized to {} slots for {} cpus",
            capacity,
            cpus
        );
        Self {
            cache: FreeList::new(capacity),
            pool: ElasticPool::new(ElasticConfig::for_cpus(probe)),
            factory: None,
        }
    }

    /// Uses an explicit fast-tier capacity instead of a CPU-derived one.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: FreeList::new(capacity),
            pool: ElasticPool::new(ElasticConfig::default()),
            factory: None,
        }
    }

    /// Constructor for a miss in both tiers.
    ///
    /// Without one, such a miss makes [`get`](FixedCachePool::get) return `None`.
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.factory = Some(Box::new(factory));
        self
    }

    /// Rebuilds the elastic tier with `config`.
    pub fn with_elastic_config(mut self, config: ElasticConfig) -> Self {
        self.pool = ElasticPool::new(config);
        self
    }

    /// Replaces the fast tier with one of `size` slots.
    ///
    /// Values cached in the old fast tier are dropped; the elastic tier is
    /// left alone.
    pub fn reset(&mut self, size: usize) {
        log::debug!("fixed cache pool reset to {} slots", size);
        self.cache = FreeList::new(size);
    }

    /// Takes a value from the fast tier, then the elastic tier, and finally
    /// from the factory. Never blocks.
    pub fn get(&self) -> Option<T> {
        if let Some(v) = self.cache.pop() {
            return Some(v);
        }

        self.pool
            .pop()
            .or_else(|| self.factory.as_ref().map(|new| new()))
    }

    /// Returns `v` to the fast tier, spilling into the elastic tier when full.
    pub fn put(&self, v: T) {
        if let Err(v) = self.cache.push(v) {
            self.pool.push(v);
        }
    }

    /// Slots in the fast tier.
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Occupancy of the fast tier.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// `true` when the fast tier holds nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate occupancy of the elastic tier.
    pub fn elastic_len(&self) -> usize {
        self.pool.len()
    }
}

impl<T> Default for FixedCachePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Trim for FixedCachePool<T> {
    fn trim(&self) -> usize {
        self.pool.trim()
    }
}
