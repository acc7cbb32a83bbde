//! Fixed-capacity pools that drop on overflow.
//!
//! [`FixedPool`] is the general form: the factory is optional and a
//! [`HitRatioHook`] may observe it. [`FixedPoolV2`] always has a factory, so
//! `get` hands back a value directly instead of an `Option`.
//!
//! Both pools are best-effort caches. A `put` into a full pool silently
//! discards the value, which is the backpressure valve that keeps a burst of
//! returns from growing the pool without bound.

use std::sync::Arc;

use crate::{freelist::FreeList, hook::HitRatioHook};

/// Constructor invoked when a pool has nothing cached.
pub type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Bounded pool with an optional factory and optional instrumentation.
///
/// # Hit accounting
///
/// Every [`get`](FixedPool::get) reports one `total` to the hook; a `get`
/// satisfied from the free-list additionally reports one `hit`. `put` never
/// touches the hook.
///
/// # Example
///
/// ```rust
/// use recyclepool::FixedPool;
///
/// let pool: FixedPool<Vec<u8>> = FixedPool::new(4, Some(Box::new(|| Vec::with_capacity(64))), None);
/// let mut buf = pool.get().unwrap();
/// buf.extend_from_slice(b"payload");
/// buf.clear();
/// pool.put(buf);
/// assert_eq!(pool.len(), 1);
/// ```
pub struct FixedPool<T> {
    pool: FreeList<T>,
    factory: Option<Factory<T>>,
    hook: Option<Arc<dyn HitRatioHook>>,
}

impl<T> FixedPool<T> {
    /// Creates a pool holding at most `capacity` idle values.
    ///
    /// # Parameters
    ///
    /// * `capacity` - Slots in the free-list. Zero gives a pool that caches
    ///   nothing and serves every `get` from the factory.
    /// * `factory` - Constructor used on a miss. Without one a miss yields `None`.
    /// * `hook` - Receiver for hit-ratio events.
    pub fn new(
        capacity: usize,
        factory: Option<Factory<T>>,
        hook: Option<Arc<dyn HitRatioHook>>,
    ) -> Self {
        log::debug!("fixed pool configured with capacity {}", capacity);
        Self {
            pool: FreeList::new(capacity),
            factory,
            hook,
        }
    }

    /// Replaces the storage, factory, and hook.
    ///
    /// Anything cached before the reset is dropped. Taking `&mut self` means
    /// a reset can never race an in-flight `get` or `put`.
    pub fn reset(
        &mut self,
        capacity: usize,
        factory: Option<Factory<T>>,
        hook: Option<Arc<dyn HitRatioHook>>,
    ) {
        log::debug!("fixed pool reset to capacity {}", capacity);
        self.pool = FreeList::new(capacity);
        self.factory = factory;
        self.hook = hook;
    }

    /// Takes a cached value, or builds one with the factory.
    ///
    /// Returns `None` only when the pool is empty and no factory is
    /// configured. Never blocks.
    ///
    /// # Performance
    ///
    /// - **Pool hit**: one CAS on the free-list plus up to two relaxed hook updates
    /// - **Pool miss**: whatever the factory costs
    pub fn get(&self) -> Option<T> {
        if let Some(hook) = &self.hook {
            hook.incr_total(1);
        }

        if let Some(v) = self.pool.pop() {
            if let Some(hook) = &self.hook {
                hook.incr_hit(1);
            }
            return Some(v);
        }

        self.factory.as_ref().map(|new| new())
    }

    /// Parks `v` for reuse, dropping it if the pool is full.
    pub fn put(&self, v: T) {
        if self.pool.push(v).is_err() {
            log::trace!("fixed pool full, dropping returned object");
        }
    }

    /// Number of idle values currently cached.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// `true` when no idle value is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of idle values the pool keeps.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }
}

/// Bounded pool for a single element type with a mandatory factory.
///
/// `get` always yields a usable `T`: either a recycled one or a freshly
/// built one. Callers that want to watch pool pressure can read
/// [`len`](FixedPoolV2::len).
///
/// # Example
///
/// ```rust
/// use recyclepool::FixedPoolV2;
///
/// let pool = FixedPoolV2::new(|| String::with_capacity(128), 8);
/// let mut s = pool.get();
/// s.push_str("scratch");
/// s.clear();
/// pool.put(s);
/// assert_eq!(pool.len(), 1);
/// ```
pub struct FixedPoolV2<T> {
    pool: FreeList<T>,
    new: Factory<T>,
    hook: Option<Arc<dyn HitRatioHook>>,
}

impl<T> FixedPoolV2<T> {
    /// Creates a pool of at most `capacity` idle values, building new ones
    /// with `new` whenever it runs dry.
    pub fn new<F>(new: F, capacity: usize) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        log::debug!("fixed pool v2 configured with capacity {}", capacity);
        Self {
            pool: FreeList::new(capacity),
            new: Box::new(new),
            hook: None,
        }
    }

    /// Reports every `get` to `hook`, with the same accounting as [`FixedPool`].
    pub fn with_hit_ratio_hook(mut self, hook: Arc<dyn HitRatioHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Takes a cached value, or builds a fresh one. Never blocks.
    #[inline]
    pub fn get(&self) -> T {
        if let Some(hook) = &self.hook {
            hook.incr_total(1);
        }

        match self.pool.pop() {
            Some(item) => {
                if let Some(hook) = &self.hook {
                    hook.incr_hit(1);
                }
                item
            }
            None => (self.new)(),
        }
    }

    /// Parks `item` for reuse, dropping it if the pool is full.
    #[inline]
    pub fn put(&self, item: T) {
        if self.pool.push(item).is_err() {
            log::trace!("fixed pool v2 full, dropping returned object");
        }
    }

    /// Replaces the storage and the factory, dropping everything cached.
    ///
    /// The hook, if any, is kept.
    pub fn reset<F>(&mut self, capacity: usize, new: F)
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        log::debug!("fixed pool v2 reset to capacity {}", capacity);
        self.pool = FreeList::new(capacity);
        self.new = Box::new(new);
    }

    /// Number of idle values currently cached.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// `true` when no idle value is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of idle values the pool keeps.
    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;
    use crate::hook::HitCounters;

    fn counting_factory(built: Arc<AtomicUsize>) -> Factory<Vec<u8>> {
        Box::new(move || {
            built.fetch_add(1, Ordering::Relaxed);
            Vec::with_capacity(16)
        })
    }

    #[test]
    fn test_overflow_is_dropped() {
        let pool: FixedPool<u32> = FixedPool::new(3, None, None);
        for i in 0..3 {
            pool.put(i);
        }
        assert_eq!(pool.len(), 3);

        pool.put(99);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn test_get_without_factory_returns_none() {
        let pool: FixedPool<String> = FixedPool::new(2, None, None);
        assert!(pool.get().is_none());

        pool.put("cached".to_string());
        assert_eq!(pool.get().as_deref(), Some("cached"));
        assert!(pool.get().is_none());
    }

    #[test]
    fn test_factory_used_on_miss() {
        let built = Arc::new(AtomicUsize::new(0));
        let pool = FixedPool::new(2, Some(counting_factory(built.clone())), None);

        let a = pool.get().unwrap();
        assert_eq!(built.load(Ordering::Relaxed), 1);

        pool.put(a);
        let _b = pool.get().unwrap();
        assert_eq!(built.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_hit_accounting() {
        let counters = Arc::new(HitCounters::new());
        let pool = FixedPool::new(
            4,
            Some(Box::new(|| 0u64) as Factory<u64>),
            Some(counters.clone() as Arc<dyn HitRatioHook>),
        );

        pool.put(1);
        pool.put(2);
        for _ in 0..5 {
            let _ = pool.get();
        }

        let stats = counters.snapshot();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.hit, 2);
    }

    #[test]
    fn test_put_does_not_touch_hook() {
        let counters = Arc::new(HitCounters::new());
        let pool: FixedPool<u8> = FixedPool::new(1, None, Some(counters.clone() as Arc<dyn HitRatioHook>));
        pool.put(1);
        pool.put(2);
        assert_eq!(counters.snapshot().total, 0);
    }

    #[test]
    fn test_reset_replaces_storage() {
        let mut pool: FixedPool<u8> = FixedPool::new(4, None, None);
        pool.put(1);
        pool.put(2);

        pool.reset(1, Some(Box::new(|| 7)), None);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.get(), Some(7));
    }

    #[test]
    fn test_v2_round_trip_and_len() {
        let pool = FixedPoolV2::new(|| String::with_capacity(32), 2);
        let mut s = pool.get();
        s.push_str("reused");
        let ptr = s.as_ptr();

        pool.put(s);
        assert_eq!(pool.len(), 1);

        let again = pool.get();
        assert_eq!(again.as_ptr(), ptr);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_v2_reset() {
        let mut pool = FixedPoolV2::new(|| 1u32, 4);
        pool.put(5);
        pool.reset(2, || 9);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.get(), 9);
    }

    #[test]
    fn test_v2_overflow_is_dropped() {
        let pool = FixedPoolV2::new(|| 0u32, 2);
        for i in 0..5 {
            pool.put(i);
        }
        assert_eq!(pool.len(), 2);

        let mut kept = vec![pool.get(), pool.get()];
        kept.sort();
        assert_eq!(kept, vec![0, 1]);
        // Drained, so the next value comes from the factory.
        assert_eq!(pool.get(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_v2_concurrent_get_put() {
        let counters = Arc::new(HitCounters::new());
        let pool = Arc::new(
            FixedPoolV2::new(|| vec![0u8; 8], 4).with_hit_ratio_hook(counters.clone()),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        let v = pool.get();
                        pool.put(v);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = counters.snapshot();
        assert_eq!(stats.total, 4000);
        assert!(stats.hit <= stats.total);
        assert!(pool.len() <= 4);
    }
}
