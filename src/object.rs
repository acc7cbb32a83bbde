//! Two-tier object pool with size-based routing on return.
//!
//! An [`ObjectPool`] keeps a small bounded *local* tier for the common case
//! and an elastic tier behind it. When both are empty it manufactures a new
//! object from a caller-supplied prototype.
//!
//! # Routing
//!
//! Where a returned object lands depends only on what it reports from
//! [`PooledObject::mem_size`], never on which tier it was taken from:
//!
//! ```text
//!                 put(v)
//!                   │
//!     mem_size(v) > max_local_cache_size ?
//!          │ yes                 │ no
//!          ▼                     ▼
//!     elastic tier         local tier ──full──▶ elastic tier
//! ```
//!
//! Oversized objects skip the local tier entirely so that a handful of
//! large instances cannot occupy every local slot while the far more
//! frequent small ones miss.

use std::sync::Arc;

use crate::{
    elastic::{ElasticConfig, ElasticPool},
    freelist::FreeList,
    hook::HitRatioHook,
    trim::Trim,
    BuildError,
};

/// Hard cap on the local tier length, applied regardless of the requested size.
pub const MAX_LOCAL_CACHE_LEN: usize = 64;

/// Capability required from objects stored in an [`ObjectPool`].
pub trait PooledObject: Send + Sized {
    /// Builds a fresh, independent, ready-to-use object.
    ///
    /// Called on the pool's prototype whenever both tiers miss. The result
    /// must not share mutable state with `self` or with earlier instances.
    fn instance(&self) -> Self;

    /// Approximate footprint in bytes, used only to pick a tier on return.
    ///
    /// Called on every `put`, so it has to be cheap.
    fn mem_size(&self) -> usize;
}

/// Pool of [`PooledObject`]s with a bounded local tier and an elastic tier.
///
/// # Hit accounting
///
/// Every `get` reports one `total`. A `get` served by either tier also
/// reports one `hit`; only a construction from the prototype is a miss.
///
/// # Performance
///
/// - **Local hit**: one CAS on the bounded free-list
/// - **Elastic hit**: one failed local pop plus a sharded queue pop
/// - **Miss**: a call to [`PooledObject::instance`]
pub struct ObjectPool<T: PooledObject> {
    pool: ElasticPool<T>,
    local: FreeList<T>,
    obj: T,
    hook: Option<Arc<dyn HitRatioHook>>,
    max_local_cache_size: usize,
}

impl<T: PooledObject> ObjectPool<T> {
    /// Creates a pool whose local tier holds `size` objects.
    ///
    /// A `size` of zero, or one larger than [`MAX_LOCAL_CACHE_LEN`], is
    /// replaced by [`MAX_LOCAL_CACHE_LEN`]. Objects reporting more than
    /// `max_local_cache_size` bytes are never kept in the local tier.
    pub fn new(size: usize, obj: T, max_local_cache_size: usize) -> Self {
        Self::with_elastic_config(size, obj, max_local_cache_size, ElasticConfig::default())
    }

    fn with_elastic_config(
        size: usize,
        obj: T,
        max_local_cache_size: usize,
        config: ElasticConfig,
    ) -> Self {
        let size = if size == 0 || size > MAX_LOCAL_CACHE_LEN {
            MAX_LOCAL_CACHE_LEN
        } else {
            size
        };
        log::debug!(
            "object pool configured: local tier {} slots, local size limit {} bytes",
            size,
            max_local_cache_size
        );

        Self {
            pool: ElasticPool::new(config),
            local: FreeList::new(size),
            obj,
            hook: None,
            max_local_cache_size,
        }
    }

    /// Starts an [`ObjectPoolBuilder`] around the prototype `obj`.
    pub fn builder(obj: T) -> ObjectPoolBuilder<T> {
        ObjectPoolBuilder::new(obj)
    }

    /// Attaches hit-ratio instrumentation for the rest of the pool's life.
    pub fn set_hit_ratio_hook(&mut self, hook: Arc<dyn HitRatioHook>) {
        log::debug!("object pool hit ratio hook attached");
        self.hook = Some(hook);
    }

    #[inline]
    fn stat(&self, hit: bool) {
        let Some(hook) = &self.hook else {
            return;
        };

        hook.incr_total(1);
        if hit {
            hook.incr_hit(1);
        }
    }

    /// Takes an object from the local tier, then the elastic tier, and
    /// finally builds one from the prototype.
    ///
    /// Only the last case counts as a miss.
    pub fn get(&self) -> T {
        match self.local.pop().or_else(|| self.pool.pop()) {
            Some(obj) => {
                self.stat(true);
                obj
            }
            None => {
                self.stat(false);
                self.obj.instance()
            }
        }
    }

    /// Returns an object, routing it by its reported size.
    pub fn put(&self, v: T) {
        if v.mem_size() > self.max_local_cache_size {
            self.pool.push(v);
            return;
        }

        if let Err(v) = self.local.push(v) {
            self.pool.push(v);
        }
    }

    /// Objects currently held by the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// Slots in the local tier after clamping.
    pub fn local_capacity(&self) -> usize {
        self.local.capacity()
    }

    /// Approximate occupancy of the elastic tier.
    pub fn elastic_len(&self) -> usize {
        self.pool.len()
    }

    /// Largest `mem_size` the local tier accepts.
    pub fn max_local_cache_size(&self) -> usize {
        self.max_local_cache_size
    }
}

impl<T: PooledObject> Trim for ObjectPool<T>
where
    T: Sync,
{
    fn trim(&self) -> usize {
        self.pool.trim()
    }
}

/// Configures an [`ObjectPool`] beyond the three positional parameters of
/// [`ObjectPool::new`].
pub struct ObjectPoolBuilder<T: PooledObject> {
    obj: T,
    size: Option<usize>,
    max_local_cache_size: Option<usize>,
    elastic: Option<ElasticConfig>,
    hook: Option<Arc<dyn HitRatioHook>>,
}

impl<T: PooledObject> ObjectPoolBuilder<T> {
    /// Builder around the prototype `obj`; only the local size limit is required.
    pub fn new(obj: T) -> Self {
        Self {
            obj,
            size: None,
            max_local_cache_size: None,
            elastic: None,
            hook: None,
        }
    }

    /// Local tier slot count; defaults to [`MAX_LOCAL_CACHE_LEN`].
    pub fn with_local_len(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Largest `mem_size`, in bytes, that may enter the local tier. Required.
    pub fn with_max_local_cache_size(mut self, bytes: usize) -> Self {
        self.max_local_cache_size = Some(bytes);
        self
    }

    /// Shape of the elastic tier; defaults to [`ElasticConfig::default`].
    pub fn with_elastic_config(mut self, config: ElasticConfig) -> Self {
        self.elastic = Some(config);
        self
    }

    /// Attaches hit-ratio instrumentation.
    pub fn with_hit_ratio_hook(mut self, hook: Arc<dyn HitRatioHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Builds the pool.
    ///
    /// # Errors
    ///
    /// * [`BuildError::NoConfiguredLocalCacheSize`] when no local size limit was set
    /// * [`BuildError::ZeroShards`] when the elastic config asks for zero shards
    pub fn build(self) -> Result<ObjectPool<T>, BuildError> {
        let max_local_cache_size = self
            .max_local_cache_size
            .ok_or(BuildError::NoConfiguredLocalCacheSize)?;
        let elastic = self.elastic.unwrap_or_default();
        if elastic.shards == 0 {
            return Err(BuildError::ZeroShards);
        }

        let mut pool = ObjectPool::with_elastic_config(
            self.size.unwrap_or(MAX_LOCAL_CACHE_LEN),
            self.obj,
            max_local_cache_size,
            elastic,
        );
        if let Some(hook) = self.hook {
            pool.set_hit_ratio_hook(hook);
        }
        Ok(pool)
    }
}
