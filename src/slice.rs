//! Capacity-aware pool of primitive vectors.
//!
//! Only the backing allocation is recycled. A vector handed out by
//! [`SlicePool::get`] has exactly the requested length, but positions the
//! caller has not written yet may hold values left over from a previous
//! user. Callers must overwrite what they read.

use crate::{
    elastic::{ElasticConfig, ElasticPool},
    trim::Trim,
};

/// Pool of `Vec<T>` buffers backed only by an elastic tier.
///
/// # Example
///
/// ```rust
/// use recyclepool::IntSlicePool;
///
/// let pool = IntSlicePool::new();
/// let mut ids = pool.get(16);
/// ids.iter_mut().enumerate().for_each(|(i, id)| *id = i as i64);
/// pool.put(ids);
///
/// let ids = pool.get(8);
/// assert_eq!(ids.len(), 8);
/// ```
pub struct SlicePool<T> {
    pool: ElasticPool<Vec<T>>,
}

/// Integer slice pool.
pub type IntSlicePool = SlicePool<i64>;

impl<T: Copy + Default> SlicePool<T> {
    /// Pool with an elastic tier shaped by [`ElasticConfig::default`].
    pub fn new() -> Self {
        Self::with_elastic_config(ElasticConfig::default())
    }

    /// Pool with an explicitly shaped elastic tier.
    pub fn with_elastic_config(config: ElasticConfig) -> Self {
        Self {
            pool: ElasticPool::new(config),
        }
    }

    /// Returns a vector of exactly `size` elements.
    ///
    /// A cached vector is reused when its capacity covers `size`; an
    /// undersized one is discarded and a new vector is allocated instead.
    pub fn get(&self, size: usize) -> Vec<T> {
        match self.pool.pop() {
            Some(mut v) if v.capacity() >= size => {
                if v.len() >= size {
                    v.truncate(size);
                } else {
                    v.resize(size, T::default());
                }
                v
            }
            _ => vec![T::default(); size],
        }
    }

    /// Hands the vector's whole allocation back, whatever its length.
    pub fn put(&self, v: Vec<T>) {
        self.pool.push(v);
    }

    /// Approximate number of cached vectors.
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// `true` when no vector is cached.
    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

impl<T: Copy + Default> Default for SlicePool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Trim for SlicePool<T> {
    fn trim(&self) -> usize {
        self.pool.trim()
    }
}
