//! Tiered, non-blocking object pools.
//!
//! `recyclepool` turns "allocate and discard" into "borrow and return" for
//! short-lived objects that a storage engine churns through by the million:
//! byte buffers, integer slices, compressor contexts, arbitrary domain
//! objects. Every pool is safe to share between threads and no operation
//! ever blocks: an empty pool constructs, a full pool drops or spills.
//!
//! # Pools
//!
//! | Pool               | Fast tier        | On overflow            | On total miss          |
//! |--------------------|------------------|------------------------|------------------------|
//! | [`FixedPool`]      | bounded          | drop                   | optional factory       |
//! | [`FixedPoolV2`]    | bounded          | drop                   | factory                |
//! | [`FixedCachePool`] | bounded, CPU-sized | elastic tier         | optional factory       |
//! | [`ObjectPool`]     | bounded, size-routed | elastic tier       | prototype `instance()` |
//! | [`SlicePool`]      | none             | elastic tier only      | new vector             |
//!
//! The elastic tier ([`ElasticPool`]) is sharded and gives no retention
//! guarantee; a [`Trimmer`] can decay it in the background.
//!
//! # Hit ratio
//!
//! Pools accept a [`HitRatioHook`]. Every `get` reports one `total`; a `get`
//! served from a cache tier also reports one `hit`.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use recyclepool::{HitCounters, ObjectPool, PooledObject};
//!
//! struct Buffer(Vec<u8>);
//!
//! impl PooledObject for Buffer {
//!     fn instance(&self) -> Self {
//!         Buffer(Vec::with_capacity(1024))
//!     }
//!
//!     fn mem_size(&self) -> usize {
//!         self.0.capacity()
//!     }
//! }
//!
//! let counters = Arc::new(HitCounters::new());
//! let mut pool = ObjectPool::new(8, Buffer(Vec::new()), 64 * 1024);
//! pool.set_hit_ratio_hook(counters.clone());
//!
//! let mut buf = pool.get();
//! buf.0.extend_from_slice(b"row data");
//! buf.0.clear();
//! pool.put(buf);
//!
//! let _again = pool.get();
//! assert_eq!(counters.snapshot().hit, 1);
//! ```

use std::io;

mod cache;
mod cpu;
mod elastic;
mod fixed;
mod freelist;
mod hook;
mod object;
mod slice;
mod trim;

pub mod compress;

pub use cache::{default_capacity, FixedCachePool, MAX_CACHE_POOL_CAPACITY, MIN_CACHE_POOL_CAPACITY};
pub use compress::{CompressionError, CompressionPools, CompressionPoolsBuilder, Format};
pub use cpu::{CpuProbe, SystemCpus};
pub use elastic::{ElasticConfig, ElasticPool, DEFAULT_MAX_RETAINED};
pub use fixed::{Factory, FixedPool, FixedPoolV2};
pub use hook::{FnHook, HitCounters, HitRatioHook, HitStats};
pub use object::{ObjectPool, ObjectPoolBuilder, PooledObject, MAX_LOCAL_CACHE_LEN};
pub use slice::{IntSlicePool, SlicePool};
pub use trim::{Trim, Trimmer, TrimmerBuilder, DEFAULT_TRIM_INTERVAL};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no configured local cache size limit")]
    NoConfiguredLocalCacheSize,
    #[error("elastic tier needs at least one shard")]
    ZeroShards,
    #[error("pool capacity must be non-zero")]
    ZeroCapacity,
    #[error("trim interval must be non-zero")]
    ZeroTrimInterval,
    #[error("{format} compression level {level} is out of range")]
    InvalidCompressionLevel { format: Format, level: i64 },
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}
