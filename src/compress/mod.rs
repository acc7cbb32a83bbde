//! Pools of compression stream state.
//!
//! Compressor and decompressor contexts are expensive to build (window
//! buffers, hash tables, state machines) and cheap to reset, which makes
//! them ideal pool residents. [`CompressionPools`] keeps one writer pool and
//! one reader pool per format. A `get_*` call takes a context, resets it and
//! binds it to the caller's sink or source; the matching `put_*` call takes
//! the context back.
//!
//! # Ownership of the sink
//!
//! Streams own whatever they are bound to. Bind a `&mut Vec<u8>` (or any
//! other `&mut W`) when the destination is needed after the stream has been
//! returned to its pool:
//!
//! ```rust
//! use std::io::{Read, Write};
//! use recyclepool::CompressionPools;
//!
//! let pools = CompressionPools::builder().build().unwrap();
//!
//! let mut buf = Vec::new();
//! let mut writer = pools.get_gzip_writer(&mut buf);
//! writer.write_all(b"test data").unwrap();
//! writer.finish().unwrap();
//! pools.put_gzip_writer(writer);
//!
//! let mut reader = pools.get_gzip_reader(&buf[..]);
//! let mut out = String::new();
//! reader.read_to_string(&mut out).unwrap();
//! pools.put_gzip_reader(reader);
//! assert_eq!(out, "test data");
//! ```
//!
//! # Errors
//!
//! Only zstd context construction can fail at `get_*` time; that failure is
//! forwarded as a [`CompressionError`]. Malformed, truncated, or corrupt
//! input is reported by the stream's own `read`/`write`.

use std::{
    fmt,
    io::{self, Read, Write},
    sync::Arc,
};

use flate2::Compression;

use crate::{
    cache::default_capacity,
    cpu::{CpuProbe, SystemCpus},
    fixed::{FixedPool, FixedPoolV2},
    hook::HitRatioHook,
    BuildError,
};

mod gzip;
mod snappy;
mod zstandard;

pub use gzip::{GzipDecoderState, GzipEncoderState, GzipReader, GzipWriter};
pub use snappy::{SnappyDecoderState, SnappyEncoderState, SnappyReader, SnappyWriter};
pub use zstandard::{ZstdDecoderState, ZstdEncoderState, ZstdReader, ZstdWriter};

/// Default gzip level, matching the usual deflate default.
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default zstd level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Gzip,
    Zstd,
    Snappy,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Gzip => f.write_str("gzip"),
            Format::Zstd => f.write_str("zstd"),
            Format::Snappy => f.write_str("snappy"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("failed to create {format} {role} context: {source}")]
    Context {
        format: Format,
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

pub(crate) fn invalid_data<E>(err: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::new(io::ErrorKind::InvalidData, err)
}

pub(crate) fn truncated(format: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("truncated {} stream", format),
    )
}

/// `Read::read` that retries on `Interrupted`.
pub(crate) fn read_retrying<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

/// Occupancy of every pool, for watching pool pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolOccupancy {
    pub gzip_writers: usize,
    pub gzip_readers: usize,
    pub zstd_writers: usize,
    pub zstd_readers: usize,
    pub snappy_writers: usize,
    pub snappy_readers: usize,
}

/// Writer and reader pools for gzip, zstd, and snappy.
pub struct CompressionPools {
    gzip_writers: FixedPoolV2<GzipEncoderState>,
    gzip_readers: FixedPoolV2<GzipDecoderState>,
    zstd_writers: FixedPool<ZstdEncoderState>,
    zstd_readers: FixedPool<ZstdDecoderState>,
    snappy_writers: FixedPoolV2<SnappyEncoderState>,
    snappy_readers: FixedPoolV2<SnappyDecoderState>,
    zstd_level: i32,
    hook: Option<Arc<dyn HitRatioHook>>,
}

/// Takes a pooled state that must be rebound before reuse.
///
/// The pool itself is not instrumented: a state only counts as a hit once
/// `reset` succeeds on it, and a state that fails `reset` is dropped and
/// replaced by `fresh`, counting as a miss.
fn take_rebound<S, E>(
    pool: &FixedPool<S>,
    hook: Option<&dyn HitRatioHook>,
    reset: impl FnOnce(&mut S) -> io::Result<()>,
    fresh: impl FnOnce() -> Result<S, E>,
) -> Result<S, E> {
    if let Some(hook) = hook {
        hook.incr_total(1);
    }

    if let Some(mut state) = pool.get() {
        match reset(&mut state) {
            Ok(()) => {
                if let Some(hook) = hook {
                    hook.incr_hit(1);
                }
                return Ok(state);
            }
            Err(err) => {
                log::trace!("discarding pooled zstd context that failed to reinitialize: {}", err);
            }
        }
    }
    fresh()
}

impl CompressionPools {
    /// Starts a [`CompressionPoolsBuilder`] with default levels and capacity.
    pub fn builder() -> CompressionPoolsBuilder {
        CompressionPoolsBuilder::new()
    }

    /// Binds a gzip writer to `sink`, reusing a pooled deflate context when
    /// one is available.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::io::Write;
    /// use recyclepool::CompressionPools;
    ///
    /// let pools = CompressionPools::builder().with_capacity(2).build().unwrap();
    /// let mut out = Vec::new();
    /// let mut writer = pools.get_gzip_writer(&mut out);
    /// writer.write_all(b"row data").unwrap();
    /// writer.finish().unwrap();
    /// pools.put_gzip_writer(writer);
    /// assert_eq!(&out[..2], &[0x1f, 0x8b]);
    /// ```
    pub fn get_gzip_writer<W: Write>(&self, sink: W) -> GzipWriter<W> {
        let mut state = self.gzip_writers.get();
        state.reset();
        GzipWriter::new(sink, state)
    }

    /// Takes the writer's context back. The writer must already be finished.
    pub fn put_gzip_writer<W: Write>(&self, writer: GzipWriter<W>) {
        self.gzip_writers.put(writer.into_state());
    }

    /// Binds a gzip reader to `source`, reusing a pooled inflate context
    /// when one is available.
    pub fn get_gzip_reader<R: Read>(&self, source: R) -> GzipReader<R> {
        let mut state = self.gzip_readers.get();
        state.reset();
        GzipReader::new(source, state)
    }

    /// Takes a reader's context back, whether or not it was read to the end.
    pub fn put_gzip_reader<R: Read>(&self, reader: GzipReader<R>) {
        self.gzip_readers.put(reader.into_state());
    }

    /// Binds a zstd writer to `sink`.
    ///
    /// A pooled context that fails to start a new session is discarded and
    /// a fresh one is built in its place; that `get` counts as a miss.
    ///
    /// # Errors
    ///
    /// [`CompressionError::Context`] when a fresh context cannot be built.
    pub fn get_zstd_writer<W: Write>(&self, sink: W) -> Result<ZstdWriter<W>, CompressionError> {
        let state = take_rebound(
            &self.zstd_writers,
            self.hook.as_deref(),
            ZstdEncoderState::reset,
            || {
                ZstdEncoderState::new(self.zstd_level).map_err(|source| {
                    CompressionError::Context {
                        format: Format::Zstd,
                        role: "writer",
                        source,
                    }
                })
            },
        )?;
        Ok(ZstdWriter::new(sink, state))
    }

    /// Takes a finished writer's context back.
    pub fn put_zstd_writer<W: Write>(&self, writer: ZstdWriter<W>) {
        self.zstd_writers.put(writer.into_state());
    }

    /// Binds a zstd reader to `source`, with the same fallback as
    /// [`get_zstd_writer`](CompressionPools::get_zstd_writer).
    ///
    /// # Errors
    ///
    /// [`CompressionError::Context`] when a fresh context cannot be built.
    pub fn get_zstd_reader<R: Read>(&self, source: R) -> Result<ZstdReader<R>, CompressionError> {
        let state = take_rebound(
            &self.zstd_readers,
            self.hook.as_deref(),
            ZstdDecoderState::reset,
            || {
                ZstdDecoderState::new().map_err(|source| CompressionError::Context {
                    format: Format::Zstd,
                    role: "reader",
                    source,
                })
            },
        )?;
        Ok(ZstdReader::new(source, state))
    }

    /// Takes a reader's context back, whether or not it was read to the end.
    pub fn put_zstd_reader<R: Read>(&self, reader: ZstdReader<R>) {
        self.zstd_readers.put(reader.into_state());
    }

    /// Binds a snappy framing-format writer to `sink`.
    pub fn get_snappy_writer<W: Write>(&self, sink: W) -> SnappyWriter<W> {
        let mut state = self.snappy_writers.get();
        state.reset();
        SnappyWriter::new(sink, state)
    }

    /// Takes a finished writer's buffers back.
    pub fn put_snappy_writer<W: Write>(&self, writer: SnappyWriter<W>) {
        self.snappy_writers.put(writer.into_state());
    }

    /// Binds a snappy framing-format reader to `source`.
    pub fn get_snappy_reader<R: Read>(&self, source: R) -> SnappyReader<R> {
        let mut state = self.snappy_readers.get();
        state.reset();
        SnappyReader::new(source, state)
    }

    /// Takes a reader's buffers back, whether or not it was read to the end.
    pub fn put_snappy_reader<R: Read>(&self, reader: SnappyReader<R>) {
        self.snappy_readers.put(reader.into_state());
    }

    /// Idle contexts currently held by each pool.
    pub fn occupancy(&self) -> PoolOccupancy {
        PoolOccupancy {
            gzip_writers: self.gzip_writers.len(),
            gzip_readers: self.gzip_readers.len(),
            zstd_writers: self.zstd_writers.len(),
            zstd_readers: self.zstd_readers.len(),
            snappy_writers: self.snappy_writers.len(),
            snappy_readers: self.snappy_readers.len(),
        }
    }
}

/// Configures [`CompressionPools`].
///
/// # Parameters
///
/// * capacity - idle contexts kept per pool; defaults to
///   [`default_capacity`](crate::default_capacity) of the CPU count
/// * gzip level - `0..=9`, default [`DEFAULT_GZIP_LEVEL`]
/// * zstd level - any level zstd accepts, default [`DEFAULT_ZSTD_LEVEL`]
/// * hit-ratio hook - receives the accounting of all six pools
pub struct CompressionPoolsBuilder {
    capacity: Option<usize>,
    gzip_level: u32,
    zstd_level: i32,
    hook: Option<Arc<dyn HitRatioHook>>,
}

impl CompressionPoolsBuilder {
    /// Builder with default levels, CPU-derived capacity, and no hook.
    pub fn new() -> Self {
        Self {
            capacity: None,
            gzip_level: DEFAULT_GZIP_LEVEL,
            zstd_level: DEFAULT_ZSTD_LEVEL,
            hook: None,
        }
    }

    /// Slots per pool; defaults to the CPU-derived cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Deflate level for gzip writers.
    pub fn with_gzip_level(mut self, level: u32) -> Self {
        self.gzip_level = level;
        self
    }

    /// Compression level for zstd writers.
    pub fn with_zstd_level(mut self, level: i32) -> Self {
        self.zstd_level = level;
        self
    }

    /// Reports every pool's hit ratio into `hook`.
    pub fn with_hit_ratio_hook(mut self, hook: Arc<dyn HitRatioHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Builds the pools, sizing them from the CPUs visible to this process.
    ///
    /// # Errors
    ///
    /// * [`BuildError::ZeroCapacity`] for an explicit capacity of zero
    /// * [`BuildError::InvalidCompressionLevel`] for an out-of-range level
    pub fn build(self) -> Result<CompressionPools, BuildError> {
        self.build_with_probe(&SystemCpus)
    }

    /// Like [`build`](CompressionPoolsBuilder::build), with the CPU count
    /// taken from `probe`.
    pub fn build_with_probe(self, probe: &dyn CpuProbe) -> Result<CompressionPools, BuildError> {
        let capacity = match self.capacity {
            Some(0) => return Err(BuildError::ZeroCapacity),
            Some(n) => n,
            None => default_capacity(probe.cpu_count().max(1)),
        };
        if self.gzip_level > 9 {
            return Err(BuildError::InvalidCompressionLevel {
                format: Format::Gzip,
                level: self.gzip_level as i64,
            });
        }
        if !zstd::compression_level_range().contains(&self.zstd_level) {
            return Err(BuildError::InvalidCompressionLevel {
                format: Format::Zstd,
                level: self.zstd_level as i64,
            });
        }

        log::debug!(
            "compression pools configured: {} slots per pool, gzip level {}, zstd level {}",
            capacity,
            self.gzip_level,
            self.zstd_level
        );

        let gzip_level = Compression::new(self.gzip_level);
        let hook = self.hook;

        Ok(CompressionPools {
            gzip_writers: with_hook(
                FixedPoolV2::new(move || GzipEncoderState::new(gzip_level), capacity),
                &hook,
            ),
            gzip_readers: with_hook(FixedPoolV2::new(GzipDecoderState::new, capacity), &hook),
            zstd_writers: FixedPool::new(capacity, None, None),
            zstd_readers: FixedPool::new(capacity, None, None),
            snappy_writers: with_hook(FixedPoolV2::new(SnappyEncoderState::new, capacity), &hook),
            snappy_readers: with_hook(FixedPoolV2::new(SnappyDecoderState::new, capacity), &hook),
            zstd_level: self.zstd_level,
            hook,
        })
    }
}

fn with_hook<T>(pool: FixedPoolV2<T>, hook: &Option<Arc<dyn HitRatioHook>>) -> FixedPoolV2<T> {
    match hook {
        Some(hook) => pool.with_hit_ratio_hook(hook.clone()),
        None => pool,
    }
}

impl Default for CompressionPoolsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
