//! Periodic release of elastic-tier caches.
//!
//! Elastic tiers only shed values when they hit their retention cap. A
//! [`Trimmer`] adds time-based decay: a background thread wakes up on a
//! fixed interval and asks every registered pool to release part of what it
//! holds, so a burst that filled the caches does not pin that memory for
//! the rest of the process.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use crossbeam_utils::sync::{Parker, Unparker};

use crate::BuildError;

/// Default pause between trim passes.
pub const DEFAULT_TRIM_INTERVAL: Duration = Duration::from_secs(5);

/// A cache that can give memory back on request.
pub trait Trim: Send + Sync {
    /// Releases part of the cached population and returns how many values
    /// were dropped.
    fn trim(&self) -> usize;
}

/// Handle to the background trim thread.
///
/// Dropping the handle stops the thread and waits for it to exit.
pub struct Trimmer {
    handle: Option<std::thread::JoinHandle<()>>,
    flag: Arc<AtomicBool>,
    unparker: Unparker,
}

impl Drop for Trimmer {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.unparker.unpark(); // cut the current sleep short
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::debug!("trimmer stopped");
    }
}

impl Trimmer {
    /// Starts a [`TrimmerBuilder`] with the default interval and no targets.
    pub fn builder() -> TrimmerBuilder {
        TrimmerBuilder::new()
    }
}

fn trim_all(targets: &[Arc<dyn Trim>]) -> usize {
    targets.iter().map(|t| t.trim()).sum()
}

/// Configures and starts a [`Trimmer`].
///
/// # Example
///
/// ```rust
/// use std::{sync::Arc, time::Duration};
/// use recyclepool::{IntSlicePool, Trimmer};
///
/// let slices = Arc::new(IntSlicePool::new());
/// let _trimmer = Trimmer::builder()
///     .with_interval(Duration::from_secs(1))
///     .register(slices.clone())
///     .build()
///     .unwrap();
/// // Dropping `_trimmer` stops the thread.
/// ```
pub struct TrimmerBuilder {
    interval: Option<Duration>,
    targets: Vec<Arc<dyn Trim>>,
}

impl TrimmerBuilder {
    /// Builder with [`DEFAULT_TRIM_INTERVAL`] and no targets.
    pub fn new() -> Self {
        Self {
            interval: None,
            targets: Vec::new(),
        }
    }

    /// Pause between trim passes. Must be non-zero.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Adds a pool to every trim pass.
    pub fn register(mut self, target: Arc<dyn Trim>) -> Self {
        self.targets.push(target);
        self
    }

    /// Spawns the trim thread.
    ///
    /// # Errors
    ///
    /// * [`BuildError::ZeroTrimInterval`] for a zero interval
    /// * [`BuildError::IoError`] when the thread cannot be spawned
    pub fn build(self) -> Result<Trimmer, BuildError> {
        let interval = self.interval.unwrap_or(DEFAULT_TRIM_INTERVAL);
        if interval.is_zero() {
            return Err(BuildError::ZeroTrimInterval);
        }

        let parker = Parker::new();
        let unparker = parker.unparker().clone();
        let flag = Arc::new(AtomicBool::new(true));
        let targets = self.targets;
        log::debug!(
            "starting trimmer for {} pools every {:?}",
            targets.len(),
            interval
        );

        let running = flag.clone();
        let handle = std::thread::Builder::new()
            .name("recyclepool-trim".into())
            .spawn(move || loop {
                parker.park_timeout(interval);
                if !running.load(Ordering::Acquire) {
                    break;
                }

                let released = trim_all(&targets);
                if released > 0 {
                    log::debug!("trim pass released {} cached objects", released);
                }
            })?;

        Ok(Trimmer {
            handle: Some(handle),
            flag,
            unparker,
        })
    }
}

impl Default for TrimmerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;
    use crate::elastic::{ElasticConfig, ElasticPool};

    struct CountingTarget(AtomicUsize);

    impl Trim for CountingTarget {
        fn trim(&self) -> usize {
            self.0.fetch_add(1, Ordering::Relaxed);
            0
        }
    }

    #[test]
    fn test_rejects_zero_interval() {
        let result = Trimmer::builder().with_interval(Duration::ZERO).build();
        assert!(matches!(result, Err(BuildError::ZeroTrimInterval)));
    }

    #[test]
    fn test_runs_periodically() {
        let target = Arc::new(CountingTarget(AtomicUsize::new(0)));
        let trimmer = Trimmer::builder()
            .with_interval(Duration::from_millis(10))
            .register(target.clone())
            .build()
            .unwrap();

        let start = Instant::now();
        while target.0.load(Ordering::Relaxed) < 3 {
            assert!(start.elapsed() < Duration::from_secs(5), "trimmer never ran");
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(trimmer);
    }

    #[test]
    fn test_drop_stops_promptly() {
        let trimmer = Trimmer::builder()
            .with_interval(Duration::from_secs(3600))
            .build()
            .unwrap();

        let start = Instant::now();
        drop(trimmer);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_decays_elastic_tier() {
        let pool = Arc::new(ElasticPool::new(ElasticConfig {
            shards: 2,
            max_retained: 1024,
        }));
        for i in 0..512 {
            pool.push(i);
        }

        let _trimmer = Trimmer::builder()
            .with_interval(Duration::from_millis(5))
            .register(pool.clone())
            .build()
            .unwrap();

        let start = Instant::now();
        while !pool.is_empty() {
            assert!(start.elapsed() < Duration::from_secs(5), "pool never drained");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
