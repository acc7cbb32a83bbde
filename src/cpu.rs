//! CPU-count collaborator used to size pools.

use std::num::NonZeroUsize;

/// Reports how many CPUs the process may run on.
///
/// Implementations must return at least 1; callers clamp anyway.
pub trait CpuProbe: Send + Sync {
    fn cpu_count(&self) -> usize;
}

/// Probe backed by [`std::thread::available_parallelism`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCpus;

impl CpuProbe for SystemCpus {
    fn cpu_count(&self) -> usize {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

impl<F> CpuProbe for F
where
    F: Fn() -> usize + Send + Sync,
{
    fn cpu_count(&self) -> usize {
        self()
    }
}
