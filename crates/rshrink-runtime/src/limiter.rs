//! ComputeLimiter — linear-memory accounting for one compute instance.
//!
//! Every instance store carries a limiter. Growth past the configured cap
//! is refused (the guest sees `memory.grow` return -1), and the largest size
//! ever granted is kept so handles can report their peak footprint.

use wasmtime::ResourceLimiter;

/// Default linear-memory cap per instance (64 MiB).
pub const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Table elements any single compute instance may hold.
const TABLE_ELEMENT_LIMIT: usize = 10_000;

/// Peak linear memory of a handle's instances against their cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Largest linear memory granted to any instance, in bytes.
    pub peak: usize,
    /// Per-instance cap, in bytes.
    pub limit: usize,
}

#[derive(Debug)]
pub struct ComputeLimiter {
    memory_limit: usize,
    peak_memory: usize,
}

impl ComputeLimiter {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            peak_memory: 0,
        }
    }

    pub fn peak_memory(&self) -> usize {
        self.peak_memory
    }
}

impl ResourceLimiter for ComputeLimiter {
    fn memory_growing(
        &mut self,
        current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        if desired > self.memory_limit {
            tracing::warn!(
                current,
                desired,
                limit = self.memory_limit,
                "compute module memory growth refused"
            );
            return Ok(false);
        }
        self.peak_memory = self.peak_memory.max(desired);
        Ok(true)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> anyhow::Result<bool> {
        Ok(desired <= TABLE_ELEMENT_LIMIT)
    }
}
