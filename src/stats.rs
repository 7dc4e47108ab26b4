//! Gauge counters feeding the statistics report.
//!
//! Everything here moves with `Relaxed` atomics. Each counter is exact once
//! the threads touching it quiesce, but a snapshot taken mid-flight can
//! catch related counters out of step with one another (a pool's live and
//! free gauges move in two separate operations). Good enough for a
//! diagnostic dump; never consult these when deciding how to allocate.

use crate::pool::POOL_COUNT;
use crate::sync::atomic::{AtomicIsize, Ordering};
use std::fmt;

/// Saturating gauge over a signed atomic.
///
/// Signed because paired updates can land out of order: the thread freeing a
/// block may decrement before the thread that allocated it gets its
/// increment in, leaving the raw value briefly below zero. `get()` reports
/// such transients as zero rather than exposing a wrapped value.
pub(crate) struct Counter(AtomicIsize);

impl Counter {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self(AtomicIsize::new(0))
    }

    #[inline]
    pub fn add(&self, n: usize) {
        self.0.fetch_add(Self::signed(n), Ordering::Relaxed);
    }

    #[inline]
    pub fn sub(&self, n: usize) {
        self.0.fetch_sub(Self::signed(n), Ordering::Relaxed);
    }

    /// Current value; negative transients read as zero.
    #[inline]
    pub fn get(&self) -> usize {
        usize::try_from(self.0.load(Ordering::Relaxed)).unwrap_or(0)
    }

    // A step past isize::MAX would wrap the gauge, so saturate. No caller
    // comes close; these are statistics, not accounting the allocator
    // depends on.
    #[inline]
    fn signed(n: usize) -> isize {
        isize::try_from(n).unwrap_or(isize::MAX)
    }
}

/// Per-pool gauge group. Lives inside each pool.
pub(crate) struct PoolCounters {
    /// Pop attempts against this pool, including refills.
    pub alloc_calls: Counter,
    /// Blocks of this class currently out with callers.
    pub live_blocks: Counter,
    /// Blocks currently sitting on this pool's free stack.
    pub free_blocks: Counter,
}

impl PoolCounters {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            alloc_calls: Counter::new(),
            live_blocks: Counter::new(),
            free_blocks: Counter::new(),
        }
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            alloc_calls: Counter::new(),
            live_blocks: Counter::new(),
            free_blocks: Counter::new(),
        }
    }
}

/// Entry-point call counters. One group per allocator instance.
pub(crate) struct EntryCounters {
    pub alloc_calls: Counter,
    pub aligned_alloc_calls: Counter,
    pub realloc_calls: Counter,
    pub option_calls: Counter,
    /// Frees rejected by the diagnostic liveness check (double free or
    /// free of a pointer this allocator never returned). Stays zero in
    /// release builds, where the check is compiled out.
    pub bad_frees: Counter,
}

impl EntryCounters {
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            alloc_calls: Counter::new(),
            aligned_alloc_calls: Counter::new(),
            realloc_calls: Counter::new(),
            option_calls: Counter::new(),
            bad_frees: Counter::new(),
        }
    }

    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            alloc_calls: Counter::new(),
            aligned_alloc_calls: Counter::new(),
            realloc_calls: Counter::new(),
            option_calls: Counter::new(),
            bad_frees: Counter::new(),
        }
    }
}

/// Point-in-time view of one pool's counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolSnapshot {
    pub alloc_calls: usize,
    pub live_blocks: usize,
    pub free_blocks: usize,
}

/// Point-in-time view of an allocator's counters.
///
/// The `Display` impl renders the plaintext report the diagnostic build
/// writes at process exit.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub page_size: usize,
    pub alloc_calls: usize,
    pub aligned_alloc_calls: usize,
    pub realloc_calls: usize,
    pub option_calls: usize,
    pub bad_frees: usize,
    pub pools: [PoolSnapshot; POOL_COUNT],
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-------")?;
        writeln!(f, "page size....: {}", self.page_size)?;
        writeln!(f, "pool count...: {POOL_COUNT}")?;
        writeln!(f, "alloc........: {}", self.alloc_calls)?;
        writeln!(f, "alloc aligned: {}", self.aligned_alloc_calls)?;
        writeln!(f, "realloc......: {}", self.realloc_calls)?;
        writeln!(f, "set option...: {}", self.option_calls)?;
        writeln!(f, "bad free.....: {}", self.bad_frees)?;
        for (i, p) in self.pools.iter().enumerate() {
            writeln!(
                f,
                "{i:2}: calls={} live={} free={}",
                p.alloc_calls, p.live_blocks, p.free_blocks
            )?;
        }
        write!(f, "-------")
    }
}
