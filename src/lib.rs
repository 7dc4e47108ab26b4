#[cfg(not(target_pointer_width = "64"))]
compile_error!("spanpool supports only 64-bit targets.");

pub(crate) mod sync;

mod dispatch;
mod pool;
mod span;
mod stats;
mod vm;

// test suites
mod integration;

pub use dispatch::{GlobalSpanPool, SpanPool};
pub use pool::POOL_COUNT;
pub use stats::{PoolSnapshot, StatsSnapshot};
pub use vm::PageMapError;

// Serializes tests that touch process-wide state (the global handle, errno,
// the exit report registration).
#[cfg(test)]
crate::sync::static_shared! {
    pub static TEST_MUTEX: crate::sync::RwLock<()> = crate::sync::RwLock::new(());
}
