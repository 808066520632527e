//! Constant-pool isolation configuration.
//!
//! The isolation mode is set via the `INTERCEPTS_POOL_ISOLATION` environment
//! variable:
//! - `thread` (default): every thread keeps its own stack of active pools for a
//!   dispatch entry. Concurrent threads never observe each other's swaps and
//!   nested calls restore strictly last-in-first-out.
//! - `serialized`: one shared active-pool slot per dispatch entry, guarded by a
//!   reentrant lock held from swap through restore. Calls through one entry
//!   are serialized across threads; recursion on the holding thread nests.

use std::sync::atomic::{AtomicU8, Ordering};

/// Environment variable read by [`pool_isolation`].
pub const POOL_ISOLATION_ENV: &str = "INTERCEPTS_POOL_ISOLATION";

/// How a dispatch entry isolates its active constant pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolIsolation {
    /// Per-thread stack of active pools.
    #[default]
    PerThread,
    /// Shared slot behind a reentrant lock scoped to swap/invoke/restore.
    Serialized,
}

impl PoolIsolation {
    /// Parse from string (case-insensitive). Unknown values map to the default.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "serialized" | "lock" | "shared" => Self::Serialized,
            _ => Self::PerThread,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PerThread => "thread",
            Self::Serialized => "serialized",
        }
    }
}

impl std::fmt::Display for PoolIsolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// 0=unresolved, 1=PerThread, 2=Serialized.
static CACHED_ISOLATION: AtomicU8 = AtomicU8::new(0);

const ISOLATION_UNRESOLVED: u8 = 0;
const ISOLATION_PER_THREAD: u8 = 1;
const ISOLATION_SERIALIZED: u8 = 2;

fn isolation_to_u8(isolation: PoolIsolation) -> u8 {
    match isolation {
        PoolIsolation::PerThread => ISOLATION_PER_THREAD,
        PoolIsolation::Serialized => ISOLATION_SERIALIZED,
    }
}

fn u8_to_isolation(v: u8) -> PoolIsolation {
    match v {
        ISOLATION_SERIALIZED => PoolIsolation::Serialized,
        _ => PoolIsolation::PerThread,
    }
}

/// Configured isolation mode (reads the environment on first call, cached
/// thereafter).
#[must_use]
pub fn pool_isolation() -> PoolIsolation {
    let cached = CACHED_ISOLATION.load(Ordering::Relaxed);
    if cached != ISOLATION_UNRESOLVED {
        return u8_to_isolation(cached);
    }

    let isolation = std::env::var(POOL_ISOLATION_ENV)
        .map(|v| PoolIsolation::from_str_loose(&v))
        .unwrap_or_default();
    // Racing resolvers read the same environment, so last store wins harmlessly.
    CACHED_ISOLATION.store(isolation_to_u8(isolation), Ordering::Release);
    isolation
}
