//! Atomic counters for interception observability.
//!
//! All counters use relaxed ordering: they are advisory/diagnostic,
//! not synchronization primitives.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global interception counters.
pub struct InterceptMetrics {
    /// Identities pushed into a dispatch entry's constant pool.
    pub injections: AtomicU64,
    /// Constant pools restored after an invocation (any exit path).
    pub restorations: AtomicU64,
    /// Calls that reached a dispatch entry.
    pub dispatches: AtomicU64,
    /// Dispatches forwarded straight to the original (no policy).
    pub passthroughs: AtomicU64,
    /// Policy layers invoked.
    pub policy_calls: AtomicU64,
    /// Dispatches whose identity could not be resolved.
    pub unresolved: AtomicU64,
    /// Dispatches that ended in a forwarded failure.
    pub failures: AtomicU64,
    /// Trampolines built.
    pub trampolines: AtomicU64,
}

impl InterceptMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            injections: AtomicU64::new(0),
            restorations: AtomicU64::new(0),
            dispatches: AtomicU64::new(0),
            passthroughs: AtomicU64::new(0),
            policy_calls: AtomicU64::new(0),
            unresolved: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            trampolines: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            injections: Self::get(&self.injections),
            restorations: Self::get(&self.restorations),
            dispatches: Self::get(&self.dispatches),
            passthroughs: Self::get(&self.passthroughs),
            policy_calls: Self::get(&self.policy_calls),
            unresolved: Self::get(&self.unresolved),
            failures: Self::get(&self.failures),
            trampolines: Self::get(&self.trampolines),
        }
    }
}

impl Default for InterceptMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`InterceptMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub injections: u64,
    pub restorations: u64,
    pub dispatches: u64,
    pub passthroughs: u64,
    pub policy_calls: u64,
    pub unresolved: u64,
    pub failures: u64,
    pub trampolines: u64,
}

impl MetricsSnapshot {
    /// Injections still awaiting restoration at snapshot time.
    #[must_use]
    pub const fn pending_restorations(&self) -> u64 {
        self.injections.saturating_sub(self.restorations)
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "injections={} restorations={} dispatches={} passthroughs={} policy_calls={} unresolved={} failures={} trampolines={}",
            self.injections,
            self.restorations,
            self.dispatches,
            self.passthroughs,
            self.policy_calls,
            self.unresolved,
            self.failures,
            self.trampolines,
        )
    }
}

static GLOBAL_METRICS: InterceptMetrics = InterceptMetrics::new();

/// Process-wide interception counters.
#[must_use]
pub fn global_metrics() -> &'static InterceptMetrics {
    &GLOBAL_METRICS
}
