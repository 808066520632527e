//! Constant-injection mechanism.
//!
//! Attaches a [`CallableIdentity`] to a call by making `C ++ [identity]` the
//! dispatch entry's active constant pool for the duration of the call, then
//! restoring `C`. Restoration lives in a guard's `Drop`, so it runs on normal
//! return, on error return and on panic unwind alike.
//!
//! Two isolation strategies are supported (see [`PoolIsolation`]):
//! - per-thread: the active pool is the top of a thread-local stack keyed by
//!   entry, so no other thread can observe or clobber the swap;
//! - serialized: one shared slot, swapped under the entry's reentrant lock.

use std::cell::RefCell;

use parking_lot::RwLock;

use crate::config::PoolIsolation;
use crate::dispatch::DispatchEntry;
use crate::error::CallResult;
use crate::identity::CallableIdentity;
use crate::metrics::{InterceptMetrics, global_metrics};
use crate::pool::{Constant, ConstantPool};
use crate::value::{Args, Kwargs};

struct ActivePool {
    entry: u64,
    pool: ConstantPool,
}

thread_local! {
    static ACTIVE_POOLS: RefCell<Vec<ActivePool>> = const { RefCell::new(Vec::new()) };
}

/// Innermost pool this thread has injected into `entry`, if any.
pub(crate) fn thread_active_pool(entry: u64) -> Option<ConstantPool> {
    ACTIVE_POOLS
        .try_with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|active| active.entry == entry)
                .map(|active| active.pool.clone())
        })
        .ok()
        .flatten()
}

/// Number of pools this thread currently has injected, across all entries.
#[must_use]
pub fn thread_injection_depth() -> usize {
    ACTIVE_POOLS
        .try_with(|stack| stack.borrow().len())
        .unwrap_or(0)
}

/// Invoke `entry` with `identity` appended to its base constant pool.
///
/// The pool in effect before the call is back in effect when this returns,
/// whatever the outcome. The result or failure of the entry is returned
/// unchanged.
pub fn invoke_with_identity(
    identity: CallableIdentity,
    entry: &DispatchEntry,
    args: &Args,
    kwargs: &Kwargs,
) -> CallResult {
    match entry.isolation() {
        PoolIsolation::PerThread => {
            let injected = entry
                .base_constant_pool()
                .appended(Constant::Identity(identity));
            let _scope = ThreadPoolScope::enter(entry.id(), injected);
            entry.call(args, kwargs)
        }
        PoolIsolation::Serialized => {
            let _gate = entry.gate().lock();
            let injected = entry
                .base_constant_pool()
                .appended(Constant::Identity(identity));
            let _scope = SharedPoolScope::swap(entry.shared_slot(), injected);
            entry.call(args, kwargs)
        }
    }
}

/// Push on entry, pop on drop.
struct ThreadPoolScope {
    depth: usize,
}

impl ThreadPoolScope {
    fn enter(entry: u64, pool: ConstantPool) -> Self {
        let depth = ACTIVE_POOLS.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(ActivePool { entry, pool });
            stack.len()
        });
        InterceptMetrics::inc(&global_metrics().injections);
        Self { depth }
    }
}

impl Drop for ThreadPoolScope {
    fn drop(&mut self) {
        let _ = ACTIVE_POOLS.try_with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() != self.depth {
                tracing::error!(
                    expected = self.depth,
                    actual = stack.len(),
                    "constant pool scopes unwound out of order"
                );
            }
            stack.truncate(self.depth - 1);
        });
        InterceptMetrics::inc(&global_metrics().restorations);
    }
}

/// Swap on entry, swap back on drop. Only constructed under the entry's gate.
struct SharedPoolScope<'a> {
    slot: &'a RwLock<ConstantPool>,
    previous: Option<ConstantPool>,
}

impl<'a> SharedPoolScope<'a> {
    fn swap(slot: &'a RwLock<ConstantPool>, pool: ConstantPool) -> Self {
        let previous = std::mem::replace(&mut *slot.write(), pool);
        InterceptMetrics::inc(&global_metrics().injections);
        Self {
            slot,
            previous: Some(previous),
        }
    }
}

impl Drop for SharedPoolScope<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.slot.write() = previous;
        }
        InterceptMetrics::inc(&global_metrics().restorations);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InterceptError;
    use crate::value::Value;

    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn trailing_reader(isolation: PoolIsolation) -> DispatchEntry {
        DispatchEntry::new(
            "trailing_reader",
            ConstantPool::from([Constant::None, Constant::Str("marker".into())]),
            isolation,
            |frame, args, _| {
                if args.get(0) == Some(&Value::from("panic")) {
                    panic!("body panicked");
                }
                if args.get(0) == Some(&Value::from("fail")) {
                    return Err(InterceptError::arguments("trailing_reader", "asked to fail"));
                }
                Ok(Value::Int(frame.injected_identity()?.get() as i64))
            },
        )
    }

    const MODES: [PoolIsolation; 2] = [PoolIsolation::PerThread, PoolIsolation::Serialized];

    #[test]
    fn pool_restored_after_success() {
        for mode in MODES {
            let entry = trailing_reader(mode);
            let before = entry.constant_pool();
            let id = CallableIdentity::from_raw(7);
            let out = invoke_with_identity(id, &entry, &Args::new(), &Kwargs::new()).unwrap();
            assert_eq!(out, Value::Int(7));
            assert_eq!(entry.constant_pool(), before);
            assert_eq!(thread_injection_depth(), 0);
        }
    }

    #[test]
    fn pool_restored_after_failure() {
        for mode in MODES {
            let entry = trailing_reader(mode);
            let before = entry.constant_pool();
            let id = CallableIdentity::from_raw(9);
            let err = invoke_with_identity(id, &entry, &Args::from(["fail"]), &Kwargs::new())
                .unwrap_err();
            assert!(matches!(err, InterceptError::Arguments { .. }));
            assert_eq!(entry.constant_pool(), before);
        }
    }

    #[test]
    fn pool_restored_after_panic() {
        for mode in MODES {
            let entry = trailing_reader(mode);
            let before = entry.constant_pool();
            let id = CallableIdentity::from_raw(11);
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                invoke_with_identity(id, &entry, &Args::from(["panic"]), &Kwargs::new())
            }));
            assert!(outcome.is_err());
            assert_eq!(entry.constant_pool(), before);
            assert_eq!(thread_injection_depth(), 0);
        }
    }

    #[test]
    fn injected_pool_is_base_plus_identity() {
        for mode in MODES {
            let entry = DispatchEntry::new(
                "pool_echo",
                ConstantPool::from([Constant::Int(1), Constant::Int(2)]),
                mode,
                |frame, _, _| Ok(Value::Int(frame.constants().len() as i64)),
            );
            let id = CallableIdentity::from_raw(3);
            let len = invoke_with_identity(id, &entry, &Args::new(), &Kwargs::new()).unwrap();
            assert_eq!(len, Value::Int(3));
        }
    }

    #[test]
    fn nested_injection_does_not_grow_the_pool() {
        for mode in MODES {
            let entry = DispatchEntry::new(
                "nested_echo",
                ConstantPool::from([Constant::Int(1)]),
                mode,
                |frame, args, kwargs| {
                    let depth = args.get(0).and_then(Value::as_int).unwrap_or(0);
                    let inner = if depth > 0 {
                        let next = CallableIdentity::from_raw(100 + depth as u64 - 1);
                        invoke_with_identity(
                            next,
                            frame.entry(),
                            &Args::from([depth - 1]),
                            kwargs,
                        )?
                    } else {
                        Value::None
                    };
                    let active = frame.entry().constant_pool();
                    assert_eq!(active.len(), 2);
                    assert_eq!(active.trailing_identity(), Some(frame.injected_identity()?));
                    Ok(Value::tuple([Value::Int(frame.injected_identity()?.get() as i64), inner]))
                },
            );
            let out = invoke_with_identity(
                CallableIdentity::from_raw(102),
                &entry,
                &Args::from([2]),
                &Kwargs::new(),
            )
            .unwrap();
            assert_eq!(out.to_string(), "(102, (101, (100, None)))");
            assert_eq!(entry.constant_pool(), *entry.base_constant_pool());
        }
    }

    #[test]
    fn per_thread_pools_are_invisible_to_other_entries() {
        let outer = trailing_reader(PoolIsolation::PerThread);
        let other = trailing_reader(PoolIsolation::PerThread);
        let other_base = other.constant_pool();
        let entry = DispatchEntry::new(
            "observer",
            ConstantPool::empty(),
            PoolIsolation::PerThread,
            move |_, _, _| Ok(Value::Bool(other.constant_pool() == other_base)),
        );
        let out = invoke_with_identity(
            CallableIdentity::from_raw(5),
            &entry,
            &Args::new(),
            &Kwargs::new(),
        )
        .unwrap();
        assert_eq!(out, Value::Bool(true));
        assert_eq!(outer.constant_pool().len(), 2);
    }
}
