//! Integration test: native thunks routed through an interceptor.
//!
//! Validates that:
//! 1. A hooked libc routine behaves like the original until a policy is added.
//! 2. Policies see the call through the thunk and may rewrite the result.
//! 3. Forwarded failures surface through the last-error cell, not an unwind.
//! 4. Dropping a hook frees its slot.
//! 5. Dropping a hook unregisters its policies, and dropping one that has none
//!    is silent.
//!
//! Run: cargo test -p intercepts-abi --test native_hook_test

use std::sync::Mutex;

use intercepts_abi::{
    BINARY_SLOTS, NativeHookError, SLOT_CAPACITY, UNARY_SLOTS, hook_binary, hook_unary,
    take_last_error,
};
use intercepts_core::{InterceptError, Interceptor, Policy, PoolIsolation, Value};
use libc::c_long;

static TEST_GUARD: Mutex<()> = Mutex::new(());

#[derive(Debug, thiserror::Error)]
#[error("division by zero")]
struct DivideByZero;

unsafe extern "C" fn add(a: c_long, b: c_long) -> c_long {
    a.wrapping_add(b)
}

unsafe extern "C" fn quotient(a: c_long, b: c_long) -> c_long {
    if b == 0 { 0 } else { a / b }
}

#[test]
fn hooked_labs_passes_through_then_obeys_policy() {
    let _guard = TEST_GUARD.lock().unwrap();
    let interceptor = Interceptor::with_isolation(PoolIsolation::PerThread);
    // SAFETY: labs is defined for every long except LONG_MIN, which we never pass.
    let hook = unsafe { hook_unary(&interceptor, "labs", libc::labs) }.unwrap();
    let labs = hook.thunk();

    assert_eq!(unsafe { labs(-5) }, 5);

    interceptor
        .register_policy(
            hook.identity(),
            Policy::named("negate", |next, args, kwargs| {
                let v = next.call(args, kwargs)?.as_int().unwrap_or(0);
                Ok(Value::Int(-v))
            }),
        )
        .unwrap();
    assert_eq!(unsafe { labs(-5) }, -5);
    assert_eq!(unsafe { labs(7) }, -7);

    interceptor.unregister_policy(hook.identity(), None).unwrap();
    assert_eq!(unsafe { labs(-5) }, 5);
    assert!(take_last_error().is_none());
}

#[test]
fn binary_policy_sees_both_arguments() {
    let _guard = TEST_GUARD.lock().unwrap();
    let interceptor = Interceptor::with_isolation(PoolIsolation::Serialized);
    // SAFETY: add is total over c_long pairs.
    let hook = unsafe { hook_binary(&interceptor, "add", add) }.unwrap();
    interceptor
        .register_policy(
            hook.identity(),
            Policy::named("swap_sub", |_, args, _| {
                let a = args.get(0).and_then(Value::as_int).unwrap_or(0);
                let b = args.get(1).and_then(Value::as_int).unwrap_or(0);
                Ok(Value::Int(a - b))
            }),
        )
        .unwrap();
    let add_thunk = hook.thunk();
    assert_eq!(unsafe { add_thunk(10, 3) }, 7);
    assert_eq!(hook.name(), "add");
    assert_eq!(hook.original().call_positional([10, 3]).unwrap(), Value::Int(13));
}

#[test]
fn failures_park_in_last_error() {
    let _guard = TEST_GUARD.lock().unwrap();
    let interceptor = Interceptor::with_isolation(PoolIsolation::PerThread);
    // SAFETY: quotient guards its own division.
    let hook = unsafe { hook_binary(&interceptor, "quotient", quotient) }.unwrap();
    interceptor
        .register_policy(
            hook.identity(),
            Policy::named("reject_zero", |next, args, kwargs| {
                if args.get(1) == Some(&Value::Int(0)) {
                    return Err(InterceptError::raised(DivideByZero));
                }
                next.call(args, kwargs)
            }),
        )
        .unwrap();

    let thunk = hook.thunk();
    assert_eq!(unsafe { thunk(9, 3) }, 3);
    assert!(take_last_error().is_none());

    assert_eq!(unsafe { thunk(9, 0) }, 0);
    let err = take_last_error().unwrap();
    assert!(err.downcast_raised::<DivideByZero>().is_some());
}

#[test]
fn dropping_hooks_frees_slots() {
    let _guard = TEST_GUARD.lock().unwrap();
    let interceptor = Interceptor::with_isolation(PoolIsolation::PerThread);
    let before = UNARY_SLOTS.occupied();

    let mut hooks = Vec::new();
    for _ in before..SLOT_CAPACITY {
        // SAFETY: see hooked_labs_passes_through_then_obeys_policy.
        hooks.push(unsafe { hook_unary(&interceptor, "labs", libc::labs) }.unwrap());
    }
    assert_eq!(UNARY_SLOTS.occupied(), SLOT_CAPACITY);
    let err = unsafe { hook_unary(&interceptor, "labs", libc::labs) }.unwrap_err();
    assert!(matches!(err, NativeHookError::SlotsExhausted { .. }));

    let first = &hooks[0];
    assert_eq!(unsafe { (first.thunk())(-3) }, 3);
    hooks.clear();
    assert_eq!(UNARY_SLOTS.occupied(), before);
    assert_eq!(BINARY_SLOTS.occupied(), 0);
}

#[test]
fn dropping_a_hook_unregisters_its_policies() {
    let _guard = TEST_GUARD.lock().unwrap();
    let interceptor = Interceptor::with_isolation(PoolIsolation::PerThread);

    // SAFETY: see hooked_labs_passes_through_then_obeys_policy.
    let bare = unsafe { hook_unary(&interceptor, "labs", libc::labs) }.unwrap();
    drop(bare);
    assert!(interceptor.policies().is_empty());

    // SAFETY: add is total over c_long pairs.
    let hook = unsafe { hook_binary(&interceptor, "add", add) }.unwrap();
    let identity = hook.identity();
    interceptor
        .register_policy(identity, Policy::named("zero", |_, _, _| Ok(Value::Int(0))))
        .unwrap();
    interceptor
        .register_policy(identity, Policy::named("one", |_, _, _| Ok(Value::Int(1))))
        .unwrap();
    assert_eq!(interceptor.policies().depth(identity), 2);

    drop(hook);
    assert!(!interceptor.policies().contains(identity));
    let err = interceptor.unregister_policy(identity, None).unwrap_err();
    assert!(matches!(err, InterceptError::NotIntercepted { .. }));
    assert!(take_last_error().is_none());
}
