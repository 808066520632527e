//! Native hooks for fixed C signatures.
//!
//! A C function pointer carries no closure environment, so the identity of
//! the hooked routine cannot ride along with the call. Instead each signature
//! has a table of pre-compiled thunks, one per slot, with the slot index baked
//! in as a const generic. Hooking a routine parks its trampoline in a free
//! slot and hands out that slot's thunk.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use intercepts_core::{Args, Callable, CallableIdentity, Interceptor, InterceptError, Kwargs, Value};
use libc::c_long;
use parking_lot::RwLock;

use crate::error::NativeHookError;
use crate::last_error::set_last_error;
use crate::macros::{native_thunk, thunk_table};

/// Thunk slots per signature.
pub const SLOT_CAPACITY: usize = 16;

/// `long f(long)`
pub type UnaryFn = unsafe extern "C" fn(c_long) -> c_long;
/// `long f(long, long)`
pub type BinaryFn = unsafe extern "C" fn(c_long, c_long) -> c_long;

/// Fixed-size table of trampolines addressed by slot index.
pub struct SlotTable {
    signature: &'static str,
    slots: RwLock<[Option<Callable>; SLOT_CAPACITY]>,
}

impl SlotTable {
    const fn new(signature: &'static str) -> Self {
        Self {
            signature,
            slots: RwLock::new([const { None }; SLOT_CAPACITY]),
        }
    }

    #[must_use]
    pub fn signature(&self) -> &'static str {
        self.signature
    }

    /// Slots currently holding a trampoline.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.read().iter().filter(|s| s.is_some()).count()
    }

    fn claim(&self, trampoline: Callable) -> Result<usize, NativeHookError> {
        let mut slots = self.slots.write();
        let slot = slots
            .iter()
            .position(Option::is_none)
            .ok_or(NativeHookError::SlotsExhausted {
                signature: self.signature,
                capacity: SLOT_CAPACITY,
            })?;
        slots[slot] = Some(trampoline);
        Ok(slot)
    }

    fn release(&self, slot: usize) {
        if let Some(entry) = self.slots.write().get_mut(slot) {
            *entry = None;
        }
    }

    fn get(&self, slot: usize) -> Option<Callable> {
        self.slots.read().get(slot).cloned().flatten()
    }
}

impl fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotTable")
            .field("signature", &self.signature)
            .field("occupied", &self.occupied())
            .finish()
    }
}

pub static UNARY_SLOTS: SlotTable = SlotTable::new("unary");
pub static BINARY_SLOTS: SlotTable = SlotTable::new("binary");

native_thunk! {
    /// `long (*)(long)` entry for one unary slot.
    fn unary_thunk(a: c_long) via UNARY_SLOTS;
}

native_thunk! {
    /// `long (*)(long, long)` entry for one binary slot.
    fn binary_thunk(a: c_long, b: c_long) via BINARY_SLOTS;
}

static UNARY_THUNKS: [UnaryFn; SLOT_CAPACITY] =
    thunk_table!(unary_thunk as UnaryFn; 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);
static BINARY_THUNKS: [BinaryFn; SLOT_CAPACITY] =
    thunk_table!(binary_thunk as BinaryFn; 0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15);

/// Body shared by every thunk. Never unwinds.
pub(crate) fn run_thunk(table: &SlotTable, slot: usize, args: Args) -> c_long {
    let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<c_long, NativeHookError> {
        let trampoline = table.get(slot).ok_or(NativeHookError::SlotVacant {
            signature: table.signature,
            slot,
        })?;
        let value = trampoline.call(&args, &Kwargs::new())?;
        to_c_long(trampoline.name(), &value)
    }));
    match outcome {
        Ok(Ok(ret)) => ret,
        Ok(Err(err)) => {
            set_last_error(err);
            0
        }
        Err(payload) => {
            set_last_error(NativeHookError::Panicked {
                message: panic_message(payload.as_ref()),
            });
            0
        }
    }
}

fn to_c_long(name: &str, value: &Value) -> Result<c_long, NativeHookError> {
    value
        .as_int()
        .and_then(|v| c_long::try_from(v).ok())
        .ok_or_else(|| NativeHookError::BadReturn {
            name: name.to_string(),
            value: value.to_string(),
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn long_arg(name: &str, args: &Args, index: usize) -> Result<c_long, InterceptError> {
    args.get(index)
        .and_then(Value::as_int)
        .and_then(|v| c_long::try_from(v).ok())
        .ok_or_else(|| {
            InterceptError::arguments(name, format!("argument {index} must be a C long"))
        })
}

/// A native routine parked in a thunk slot.
///
/// Install [`NativeHook::thunk`] wherever the original function pointer was
/// used. Policies registered for [`NativeHook::identity`] apply to every call
/// through the thunk. Dropping the hook unregisters those policies and frees
/// the slot.
pub struct NativeHook<'a, F: Copy> {
    interceptor: &'a Interceptor,
    table: &'static SlotTable,
    slot: usize,
    thunk: F,
    identity: CallableIdentity,
    original: Callable,
}

impl<'a, F: Copy> NativeHook<'a, F> {
    /// C entry point routing into this hook.
    #[must_use]
    pub fn thunk(&self) -> F {
        self.thunk
    }

    #[must_use]
    pub fn identity(&self) -> CallableIdentity {
        self.identity
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.original.name()
    }

    /// The hooked routine, callable without going through the dispatcher.
    #[must_use]
    pub fn original(&self) -> &Callable {
        &self.original
    }

    #[must_use]
    pub fn interceptor(&self) -> &'a Interceptor {
        self.interceptor
    }
}

impl<F: Copy> fmt::Debug for NativeHook<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHook")
            .field("name", &self.original.name())
            .field("signature", &self.table.signature)
            .field("slot", &self.slot)
            .field("identity", &self.identity)
            .finish()
    }
}

impl<F: Copy> Drop for NativeHook<'_, F> {
    fn drop(&mut self) {
        match self.interceptor.unregister_policy(self.identity, None) {
            Ok(_) | Err(InterceptError::NotIntercepted { .. }) => {}
            Err(err) => tracing::error!(
                name = self.original.name(),
                identity = %self.identity,
                error = %err,
                "failed to unregister policies of released native hook"
            ),
        }
        self.table.release(self.slot);
        tracing::debug!(
            name = self.original.name(),
            signature = self.table.signature,
            slot = self.slot,
            "released native hook"
        );
    }
}

fn hook<'a, F: Copy>(
    interceptor: &'a Interceptor,
    table: &'static SlotTable,
    thunks: &[F; SLOT_CAPACITY],
    original: Callable,
) -> Result<NativeHook<'a, F>, NativeHookError> {
    let trampoline = interceptor.make_trampoline(&original)?;
    let identity = trampoline.identity();
    let slot = table.claim(trampoline.into_callable())?;
    tracing::debug!(
        name = original.name(),
        signature = table.signature,
        slot,
        identity = %identity,
        "hooked native routine"
    );
    Ok(NativeHook {
        interceptor,
        table,
        slot,
        thunk: thunks[slot],
        identity,
        original,
    })
}

/// Hook a `long f(long)` routine.
///
/// # Safety
///
/// `f` must be sound to call with any `c_long` argument, from any thread, for
/// as long as the returned hook lives.
pub unsafe fn hook_unary<'a>(
    interceptor: &'a Interceptor,
    name: &str,
    f: UnaryFn,
) -> Result<NativeHook<'a, UnaryFn>, NativeHookError> {
    let label: Arc<str> = Arc::from(name);
    let original = Callable::native(name, move |args, _| {
        let a = long_arg(&label, args, 0)?;
        // SAFETY: hook_unary's contract makes `f` callable with any c_long.
        let ret = unsafe { f(a) };
        Ok(Value::Int(i64::from(ret)))
    });
    hook(interceptor, &UNARY_SLOTS, &UNARY_THUNKS, original)
}

/// Hook a `long f(long, long)` routine.
///
/// # Safety
///
/// `f` must be sound to call with any pair of `c_long` arguments, from any
/// thread, for as long as the returned hook lives.
pub unsafe fn hook_binary<'a>(
    interceptor: &'a Interceptor,
    name: &str,
    f: BinaryFn,
) -> Result<NativeHook<'a, BinaryFn>, NativeHookError> {
    let label: Arc<str> = Arc::from(name);
    let original = Callable::native(name, move |args, _| {
        let a = long_arg(&label, args, 0)?;
        let b = long_arg(&label, args, 1)?;
        // SAFETY: hook_binary's contract makes `f` callable with any c_long pair.
        let ret = unsafe { f(a, b) };
        Ok(Value::Int(i64::from(ret)))
    });
    hook(interceptor, &BINARY_SLOTS, &BINARY_THUNKS, original)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant_slot_parks_an_error() {
        // Slot 15 of a fresh table is never claimed by this test binary.
        let table = SlotTable::new("test");
        let ret = run_thunk(&table, 15, Args::from([1]));
        assert_eq!(ret, 0);
        let err = crate::last_error::take_last_error().unwrap();
        assert!(matches!(err, NativeHookError::SlotVacant { slot: 15, .. }));
    }

    #[test]
    fn claim_and_release_cycle() {
        let table = SlotTable::new("test");
        let callable = Callable::function("one", |_, _| Ok(Value::Int(1)));
        let a = table.claim(callable.clone()).unwrap();
        let b = table.claim(callable.clone()).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.occupied(), 2);
        assert_eq!(run_thunk(&table, b, Args::new()), 1);

        table.release(a);
        assert_eq!(table.occupied(), 1);
        assert_eq!(table.claim(callable).unwrap(), a);
    }

    #[test]
    fn table_reports_exhaustion() {
        let table = SlotTable::new("test");
        let callable = Callable::function("one", |_, _| Ok(Value::Int(1)));
        for _ in 0..SLOT_CAPACITY {
            table.claim(callable.clone()).unwrap();
        }
        let err = table.claim(callable).unwrap_err();
        assert!(matches!(
            err,
            NativeHookError::SlotsExhausted { capacity: SLOT_CAPACITY, .. }
        ));
    }

    #[test]
    fn non_integer_results_are_rejected() {
        let table = SlotTable::new("test");
        let callable = Callable::function("text", |_, _| Ok(Value::from("nope")));
        let slot = table.claim(callable).unwrap();
        assert_eq!(run_thunk(&table, slot, Args::new()), 0);
        assert!(matches!(
            crate::last_error::take_last_error(),
            Some(NativeHookError::BadReturn { .. })
        ));
    }

    #[test]
    fn panics_do_not_cross_the_thunk() {
        let table = SlotTable::new("test");
        let callable = Callable::function("explode", |_, _| panic!("kaboom"));
        let slot = table.claim(callable).unwrap();
        assert_eq!(run_thunk(&table, slot, Args::new()), 0);
        let err = crate::last_error::take_last_error().unwrap();
        assert!(matches!(err, NativeHookError::Panicked { ref message } if message == "kaboom"));
    }
}
