//! # intercepts-abi
//!
//! Interception for routines with a fixed C calling convention.
//!
//! A closure cannot be passed where C expects `long (*)(long)`, so this crate
//! keeps a table of pre-compiled `extern "C"` thunks per signature. Each thunk
//! knows only its slot index; the slot holds the trampoline built by
//! `intercepts-core`, which carries the hooked routine's identity into the
//! dispatch entry point.
//!
//! # Architecture
//!
//! ```text
//! C caller -> thunk<SLOT> -> slot table -> Trampoline -> DispatchEntry -> policies -> native fn
//! ```
//!
//! Failures and panics never unwind into the C caller. The thunk returns 0 and
//! parks the failure in a thread-local cell, read with [`take_last_error`].

mod macros;

pub mod error;
pub mod last_error;
pub mod native;

pub use error::NativeHookError;
pub use last_error::{has_last_error, take_last_error};
pub use native::{
    BINARY_SLOTS, BinaryFn, NativeHook, SLOT_CAPACITY, SlotTable, UNARY_SLOTS, UnaryFn,
    hook_binary, hook_unary,
};
