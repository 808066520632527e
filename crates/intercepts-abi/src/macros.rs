//! Helper macros for thunk generation.
//!
//! Provides `native_thunk!`, which generates one const-generic
//! `unsafe extern "C" fn` per signature, and `thunk_table!`, which
//! instantiates it once per slot index.

/// Generate a C-ABI thunk generic over its slot index.
///
/// # Usage
///
/// ```ignore
/// native_thunk! {
///     /// Doc comment for the thunk.
///     fn my_thunk(a: c_long, b: c_long) via MY_SLOTS;
/// }
/// ```
///
/// This expands to `unsafe extern "C" fn my_thunk<const SLOT: usize>(..) -> c_long`
/// whose body converts its arguments to values and routes them through slot
/// `SLOT` of `MY_SLOTS`. The slot index is the thunk's only context.
macro_rules! native_thunk {
    (
        $(#[$meta:meta])*
        fn $name:ident( $($arg:ident : c_long),* $(,)? ) via $table:ident;
    ) => {
        $(#[$meta])*
        pub unsafe extern "C" fn $name<const SLOT: usize>( $($arg : c_long),* ) -> c_long {
            $crate::native::run_thunk(
                &$table,
                SLOT,
                intercepts_core::Args::from([$(intercepts_core::Value::Int(i64::from($arg))),*]),
            )
        }
    };
}

/// Array of function pointers, one thunk instantiation per listed slot.
macro_rules! thunk_table {
    ($thunk:ident as $fnty:ty; $($slot:literal)*) => {
        [$($thunk::<$slot> as $fnty),*]
    };
}

pub(crate) use native_thunk;
pub(crate) use thunk_table;
