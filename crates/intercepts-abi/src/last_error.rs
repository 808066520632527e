//! Thread-local last-error cell for native hooks.
//!
//! A failure cannot unwind through a C frame, so a thunk parks it here and
//! returns 0, the same way a libc routine sets `errno`. Like `errno`, a
//! successful call does not clear the cell.

use std::cell::RefCell;

use crate::error::NativeHookError;

thread_local! {
    static LAST_ERROR: RefCell<Option<NativeHookError>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(err: NativeHookError) {
    tracing::debug!(error = %err, "native hook failed; error parked for caller");
    let _ = LAST_ERROR.try_with(|cell| *cell.borrow_mut() = Some(err));
}

/// Take the failure recorded by the last failing thunk on this thread.
#[must_use]
pub fn take_last_error() -> Option<NativeHookError> {
    LAST_ERROR
        .try_with(|cell| cell.borrow_mut().take())
        .ok()
        .flatten()
}

/// True when a failure is waiting to be taken on this thread.
#[must_use]
pub fn has_last_error() -> bool {
    LAST_ERROR
        .try_with(|cell| cell.borrow().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_the_cell() {
        set_last_error(NativeHookError::Panicked {
            message: "boom".to_string(),
        });
        assert!(has_last_error());
        let err = take_last_error().unwrap();
        assert!(err.to_string().contains("boom"));
        assert!(!has_last_error());
        assert!(take_last_error().is_none());
    }

    #[test]
    fn cells_are_per_thread() {
        set_last_error(NativeHookError::Panicked {
            message: "here".to_string(),
        });
        let other = std::thread::spawn(has_last_error).join().unwrap();
        assert!(!other);
        assert!(take_last_error().is_some());
    }
}
