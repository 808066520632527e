use intercepts_core::InterceptError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NativeHookError {
    #[error("all {capacity} {signature} thunk slots are in use")]
    SlotsExhausted {
        signature: &'static str,
        capacity: usize,
    },

    #[error("{signature} thunk slot {slot} has no hook installed")]
    SlotVacant { signature: &'static str, slot: usize },

    #[error("`{name}` returned {value}, which is not a C long")]
    BadReturn { name: String, value: String },

    #[error("hooked call panicked: {message}")]
    Panicked { message: String },

    #[error(transparent)]
    Intercept(#[from] InterceptError),
}

impl NativeHookError {
    /// Forwarded user failure of a concrete type, if that is what this is.
    #[must_use]
    pub fn downcast_raised<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Intercept(inner) => inner.downcast_raised::<E>(),
            _ => None,
        }
    }
}
