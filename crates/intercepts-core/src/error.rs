//! Error taxonomy for interception.

use thiserror::Error;

use crate::callable::CallableKind;
use crate::identity::CallableIdentity;
use crate::value::Value;

/// Boxed failure raised by an original callable or a policy.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result of invoking any callable, trampoline or dispatch entry.
pub type CallResult = Result<Value, InterceptError>;

#[derive(Debug, Error)]
pub enum InterceptError {
    /// The trampoline factory could not derive a stable identity.
    #[error("cannot intercept `{name}`: {kind} callables have no stable identity")]
    UnsupportedCallableKind { name: String, kind: CallableKind },

    /// The dispatch entry point read a trailing constant that maps to no live
    /// callable, or found no injected identity at all. Always an invariant
    /// violation in the swap/restore ordering.
    #[error(
        "unresolved callable identity ({})",
        .identity.map_or_else(|| "no identity injected".to_string(), |id| id.to_string())
    )]
    UnresolvedIdentity { identity: Option<CallableIdentity> },

    /// Unregistration was requested for something with no registered policy.
    #[error("`{name}` is not intercepted")]
    NotIntercepted { name: String },

    /// The call site already holds a callable installed by someone else.
    #[error("`{name}` is already intercepted elsewhere")]
    AlreadyIntercepted { name: String },

    /// An adapter received arguments it cannot convert.
    #[error("bad arguments for `{name}`: {message}")]
    Arguments { name: String, message: String },

    /// Failure forwarded unchanged from the original callable or a policy.
    #[error("{0}")]
    Raised(#[source] BoxError),
}

impl InterceptError {
    /// Wrap a user-level failure so it propagates through dispatch untouched.
    pub fn raised(err: impl Into<BoxError>) -> Self {
        Self::Raised(err.into())
    }

    pub fn arguments(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Arguments {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Recover a forwarded failure of a concrete type.
    #[must_use]
    pub fn downcast_raised<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Raised(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// True for errors that indicate a broken swap/restore ordering.
    #[must_use]
    pub const fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::UnresolvedIdentity { .. })
    }
}
