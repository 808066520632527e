//! Trampoline factory.
//!
//! A trampoline is a callable with the same name and documentation as its
//! original whose body does nothing except hand the call, together with the
//! original's identity, to a dispatch entry.

use std::sync::Arc;

use crate::callable::{Callable, CallableKind};
use crate::dispatch::DispatchEntry;
use crate::error::{CallResult, InterceptError};
use crate::identity::{CallableIdentity, IdentityTable};
use crate::inject::invoke_with_identity;
use crate::metrics::{InterceptMetrics, global_metrics};
use crate::value::{Args, Kwargs};

/// Substitute callable produced by [`make_trampoline`].
#[derive(Debug, Clone)]
pub struct Trampoline {
    callable: Callable,
    identity: CallableIdentity,
    original: Callable,
    entry: Arc<DispatchEntry>,
}

impl Trampoline {
    /// The installable substitute.
    #[must_use]
    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    #[must_use]
    pub fn into_callable(self) -> Callable {
        self.callable
    }

    /// Identity injected on every invocation.
    #[must_use]
    pub fn identity(&self) -> CallableIdentity {
        self.identity
    }

    #[must_use]
    pub fn original(&self) -> &Callable {
        &self.original
    }

    #[must_use]
    pub fn entry(&self) -> &Arc<DispatchEntry> {
        &self.entry
    }

    pub fn call(&self, args: &Args, kwargs: &Kwargs) -> CallResult {
        self.callable.call(args, kwargs)
    }
}

/// Build a trampoline that forwards every call of `original` to `entry`.
///
/// The trampoline keeps `original` alive, so its identity stays decodable for
/// as long as the trampoline exists. A bound original yields a trampoline
/// bound to the same receiver; the dispatch entry sees the underlying
/// function's identity and the receiver as the first argument.
pub fn make_trampoline(
    original: &Callable,
    entry: &Arc<DispatchEntry>,
    identities: &IdentityTable,
) -> Result<Trampoline, InterceptError> {
    let identity = identities.encode(original)?;

    let target = entry.clone();
    let forward = Callable::builder(original.name())
        .kind(CallableKind::Trampoline)
        .wraps(original)
        .build(move |args, kwargs| invoke_with_identity(identity, &target, args, kwargs));

    let callable = match original.receiver() {
        Some(receiver) => forward.bind(receiver.clone()),
        None => forward,
    };

    InterceptMetrics::inc(&global_metrics().trampolines);
    tracing::debug!(
        callable = original.name(),
        kind = %original.kind(),
        identity = %identity,
        entry = entry.name(),
        "built trampoline"
    );

    Ok(Trampoline {
        callable,
        identity,
        original: original.clone(),
        entry: entry.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolIsolation;
    use crate::pool::ConstantPool;
    use crate::value::Value;

    fn identity_echo() -> Arc<DispatchEntry> {
        Arc::new(DispatchEntry::new(
            "identity_echo",
            ConstantPool::empty(),
            PoolIsolation::PerThread,
            |frame, args, _| {
                let id = frame.injected_identity()?;
                Ok(Value::tuple([
                    Value::Int(id.get() as i64),
                    Value::Int(args.len() as i64),
                ]))
            },
        ))
    }

    #[test]
    fn trampoline_copies_metadata() {
        let table = IdentityTable::new();
        let original = Callable::builder("add")
            .doc("Add two integers.")
            .build(|_, _| Ok(Value::None));
        let trampoline = make_trampoline(&original, &identity_echo(), &table).unwrap();

        assert_eq!(trampoline.callable().name(), "add");
        assert_eq!(trampoline.callable().doc(), Some("Add two integers."));
        assert_eq!(trampoline.callable().kind(), CallableKind::Trampoline);
        assert!(trampoline.original().ptr_eq(&original));
    }

    #[test]
    fn trampoline_injects_original_identity() {
        let table = IdentityTable::new();
        let original = Callable::function("f", |_, _| Ok(Value::None));
        let trampoline = make_trampoline(&original, &identity_echo(), &table).unwrap();
        let expected = table.encode(&original).unwrap();

        let out = trampoline.call(&Args::from([1, 2, 3]), &Kwargs::new()).unwrap();
        assert_eq!(
            out,
            Value::tuple([Value::Int(expected.get() as i64), Value::Int(3)])
        );
        assert_eq!(trampoline.identity(), expected);
    }

    #[test]
    fn bound_trampoline_forwards_receiver() {
        let table = IdentityTable::new();
        let method = Callable::function("m", |_, _| Ok(Value::None));
        let bound = method.bind("receiver");
        let trampoline = make_trampoline(&bound, &identity_echo(), &table).unwrap();

        assert_eq!(trampoline.identity(), table.encode(&method).unwrap());
        assert_eq!(trampoline.callable().kind(), CallableKind::Bound);
        let out = trampoline.call(&Args::from([1]), &Kwargs::new()).unwrap();
        assert_eq!(out.as_tuple().map(|t| t[1].clone()), Some(Value::Int(2)));
    }

    #[test]
    fn transient_callables_are_rejected() {
        let table = IdentityTable::new();
        let transient = Callable::builder("lambda")
            .kind(CallableKind::Transient)
            .build(|_, _| Ok(Value::None));
        let err = make_trampoline(&transient, &identity_echo(), &table).unwrap_err();
        assert!(matches!(err, InterceptError::UnsupportedCallableKind { .. }));
    }
}
