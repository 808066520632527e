//! Shareable callable descriptors.
//!
//! A [`Callable`] is an `Arc` handle to an immutable descriptor. The address of
//! that descriptor is what the identity encoder hands out, so a descriptor is
//! never moved or mutated after construction.

use std::fmt;
use std::sync::Arc;

use crate::error::CallResult;
use crate::value::{Args, Kwargs, Value};

type Body = dyn Fn(&Args, &Kwargs) -> CallResult + Send + Sync;

/// What sort of routine a callable wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    /// Routine with a fixed native calling convention.
    Native,
    /// Ordinary function.
    Function,
    /// Function bound to a receiver value.
    Bound,
    /// Substitute produced by the trampoline factory.
    Trampoline,
    /// Ephemeral callable with no stable identity.
    Transient,
}

impl CallableKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Function => "function",
            Self::Bound => "bound",
            Self::Trampoline => "trampoline",
            Self::Transient => "transient",
        }
    }
}

impl fmt::Display for CallableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Target {
    Direct(Box<Body>),
    Bound { function: Callable, receiver: Value },
}

pub(crate) struct CallableDescriptor {
    name: String,
    doc: Option<String>,
    kind: CallableKind,
    wrapped: Option<Callable>,
    target: Target,
}

/// Cheaply clonable handle to a callable descriptor.
#[derive(Clone)]
pub struct Callable(Arc<CallableDescriptor>);

impl Callable {
    /// Start building a callable named `name`.
    pub fn builder(name: impl Into<String>) -> CallableBuilder {
        CallableBuilder {
            name: name.into(),
            doc: None,
            kind: CallableKind::Function,
            wrapped: None,
        }
    }

    /// Undocumented function callable.
    pub fn function<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Self::builder(name).build(body)
    }

    /// Undocumented native callable.
    pub fn native<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Self::builder(name).kind(CallableKind::Native).build(body)
    }

    /// Bind this callable to `receiver`, which becomes the first positional
    /// argument of every call.
    #[must_use]
    pub fn bind(&self, receiver: impl Into<Value>) -> Self {
        Self(Arc::new(CallableDescriptor {
            name: self.0.name.clone(),
            doc: self.0.doc.clone(),
            kind: CallableKind::Bound,
            wrapped: None,
            target: Target::Bound {
                function: self.clone(),
                receiver: receiver.into(),
            },
        }))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    #[must_use]
    pub fn doc(&self) -> Option<&str> {
        self.0.doc.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> CallableKind {
        self.0.kind
    }

    /// The callable this one was built to stand in for, if any.
    #[must_use]
    pub fn wrapped(&self) -> Option<&Callable> {
        self.0.wrapped.as_ref()
    }

    /// Underlying function of a bound callable, following nested bindings.
    #[must_use]
    pub fn unbound(&self) -> &Callable {
        match &self.0.target {
            Target::Bound { function, .. } => function.unbound(),
            Target::Direct(_) => self,
        }
    }

    /// Receiver of a bound callable.
    #[must_use]
    pub fn receiver(&self) -> Option<&Value> {
        match &self.0.target {
            Target::Bound { receiver, .. } => Some(receiver),
            Target::Direct(_) => None,
        }
    }

    pub fn call(&self, args: &Args, kwargs: &Kwargs) -> CallResult {
        match &self.0.target {
            Target::Direct(body) => body(args, kwargs),
            Target::Bound { function, receiver } => {
                function.call(&args.prepended(receiver.clone()), kwargs)
            }
        }
    }

    /// Call with positional arguments only.
    pub fn call_positional(&self, args: impl Into<Args>) -> CallResult {
        self.call(&args.into(), &Kwargs::new())
    }

    /// True when both handles refer to the same descriptor.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn descriptor(&self) -> &Arc<CallableDescriptor> {
        &self.0
    }

    pub(crate) fn from_descriptor(descriptor: Arc<CallableDescriptor>) -> Self {
        Self(descriptor)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Callable`].
#[derive(Debug)]
pub struct CallableBuilder {
    name: String,
    doc: Option<String>,
    kind: CallableKind,
    wrapped: Option<Callable>,
}

impl CallableBuilder {
    #[must_use]
    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    #[must_use]
    pub fn kind(mut self, kind: CallableKind) -> Self {
        self.kind = kind;
        self
    }

    /// Copy name and doc from `original` and record it as the wrapped callable.
    #[must_use]
    pub fn wraps(mut self, original: &Callable) -> Self {
        self.name = original.name().to_string();
        self.doc = original.doc().map(str::to_string);
        self.wrapped = Some(original.clone());
        self
    }

    pub fn build<F>(self, body: F) -> Callable
    where
        F: Fn(&Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Callable(Arc::new(CallableDescriptor {
            name: self.name,
            doc: self.doc,
            kind: self.kind,
            wrapped: self.wrapped,
            target: Target::Direct(Box::new(body)),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_len() -> Callable {
        Callable::builder("echo_len")
            .doc("Return the number of positional arguments.")
            .build(|args, _| Ok(Value::Int(args.len() as i64)))
    }

    #[test]
    fn builder_sets_metadata() {
        let f = echo_len();
        assert_eq!(f.name(), "echo_len");
        assert_eq!(f.doc(), Some("Return the number of positional arguments."));
        assert_eq!(f.kind(), CallableKind::Function);
        assert!(f.wrapped().is_none());
    }

    #[test]
    fn bound_callable_prepends_receiver() {
        let f = echo_len();
        let method = f.bind("receiver");
        assert_eq!(method.kind(), CallableKind::Bound);
        assert_eq!(method.call_positional([1, 2]).unwrap(), Value::Int(3));
        assert!(method.unbound().ptr_eq(&f));
        assert_eq!(method.receiver(), Some(&Value::from("receiver")));
    }

    #[test]
    fn wraps_copies_name_and_doc() {
        let f = echo_len();
        let wrapper = Callable::builder("ignored")
            .wraps(&f)
            .build(|_, _| Ok(Value::None));
        assert_eq!(wrapper.name(), f.name());
        assert_eq!(wrapper.doc(), f.doc());
        assert!(wrapper.wrapped().is_some_and(|w| w.ptr_eq(&f)));
    }

    #[test]
    fn clones_share_descriptor() {
        let f = echo_len();
        let g = f.clone();
        assert!(f.ptr_eq(&g));
        assert!(!f.ptr_eq(&echo_len()));
    }
}
