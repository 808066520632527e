//! Call sites: named slots that callers invoke through.
//!
//! Intercepting a callable means swapping the callable held by its call site
//! for a trampoline. Callers holding the site see the swap on their next call.

use std::fmt;

use parking_lot::RwLock;

use crate::callable::{Callable, CallableKind};
use crate::error::CallResult;
use crate::value::{Args, Kwargs};

pub struct CallSite {
    name: String,
    original: Callable,
    current: RwLock<Callable>,
}

impl CallSite {
    /// Site initially holding `original`, named after it.
    #[must_use]
    pub fn new(original: Callable) -> Self {
        Self::named(original.name().to_string(), original)
    }

    #[must_use]
    pub fn named(name: impl Into<String>, original: Callable) -> Self {
        Self {
            name: name.into(),
            current: RwLock::new(original.clone()),
            original,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callable the site was created with.
    #[must_use]
    pub fn original(&self) -> &Callable {
        &self.original
    }

    /// Callable a caller would reach right now.
    #[must_use]
    pub fn current(&self) -> Callable {
        self.current.read().clone()
    }

    /// True while a trampoline is installed.
    #[must_use]
    pub fn is_intercepted(&self) -> bool {
        let current = self.current.read();
        !current.ptr_eq(&self.original)
            && (current.kind() == CallableKind::Trampoline
                || current.unbound().kind() == CallableKind::Trampoline)
    }

    /// Call whatever is installed. The lock is released before the call runs.
    pub fn call(&self, args: &Args, kwargs: &Kwargs) -> CallResult {
        let current = self.current();
        current.call(args, kwargs)
    }

    pub fn call_positional(&self, args: impl Into<Args>) -> CallResult {
        self.call(&args.into(), &Kwargs::new())
    }

    /// Install `callable` if the site still holds its original. Otherwise
    /// leaves the site alone and returns what is installed there.
    pub(crate) fn install(&self, callable: Callable) -> Result<(), Callable> {
        let mut current = self.current.write();
        if !current.ptr_eq(&self.original) {
            return Err(current.clone());
        }
        *current = callable;
        Ok(())
    }

    pub(crate) fn restore(&self) {
        *self.current.write() = self.original.clone();
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("name", &self.name)
            .field("original", &self.original)
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}
