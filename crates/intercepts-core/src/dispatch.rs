//! Dispatch entry point.
//!
//! A [`DispatchEntry`] is the one handler every trampoline funnels into. Its
//! parameter list carries only the forwarded call; the identity of the
//! intercepted callable arrives as the trailing constant of whichever constant
//! pool is active when the body starts running.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{ReentrantMutex, RwLock};

use crate::config::PoolIsolation;
use crate::error::{CallResult, InterceptError};
use crate::identity::{CallableIdentity, IdentityTable};
use crate::inject;
use crate::metrics::{InterceptMetrics, global_metrics};
use crate::policy::{Next, PolicyTable};
use crate::pool::{Constant, ConstantPool};
use crate::value::{Args, Kwargs};

/// Marker constant at the head of the standard dispatcher's pool.
pub const DISPATCH_MARKER: &str = "~intercept~";

/// Body of a dispatch entry.
pub type DispatchBody = dyn Fn(&DispatchFrame<'_>, &Args, &Kwargs) -> CallResult + Send + Sync;

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// View of a dispatch entry while its body runs.
pub struct DispatchFrame<'a> {
    entry: &'a DispatchEntry,
    constants: ConstantPool,
}

impl<'a> DispatchFrame<'a> {
    /// Constant pool that was active when the body started.
    #[must_use]
    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    #[must_use]
    pub fn entry(&self) -> &'a DispatchEntry {
        self.entry
    }

    /// Identity injected for this invocation.
    pub fn injected_identity(&self) -> Result<CallableIdentity, InterceptError> {
        self.constants
            .trailing_identity()
            .ok_or(InterceptError::UnresolvedIdentity { identity: None })
    }
}

/// A handler whose only per-call context is its active constant pool.
pub struct DispatchEntry {
    id: u64,
    name: String,
    base: ConstantPool,
    isolation: PoolIsolation,
    shared: RwLock<ConstantPool>,
    gate: ReentrantMutex<()>,
    body: Box<DispatchBody>,
}

impl DispatchEntry {
    /// Entry with an arbitrary body and base constant pool.
    pub fn new<F>(
        name: impl Into<String>,
        constants: ConstantPool,
        isolation: PoolIsolation,
        body: F,
    ) -> Self
    where
        F: Fn(&DispatchFrame<'_>, &Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Self {
            id: NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            shared: RwLock::new(constants.clone()),
            base: constants,
            isolation,
            gate: ReentrantMutex::new(()),
            body: Box::new(body),
        }
    }

    /// The standard dispatcher: resolve the injected identity and run the
    /// policy chain registered for it, defaulting to the original callable.
    pub fn dispatcher(
        policies: Arc<PolicyTable>,
        identities: &'static IdentityTable,
        isolation: PoolIsolation,
    ) -> Self {
        Self::new(
            "intercepts.dispatch",
            ConstantPool::from([Constant::Str(Arc::from(DISPATCH_MARKER))]),
            isolation,
            move |frame, args, kwargs| dispatch(frame, args, kwargs, &policies, identities),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn isolation(&self) -> PoolIsolation {
        self.isolation
    }

    /// The pool this entry was built with.
    #[must_use]
    pub fn base_constant_pool(&self) -> &ConstantPool {
        &self.base
    }

    /// The pool the body would observe if it ran now on this thread.
    ///
    /// In [`PoolIsolation::Serialized`] mode the slot is shared, so a call in
    /// flight on another thread is visible here.
    #[must_use]
    pub fn constant_pool(&self) -> ConstantPool {
        match self.isolation {
            PoolIsolation::PerThread => {
                inject::thread_active_pool(self.id).unwrap_or_else(|| self.base.clone())
            }
            PoolIsolation::Serialized => self.shared.read().clone(),
        }
    }

    /// Run the body against the currently active pool, with nothing injected.
    ///
    /// Reaching the standard dispatcher this way fails with
    /// [`InterceptError::UnresolvedIdentity`].
    pub fn call(&self, args: &Args, kwargs: &Kwargs) -> CallResult {
        let frame = DispatchFrame {
            entry: self,
            constants: self.constant_pool(),
        };
        (self.body)(&frame, args, kwargs)
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn shared_slot(&self) -> &RwLock<ConstantPool> {
        &self.shared
    }

    pub(crate) fn gate(&self) -> &ReentrantMutex<()> {
        &self.gate
    }
}

impl fmt::Debug for DispatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("isolation", &self.isolation)
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

fn dispatch(
    frame: &DispatchFrame<'_>,
    args: &Args,
    kwargs: &Kwargs,
    policies: &PolicyTable,
    identities: &IdentityTable,
) -> CallResult {
    let metrics = global_metrics();
    InterceptMetrics::inc(&metrics.dispatches);

    let identity = match frame.injected_identity() {
        Ok(identity) => identity,
        Err(err) => return Err(unresolved(frame, None, err)),
    };
    let Some(decoded) = identities.decode(identity) else {
        let err = InterceptError::UnresolvedIdentity {
            identity: Some(identity),
        };
        return Err(unresolved(frame, Some(identity), err));
    };

    let chain = policies.chain(identity);
    tracing::trace!(
        entry = frame.entry().name(),
        identity = %identity,
        callable = %decoded.name,
        layers = chain.as_ref().map_or(0, |c| c.len()),
        "dispatching intercepted call"
    );

    let result = match chain {
        Some(chain) => Next::new(&decoded.original, &chain).call(args, kwargs),
        None => {
            InterceptMetrics::inc(&metrics.passthroughs);
            decoded.original.call(args, kwargs)
        }
    };
    if result.is_err() {
        InterceptMetrics::inc(&metrics.failures);
    }
    result
}

fn unresolved(
    frame: &DispatchFrame<'_>,
    identity: Option<CallableIdentity>,
    err: InterceptError,
) -> InterceptError {
    InterceptMetrics::inc(&global_metrics().unresolved);
    tracing::error!(
        entry = frame.entry().name(),
        identity = ?identity,
        pool_len = frame.constants().len(),
        trailing = ?frame.constants().last(),
        "dispatch entry could not resolve the injected identity"
    );
    err
}
