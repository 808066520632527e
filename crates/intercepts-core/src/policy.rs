//! Per-identity policy chains.
//!
//! A policy wraps one intercepted callable. Policies registered for the same
//! identity stack: the most recently registered one runs first and reaches
//! the earlier ones (and finally the original) through [`Next`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::callable::Callable;
use crate::error::CallResult;
use crate::identity::CallableIdentity;
use crate::metrics::{InterceptMetrics, global_metrics};
use crate::value::{Args, Kwargs};

type PolicyFn = dyn Fn(&Next<'_>, &Args, &Kwargs) -> CallResult + Send + Sync;

/// A handler deciding what an intercepted call does.
#[derive(Clone)]
pub struct Policy {
    label: Arc<str>,
    handler: Arc<PolicyFn>,
}

impl Policy {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Next<'_>, &Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Self::named("policy", handler)
    }

    /// Policy with a label used in logs.
    pub fn named<F>(label: &str, handler: F) -> Self
    where
        F: Fn(&Next<'_>, &Args, &Kwargs) -> CallResult + Send + Sync + 'static,
    {
        Self {
            label: Arc::from(label),
            handler: Arc::new(handler),
        }
    }

    /// Policy that ignores the original and always calls `replacement`.
    pub fn substitute(replacement: Callable) -> Self {
        let label = replacement.name().to_string();
        Self::named(&label, move |_, args, kwargs| replacement.call(args, kwargs))
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy").field("label", &self.label).finish_non_exhaustive()
    }
}

/// The rest of a policy chain, ending in the original callable.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    original: &'a Callable,
    layers: &'a [Policy],
}

impl<'a> Next<'a> {
    /// `layers` run from last to first.
    #[must_use]
    pub fn new(original: &'a Callable, layers: &'a [Policy]) -> Self {
        Self { original, layers }
    }

    /// Continue the chain: run the next-older policy, or the original when
    /// none remain.
    pub fn call(&self, args: &Args, kwargs: &Kwargs) -> CallResult {
        match self.layers.split_last() {
            Some((outer, rest)) => {
                InterceptMetrics::inc(&global_metrics().policy_calls);
                let next = Next::new(self.original, rest);
                (outer.handler)(&next, args, kwargs)
            }
            None => self.original.call(args, kwargs),
        }
    }

    pub fn call_positional(&self, args: impl Into<Args>) -> CallResult {
        self.call(&args.into(), &Kwargs::new())
    }

    /// Name of the intercepted callable.
    #[must_use]
    pub fn name(&self) -> &'a str {
        self.original.name()
    }

    #[must_use]
    pub fn doc(&self) -> Option<&'a str> {
        self.original.doc()
    }

    /// The intercepted callable itself, bypassing remaining policies.
    #[must_use]
    pub fn original(&self) -> &'a Callable {
        self.original
    }

    /// Policies still ahead of the original.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.layers.len()
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next")
            .field("original", self.original)
            .field("remaining", &self.layers.len())
            .finish()
    }
}

/// Policies for one identity, oldest first.
///
/// Holds the intercepted callable strongly. While any policy is registered the
/// descriptor stays allocated, so its address cannot be handed to a new
/// callable that would then inherit this chain.
#[derive(Debug, Clone)]
struct PolicyChain {
    owner: Callable,
    layers: Arc<[Policy]>,
}

/// Identity -> policy chain.
#[derive(Debug, Default)]
pub struct PolicyTable {
    chains: RwLock<HashMap<CallableIdentity, PolicyChain>>,
}

impl PolicyTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `policy` on top of the chain for `identity`, the identity of
    /// `owner`. Returns the new depth.
    ///
    /// `owner` is kept alive until the chain is emptied.
    pub fn register(&self, identity: CallableIdentity, owner: &Callable, policy: Policy) -> usize {
        let mut chains = self.chains.write();
        let mut layers: Vec<Policy> = chains
            .get(&identity)
            .map(|chain| chain.layers.to_vec())
            .unwrap_or_default();
        layers.push(policy);
        let depth = layers.len();
        chains.insert(
            identity,
            PolicyChain {
                owner: owner.unbound().clone(),
                layers: layers.into(),
            },
        );
        depth
    }

    /// Pop `depth` policies (all of them for `None`) from the chain for
    /// `identity`. Returns the remaining depth, or `None` if nothing was
    /// registered.
    pub fn unregister(&self, identity: CallableIdentity, depth: Option<usize>) -> Option<usize> {
        let mut chains = self.chains.write();
        let chain = chains.get(&identity)?;
        let keep = depth.map_or(0, |d| chain.layers.len().saturating_sub(d));
        if keep == 0 {
            chains.remove(&identity);
        } else {
            let kept = PolicyChain {
                owner: chain.owner.clone(),
                layers: chain.layers[..keep].to_vec().into(),
            };
            chains.insert(identity, kept);
        }
        Some(keep)
    }

    /// Snapshot of the chain for `identity`. Holds no lock once returned, so
    /// policies may register or unregister while it runs.
    #[must_use]
    pub fn chain(&self, identity: CallableIdentity) -> Option<Arc<[Policy]>> {
        self.chains.read().get(&identity).map(|c| c.layers.clone())
    }

    #[must_use]
    pub fn depth(&self, identity: CallableIdentity) -> usize {
        self.chains.read().get(&identity).map_or(0, |c| c.layers.len())
    }

    #[must_use]
    pub fn contains(&self, identity: CallableIdentity) -> bool {
        self.chains.read().contains_key(&identity)
    }

    #[must_use]
    pub fn identities(&self) -> Vec<CallableIdentity> {
        self.chains.read().keys().copied().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.read().is_empty()
    }

    pub fn clear(&self) {
        self.chains.write().clear();
    }
}
