//! Registration front door.
//!
//! An [`Interceptor`] owns one dispatch entry and one policy table. Registering
//! a policy for a call site installs a trampoline for the site's original
//! callable (once per site) and pushes the policy onto the chain for
//! the original's identity.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::callable::Callable;
use crate::config::{PoolIsolation, pool_isolation};
use crate::dispatch::DispatchEntry;
use crate::error::InterceptError;
use crate::identity::{CallableIdentity, IdentityTable, global_identities};
use crate::policy::{Policy, PolicyTable};
use crate::site::CallSite;
use crate::trampoline::{Trampoline, make_trampoline};

/// Sites sharing one original identity. Each holds its own trampoline, so
/// different bindings of one method keep their own receivers.
#[derive(Default)]
struct Installation {
    sites: Vec<Arc<CallSite>>,
}

impl Installation {
    fn contains(&self, site: &Arc<CallSite>) -> bool {
        self.sites.iter().any(|s| Arc::ptr_eq(s, site))
    }

    fn restore(&self) {
        for site in &self.sites {
            site.restore();
        }
    }
}

pub struct Interceptor {
    entry: Arc<DispatchEntry>,
    policies: Arc<PolicyTable>,
    identities: &'static IdentityTable,
    installs: Mutex<HashMap<CallableIdentity, Installation>>,
}

impl Interceptor {
    /// Interceptor using the configured isolation mode.
    #[must_use]
    pub fn new() -> Self {
        Self::with_isolation(pool_isolation())
    }

    #[must_use]
    pub fn with_isolation(isolation: PoolIsolation) -> Self {
        let policies = Arc::new(PolicyTable::new());
        let identities = global_identities();
        Self {
            entry: Arc::new(DispatchEntry::dispatcher(
                policies.clone(),
                identities,
                isolation,
            )),
            policies,
            identities,
            installs: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide interceptor.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<Interceptor> = OnceLock::new();
        GLOBAL.get_or_init(Self::new)
    }

    #[must_use]
    pub fn dispatch_entry(&self) -> &Arc<DispatchEntry> {
        &self.entry
    }

    #[must_use]
    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    #[must_use]
    pub fn isolation(&self) -> PoolIsolation {
        self.entry.isolation()
    }

    /// Trampoline for `original` wired to this interceptor's dispatch entry.
    /// Installing it is up to the caller.
    pub fn make_trampoline(&self, original: &Callable) -> Result<Trampoline, InterceptError> {
        make_trampoline(original, &self.entry, self.identities)
    }

    /// Push `policy` for an identity obtained from a trampoline or the encoder.
    /// Returns the new chain depth.
    pub fn register_policy(
        &self,
        identity: CallableIdentity,
        policy: Policy,
    ) -> Result<usize, InterceptError> {
        let decoded = self.identities.decode(identity).ok_or(
            InterceptError::UnresolvedIdentity {
                identity: Some(identity),
            },
        )?;
        let label = policy.label().to_string();
        let depth = self.policies.register(identity, &decoded.original, policy);
        tracing::debug!(
            callable = %decoded.name,
            identity = %identity,
            policy = %label,
            depth,
            "registered policy"
        );
        Ok(depth)
    }

    /// Pop `depth` policies (all for `None`). Returns the remaining depth.
    pub fn unregister_policy(
        &self,
        identity: CallableIdentity,
        depth: Option<usize>,
    ) -> Result<usize, InterceptError> {
        let remaining = self.policies.unregister(identity, depth).ok_or_else(|| {
            InterceptError::NotIntercepted {
                name: self
                    .identities
                    .decode(identity)
                    .map_or_else(|| identity.to_string(), |d| d.name),
            }
        })?;
        tracing::debug!(identity = %identity, remaining, "unregistered policy");
        Ok(remaining)
    }

    /// Intercept `site` with `policy`.
    ///
    /// The first registration for a site installs a trampoline there; later
    /// ones only stack another policy on the chain for its identity. A site
    /// already holding something other than its original (for instance
    /// another interceptor's trampoline) is refused with
    /// [`InterceptError::AlreadyIntercepted`].
    pub fn register(
        &self,
        site: &Arc<CallSite>,
        policy: Policy,
    ) -> Result<CallableIdentity, InterceptError> {
        let mut installs = self.installs.lock();
        let identity = self.identities.encode(site.original())?;
        let installed_here = installs.get(&identity).is_some_and(|i| i.contains(site));
        if !installed_here {
            let trampoline = self.make_trampoline(site.original())?;
            if let Err(occupant) = site.install(trampoline.into_callable()) {
                tracing::warn!(
                    site = site.name(),
                    occupant = occupant.name(),
                    "refusing to intercept a site that is already intercepted"
                );
                return Err(InterceptError::AlreadyIntercepted {
                    name: site.name().to_string(),
                });
            }
            installs.entry(identity).or_default().sites.push(site.clone());
        }
        let label = policy.label().to_string();
        let depth = self.policies.register(identity, site.original(), policy);
        tracing::debug!(
            site = site.name(),
            identity = %identity,
            policy = %label,
            depth,
            "intercepted call site"
        );
        Ok(identity)
    }

    /// Pop `depth` policies for `site` (all for `None`). When none remain the
    /// original is restored at every site sharing its trampoline.
    /// Returns the remaining depth.
    pub fn unregister(&self, site: &CallSite, depth: Option<usize>) -> Result<usize, InterceptError> {
        let mut installs = self.installs.lock();
        let identity = self.identities.encode(site.original())?;
        let remaining = self.policies.unregister(identity, depth).ok_or_else(|| {
            InterceptError::NotIntercepted {
                name: site.name().to_string(),
            }
        })?;
        if remaining == 0 {
            if let Some(installation) = installs.remove(&identity) {
                installation.restore();
            }
            tracing::debug!(site = site.name(), identity = %identity, "restored call site");
        } else {
            tracing::debug!(site = site.name(), identity = %identity, remaining, "unregistered policy");
        }
        Ok(remaining)
    }

    /// Drop every policy and restore every call site.
    pub fn unregister_all(&self) {
        let mut installs = self.installs.lock();
        let restored = installs.len();
        for (_, installation) in installs.drain() {
            installation.restore();
        }
        self.policies.clear();
        if restored > 0 {
            tracing::debug!(restored, "removed all interceptions");
        }
    }

    /// Whether `site` currently has any policy registered for its original.
    #[must_use]
    pub fn is_registered(&self, site: &CallSite) -> bool {
        self.identities
            .encode(site.original())
            .is_ok_and(|identity| self.policies.contains(identity))
    }
}

impl Default for Interceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Interceptor {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

impl std::fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptor")
            .field("entry", &self.entry)
            .field("policies", &self.policies.len())
            .field("installs", &self.installs.lock().len())
            .finish()
    }
}
