//! Identity encoder.
//!
//! A [`CallableIdentity`] is the address of a callable's descriptor. The table
//! keeps only weak references. Strong references live with whoever needs the
//! identity to stay meaningful: a trampoline holds its original, and a policy
//! chain holds the callable it was registered for. While either exists the
//! descriptor stays allocated and its address cannot be reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use crate::callable::{Callable, CallableDescriptor, CallableKind};
use crate::error::InterceptError;

/// Entry count above which dead weak references are swept on insert.
const PRUNE_FLOOR: usize = 64;

/// Numeric handle uniquely denoting one live callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableIdentity(u64);

impl CallableIdentity {
    /// Raw numeric value, as stored in a constant pool.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Reinterpret a raw value read back from a constant pool.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for CallableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Result of decoding an identity.
#[derive(Debug, Clone)]
pub struct DecodedCallable {
    pub name: String,
    pub doc: Option<String>,
    pub original: Callable,
}

/// Concurrent identity -> descriptor table.
#[derive(Debug, Default)]
pub struct IdentityTable {
    entries: RwLock<HashMap<CallableIdentity, Weak<CallableDescriptor>>>,
    prune_at: AtomicUsize,
}

impl IdentityTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode `callable`, recording it for later decoding.
    ///
    /// Bound callables encode to their underlying function so every binding of
    /// one function shares an identity.
    pub fn encode(&self, callable: &Callable) -> Result<CallableIdentity, InterceptError> {
        let target = callable.unbound();
        if target.kind() == CallableKind::Transient {
            return Err(InterceptError::UnsupportedCallableKind {
                name: target.name().to_string(),
                kind: target.kind(),
            });
        }

        let descriptor = target.descriptor();
        let identity = CallableIdentity(Arc::as_ptr(descriptor) as usize as u64);

        // A recorded weak reference pins the allocation, so an existing entry at
        // this address is always this descriptor.
        let mut entries = self.entries.write();
        if !entries.contains_key(&identity) {
            entries.insert(identity, Arc::downgrade(descriptor));
            let threshold = self.prune_at.load(Ordering::Relaxed).max(PRUNE_FLOOR);
            if entries.len() > threshold {
                entries.retain(|_, weak| weak.strong_count() > 0);
                self.prune_at.store(entries.len() * 2, Ordering::Relaxed);
            }
        }
        Ok(identity)
    }

    /// Resolve an identity back to its callable, if the callable is alive.
    #[must_use]
    pub fn decode(&self, identity: CallableIdentity) -> Option<DecodedCallable> {
        let descriptor = self.entries.read().get(&identity)?.upgrade()?;
        let original = Callable::from_descriptor(descriptor);
        Some(DecodedCallable {
            name: original.name().to_string(),
            doc: original.doc().map(str::to_string),
            original,
        })
    }

    /// Number of recorded identities, including ones whose callable has died
    /// but has not been swept yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

static GLOBAL_IDENTITIES: OnceLock<IdentityTable> = OnceLock::new();

/// Process-wide identity table.
#[must_use]
pub fn global_identities() -> &'static IdentityTable {
    GLOBAL_IDENTITIES.get_or_init(IdentityTable::new)
}

/// Encode `callable` in the process-wide table.
pub fn encode(callable: &Callable) -> Result<CallableIdentity, InterceptError> {
    global_identities().encode(callable)
}

/// Decode `identity` from the process-wide table.
#[must_use]
pub fn decode(identity: CallableIdentity) -> Option<DecodedCallable> {
    global_identities().decode(identity)
}
