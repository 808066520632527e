//! Constant pools embedded in a dispatch entry.
//!
//! Pools are immutable, reference-counted sequences. Appending produces a new
//! pool; the original is never touched, so a pool captured before a swap is
//! exactly the pool restored after it.

use std::fmt;
use std::sync::Arc;

use crate::identity::CallableIdentity;

/// One constant-pool slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    None,
    Int(i64),
    Str(Arc<str>),
    /// Injected callable identity.
    Identity(CallableIdentity),
}

impl Constant {
    #[must_use]
    pub fn as_identity(&self) -> Option<CallableIdentity> {
        match self {
            Self::Identity(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Identity(id) => write!(f, "<identity {id}>"),
        }
    }
}

/// Ordered, immutable constant sequence.
#[derive(Debug, Clone)]
pub struct ConstantPool(Arc<[Constant]>);

impl ConstantPool {
    #[must_use]
    pub fn new(constants: impl IntoIterator<Item = Constant>) -> Self {
        Self(constants.into_iter().collect())
    }

    #[must_use]
    pub fn empty() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Constant> {
        self.0.get(index)
    }

    #[must_use]
    pub fn last(&self) -> Option<&Constant> {
        self.0.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Constant> {
        self.0.iter()
    }

    /// Fresh pool holding these constants followed by `constant`.
    #[must_use]
    pub fn appended(&self, constant: Constant) -> Self {
        let mut constants = Vec::with_capacity(self.0.len() + 1);
        constants.extend(self.0.iter().cloned());
        constants.push(constant);
        Self(constants.into())
    }

    /// Identity stored in the trailing slot, if the trailing slot holds one.
    #[must_use]
    pub fn trailing_identity(&self) -> Option<CallableIdentity> {
        self.last().and_then(Constant::as_identity)
    }

    /// True when both pools share the same backing allocation.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for ConstantPool {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.0[..] == other.0[..]
    }
}

impl Eq for ConstantPool {}

impl<const N: usize> From<[Constant; N]> for ConstantPool {
    fn from(constants: [Constant; N]) -> Self {
        Self::new(constants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_leaves_original_untouched() {
        let base = ConstantPool::from([Constant::None, Constant::Int(7)]);
        let id = CallableIdentity::from_raw(0x1000);
        let extended = base.appended(Constant::Identity(id));

        assert_eq!(base.len(), 2);
        assert_eq!(extended.len(), 3);
        assert_eq!(extended.trailing_identity(), Some(id));
        assert_eq!(base.trailing_identity(), None);
        assert!(!extended.ptr_eq(&base));
    }

    #[test]
    fn equality_is_elementwise() {
        let a = ConstantPool::from([Constant::Str("x".into()), Constant::Int(1)]);
        let b = ConstantPool::from([Constant::Str("x".into()), Constant::Int(1)]);
        let c = ConstantPool::from([Constant::Int(1), Constant::Str("x".into())]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(ConstantPool::empty(), ConstantPool::new(Vec::new()));
    }
}
