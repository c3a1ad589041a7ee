//! Revocable assumptions.
//!
//! An [`Assumption`] is a one-way validity flag: it starts valid and may be
//! invalidated exactly once. Speculative dispatch tiers capture assumptions
//! when they are built and re-check them immediately before every call.
//!
//! # Memory Ordering
//!
//! - `is_valid` is a single `Acquire` load; readers never take locks.
//! - `invalidate` is an `AcqRel` compare-and-swap. Everything a writer
//!   published before invalidating is visible to any reader that observes
//!   the flag as invalid.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::object::class::ConcreteType;

// =============================================================================
// Assumption
// =============================================================================

/// A monotonic validity token.
pub struct Assumption {
    /// `true` until invalidated.
    valid: AtomicBool,
    /// Human-readable description for diagnostics.
    name: Arc<str>,
}

impl Assumption {
    /// Create a new valid assumption.
    pub fn new(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(true),
            name: name.into(),
        })
    }

    /// Create an assumption that was never valid.
    ///
    /// Returned by queries whose answer is already known to be negative, so
    /// callers can treat every answer uniformly.
    pub fn never_valid(name: impl Into<Arc<str>>) -> Arc<Self> {
        Arc::new(Self {
            valid: AtomicBool::new(false),
            name: name.into(),
        })
    }

    /// Check whether the assumption still holds.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Invalidate the assumption.
    ///
    /// Returns `true` if this call performed the transition, `false` if the
    /// assumption was already invalid.
    #[inline]
    pub fn invalidate(&self) -> bool {
        self.valid
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Diagnostic name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Assumption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Assumption")
            .field("name", &self.name)
            .field("valid", &self.is_valid())
            .finish()
    }
}

// =============================================================================
// Class Hierarchy Assumption
// =============================================================================

/// What a [`ClassHierarchyAssumption`] asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyFact {
    /// No loaded subclass overrides the method.
    LeafMethod,
    /// Exactly one loaded concrete class implements the declaring type.
    SingleImplementor(ConcreteType),
}

/// An assumption about the loaded class hierarchy.
///
/// Owned by the class hierarchy oracle; dispatch caches hold clones and only
/// ever read the token.
#[derive(Debug, Clone)]
pub struct ClassHierarchyAssumption {
    fact: HierarchyFact,
    token: Arc<Assumption>,
}

impl ClassHierarchyAssumption {
    /// Wrap a token with the fact it guards.
    pub fn new(fact: HierarchyFact, token: Arc<Assumption>) -> Self {
        Self { fact, token }
    }

    /// The guarded fact.
    #[inline]
    pub fn fact(&self) -> &HierarchyFact {
        &self.fact
    }

    /// The implementor carried by a single-implementor assumption.
    #[inline]
    pub fn implementor(&self) -> Option<&ConcreteType> {
        match &self.fact {
            HierarchyFact::SingleImplementor(ty) => Some(ty),
            HierarchyFact::LeafMethod => None,
        }
    }

    /// Check whether the fact still holds.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.token.is_valid()
    }

    /// The underlying token.
    #[inline]
    pub fn token(&self) -> &Arc<Assumption> {
        &self.token
    }
}
