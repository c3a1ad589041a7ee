//! Per-call-site dispatch state.
//!
//! Every INVOKEVIRTUAL site owns a [`DispatchCache`]: an immutable
//! [`DispatchState`] published through an atomic reference. Readers load it
//! without locking; writers build the next state on the side and swap it in
//! while holding a per-site mutex that readers never touch.
//!
//! # State Machine
//!
//! ```text
//!                 ┌───────────────┐
//!                 │ Uninitialized │
//!                 └───────┬───────┘
//!                         │ first dispatch
//!            ╔════════════▼═══════════╗
//!            ║   SingleImplementor    ║  (tier 1, direct call)
//!            ╚════════════╤═══════════╝
//!                         │ token flipped
//!            ╔════════════▼═══════════╗
//!            ║          Leaf          ║  (tier 2, direct call)
//!            ╚════════════╤═══════════╝
//!                         │ token flipped
//!            ╔════════════▼═══════════╗
//!            ║   Cached (≤ LIMIT)     ║  (tier 3, direct call)
//!            ╚════════════╤═══════════╝
//!                         │ LIMIT + 1 types
//!                 ┌───────▼───────┐
//!                 │  Megamorphic  │      (tier 4, indirect call)
//!                 └───────────────┘
//! ```
//!
//! Transitions only move down. Any tier may be skipped when it does not
//! apply, but a tier that was left is never entered again at the same site.

use std::fmt;
use std::sync::Arc;

use arc_swap::{ArcSwap, Guard};
use parking_lot::{Mutex, MutexGuard};
use quill_runtime::{ClassHierarchyAssumption, ConcreteType, MethodVersion};
use smallvec::SmallVec;

use crate::config::MAX_CACHE_LIMIT;
use crate::stats::DispatchTier;

/// Default polymorphic entry bound.
pub const CACHE_LIMIT: usize = MAX_CACHE_LIMIT;

// =============================================================================
// Cache Entries
// =============================================================================

/// A resolved (receiver type → method version) pair.
#[derive(Clone)]
pub struct CacheEntry {
    guard: ConcreteType,
    target: Arc<MethodVersion>,
}

impl CacheEntry {
    /// Create an entry.
    #[inline]
    pub fn new(guard: ConcreteType, target: Arc<MethodVersion>) -> Self {
        Self { guard, target }
    }

    /// Receiver type this entry matches.
    #[inline]
    pub fn guard(&self) -> &ConcreteType {
        &self.guard
    }

    /// Resolved method version.
    #[inline]
    pub fn target(&self) -> &Arc<MethodVersion> {
        &self.target
    }

    /// Whether the target version is still current.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.target.is_valid()
    }
}

impl fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} -> {}@{}{}",
            self.guard,
            self.target.qualified_name(),
            self.target.epoch(),
            if self.is_valid() { "" } else { " (invalid)" }
        )
    }
}

/// Immutable, bounded list of cache entries.
///
/// Guards are unique within a table.
#[derive(Debug, Clone, Default)]
pub struct CacheTable {
    entries: SmallVec<[CacheEntry; 4]>,
}

impl CacheTable {
    /// Valid entry whose guard is exactly `receiver`.
    #[inline(always)]
    pub fn lookup(&self, receiver: &ConcreteType) -> Option<&CacheEntry> {
        self.entries
            .iter()
            .find(|e| e.guard == *receiver)
            .filter(|e| e.is_valid())
    }

    /// Whether an invalidated entry for `receiver` is present.
    pub fn has_stale(&self, receiver: &ConcreteType) -> bool {
        self.entries
            .iter()
            .any(|e| e.guard == *receiver && !e.is_valid())
    }

    /// Number of entries, valid or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in insertion order.
    #[inline]
    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// A copy of this table with `entry` added.
    ///
    /// Invalid entries and any previous entry for the same guard are dropped
    /// first. Returns `None` when `limit` valid entries remain.
    pub fn with_entry(&self, entry: CacheEntry, limit: usize) -> Option<CacheTable> {
        let mut entries: SmallVec<[CacheEntry; 4]> = self
            .entries
            .iter()
            .filter(|e| e.is_valid() && e.guard != entry.guard)
            .cloned()
            .collect();
        if entries.len() >= limit {
            return None;
        }
        entries.push(entry);
        Some(CacheTable { entries })
    }
}

// =============================================================================
// Speculations
// =============================================================================

/// Tier-1 state: the declaring type has exactly one loaded implementor.
#[derive(Debug, Clone)]
pub struct SingleImplementorSpeculation {
    assumption: ClassHierarchyAssumption,
    implementor: ConcreteType,
    target: Arc<MethodVersion>,
}

impl SingleImplementorSpeculation {
    /// Pair a single-implementor assumption with the implementor's target.
    pub fn new(
        assumption: ClassHierarchyAssumption,
        implementor: ConcreteType,
        target: Arc<MethodVersion>,
    ) -> Self {
        Self {
            assumption,
            implementor,
            target,
        }
    }

    /// The speculated implementor.
    #[inline]
    pub fn implementor(&self) -> &ConcreteType {
        &self.implementor
    }

    /// Target resolved on the implementor.
    #[inline]
    pub fn target(&self) -> &Arc<MethodVersion> {
        &self.target
    }

    /// Both the hierarchy token and the version token hold.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.assumption.is_valid() && self.target.is_valid()
    }
}

/// Tier-2 state: the seed method has no loaded override.
#[derive(Debug, Clone)]
pub struct LeafSpeculation {
    assumption: ClassHierarchyAssumption,
    target: Arc<MethodVersion>,
}

impl LeafSpeculation {
    /// Pair a leaf-method assumption with the seed method's version.
    pub fn new(assumption: ClassHierarchyAssumption, target: Arc<MethodVersion>) -> Self {
        Self { assumption, target }
    }

    /// The seed method's resolved version.
    #[inline]
    pub fn target(&self) -> &Arc<MethodVersion> {
        &self.target
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.assumption.is_valid() && self.target.is_valid()
    }
}

// =============================================================================
// Dispatch State
// =============================================================================

/// Immutable state of one call site.
#[derive(Debug, Clone, Default)]
pub enum DispatchState {
    /// Never dispatched.
    #[default]
    Uninitialized,
    /// Tier 1.
    SingleImplementor(SingleImplementorSpeculation),
    /// Tier 2.
    Leaf(LeafSpeculation),
    /// Tier 3.
    Cached(CacheTable),
    /// Tier 4, terminal.
    Megamorphic,
}

/// Outcome of matching a receiver against the current state.
#[derive(Debug)]
pub enum Selection<'a> {
    /// Invoke `target` with a direct call.
    Direct(DispatchTier, &'a Arc<MethodVersion>),
    /// Look up and invoke through an indirect call.
    Indirect,
    /// No valid tier applies; take the slow path.
    Miss,
}

impl DispatchState {
    /// Position in the tier order; transitions never decrease it.
    #[inline]
    pub fn rank(&self) -> u8 {
        match self {
            DispatchState::Uninitialized => 0,
            DispatchState::SingleImplementor(_) => 1,
            DispatchState::Leaf(_) => 2,
            DispatchState::Cached(_) => 3,
            DispatchState::Megamorphic => 4,
        }
    }

    /// The first tier a transition out of this state may select.
    pub fn floor(&self) -> DispatchTier {
        match self {
            DispatchState::Uninitialized => DispatchTier::SingleImplementor,
            DispatchState::SingleImplementor(_) => DispatchTier::LeafMethod,
            DispatchState::Leaf(_) | DispatchState::Cached(_) => DispatchTier::Cached,
            DispatchState::Megamorphic => DispatchTier::Megamorphic,
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchState::Uninitialized => "uninitialized",
            DispatchState::SingleImplementor(_) => "single-implementor",
            DispatchState::Leaf(_) => "leaf",
            DispatchState::Cached(t) if t.len() <= 1 => "monomorphic",
            DispatchState::Cached(_) => "polymorphic",
            DispatchState::Megamorphic => "megamorphic",
        }
    }

    /// Match `receiver` against this state.
    ///
    /// Tokens are checked here, right before the caller invokes the target.
    #[inline(always)]
    pub fn select(&self, receiver: &ConcreteType) -> Selection<'_> {
        match self {
            DispatchState::SingleImplementor(s) if s.implementor == *receiver && s.is_valid() => {
                Selection::Direct(DispatchTier::SingleImplementor, &s.target)
            }
            DispatchState::Leaf(s) if s.is_valid() => {
                Selection::Direct(DispatchTier::LeafMethod, &s.target)
            }
            DispatchState::Cached(table) => match table.lookup(receiver) {
                Some(entry) => Selection::Direct(DispatchTier::Cached, &entry.target),
                None => Selection::Miss,
            },
            DispatchState::Megamorphic => Selection::Indirect,
            _ => Selection::Miss,
        }
    }

    /// Whether a miss on `receiver` was caused by an invalidated token.
    pub fn is_fallthrough(&self, receiver: &ConcreteType) -> bool {
        match self {
            DispatchState::SingleImplementor(s) => !s.is_valid(),
            DispatchState::Leaf(s) => !s.is_valid(),
            DispatchState::Cached(table) => table.has_stale(receiver),
            _ => false,
        }
    }

    /// State after caching `entry`: the extended table, or `Megamorphic`
    /// once the table is full of valid entries.
    pub fn with_cached(&self, entry: CacheEntry, limit: usize) -> DispatchState {
        let empty = CacheTable::default();
        let table = match self {
            DispatchState::Cached(table) => table,
            DispatchState::Megamorphic => return DispatchState::Megamorphic,
            _ => &empty,
        };
        match table.with_entry(entry, limit) {
            Some(next) => DispatchState::Cached(next),
            None => DispatchState::Megamorphic,
        }
    }

    /// Read-only view for downstream compilers.
    pub fn profile(&self) -> CallSiteProfile {
        match self {
            DispatchState::Uninitialized => CallSiteProfile::Uninitialized,
            DispatchState::SingleImplementor(s) => CallSiteProfile::SingleImplementor {
                implementor: s.implementor.clone(),
                target: s.target.clone(),
            },
            DispatchState::Leaf(s) => CallSiteProfile::Leaf {
                target: s.target.clone(),
            },
            DispatchState::Cached(table) => CallSiteProfile::Polymorphic(
                table
                    .entries()
                    .iter()
                    .filter(|e| e.is_valid())
                    .map(|e| (e.guard.clone(), e.target.clone()))
                    .collect(),
            ),
            DispatchState::Megamorphic => CallSiteProfile::Megamorphic,
        }
    }

    /// Coarse classification of the site.
    pub fn classification(&self) -> CallSiteClassification {
        match self {
            DispatchState::Uninitialized => CallSiteClassification::Uninitialized,
            DispatchState::SingleImplementor(_) | DispatchState::Leaf(_) => {
                CallSiteClassification::Monomorphic
            }
            DispatchState::Cached(table) => match table.len() {
                0 => CallSiteClassification::Uninitialized,
                1 => CallSiteClassification::Monomorphic,
                _ => CallSiteClassification::Polymorphic,
            },
            DispatchState::Megamorphic => CallSiteClassification::Megamorphic,
        }
    }
}

// =============================================================================
// Profile
// =============================================================================

/// What a call site has observed, for downstream compilers.
#[derive(Debug, Clone)]
pub enum CallSiteProfile {
    Uninitialized,
    SingleImplementor {
        implementor: ConcreteType,
        target: Arc<MethodVersion>,
    },
    Leaf {
        target: Arc<MethodVersion>,
    },
    /// Valid (guard, target) pairs in insertion order.
    Polymorphic(Vec<(ConcreteType, Arc<MethodVersion>)>),
    Megamorphic,
}

/// Coarse call-site shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallSiteClassification {
    Uninitialized,
    Monomorphic,
    Polymorphic,
    Megamorphic,
}

// =============================================================================
// Dispatch Cache
// =============================================================================

/// Atomically published dispatch state plus its writer lock.
#[derive(Default)]
pub struct DispatchCache {
    state: ArcSwap<DispatchState>,
    writer: Mutex<()>,
}

impl DispatchCache {
    /// Create a cache in the `Uninitialized` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free snapshot of the current state.
    #[inline(always)]
    pub fn load(&self) -> Guard<Arc<DispatchState>> {
        self.state.load()
    }

    /// Owned snapshot of the current state.
    #[inline]
    pub fn load_full(&self) -> Arc<DispatchState> {
        self.state.load_full()
    }

    /// Serialize with other writers of this site.
    #[inline]
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    /// Publish `next`. The caller must hold the writer lock.
    ///
    /// Returns `false` and keeps the current state if `next` would move up
    /// the tier order.
    pub fn publish(&self, _writer: &MutexGuard<'_, ()>, next: DispatchState) -> bool {
        if next.rank() < self.state.load().rank() {
            return false;
        }
        self.state.store(Arc::new(next));
        true
    }
}

impl fmt::Debug for DispatchCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCache")
            .field("state", &self.state.load().label())
            .finish()
    }
}
