//! Dispatch statistics.
//!
//! Lock-free counters recorded per call site and engine-wide. All updates
//! use `Relaxed` ordering: counters are for tuning and tests, never for
//! synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// Dispatch Tier
// =============================================================================

/// The tier that served a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DispatchTier {
    /// Speculation on the single loaded implementor.
    SingleImplementor = 0,
    /// Speculation on a never-overridden seed method.
    LeafMethod = 1,
    /// Monomorphic/polymorphic inline cache.
    Cached = 2,
    /// Generic lookup on every call.
    Megamorphic = 3,
}

impl DispatchTier {
    /// Number of tiers.
    pub const COUNT: usize = 4;

    /// All tiers in priority order.
    pub const ALL: [DispatchTier; Self::COUNT] = [
        DispatchTier::SingleImplementor,
        DispatchTier::LeafMethod,
        DispatchTier::Cached,
        DispatchTier::Megamorphic,
    ];

    /// How the tier invokes its target.
    #[inline]
    pub const fn call_kind(self) -> CallKind {
        match self {
            DispatchTier::Megamorphic => CallKind::Indirect,
            _ => CallKind::Direct,
        }
    }
}

/// Shape of the emitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// Callee bound once the guard passes; inlinable.
    Direct,
    /// Callee looked up on every call.
    Indirect,
}

// =============================================================================
// Counters
// =============================================================================

/// Atomic dispatch counters.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    hits: [AtomicU64; DispatchTier::COUNT],
    resolutions: AtomicU64,
    fallthroughs: AtomicU64,
    transitions: AtomicU64,
    megamorphic_transitions: AtomicU64,
}

impl DispatchCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// A call was served by `tier`.
    #[inline(always)]
    pub fn record_hit(&self, tier: DispatchTier) {
        self.hits[tier as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// A tier-3 miss was resolved through the generic lookup.
    #[inline]
    pub fn record_resolution(&self) {
        self.resolutions.fetch_add(1, Ordering::Relaxed);
    }

    /// A previously valid speculation or entry was found invalidated.
    #[inline]
    pub fn record_fallthrough(&self) {
        self.fallthroughs.fetch_add(1, Ordering::Relaxed);
    }

    /// A call site published a new state.
    #[inline]
    pub fn record_transition(&self, to_megamorphic: bool) {
        self.transitions.fetch_add(1, Ordering::Relaxed);
        if to_megamorphic {
            self.megamorphic_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Hits for one tier.
    #[inline]
    pub fn hits(&self, tier: DispatchTier) -> u64 {
        self.hits[tier as usize].load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> DispatchSnapshot {
        let mut hits = [0; DispatchTier::COUNT];
        for tier in DispatchTier::ALL {
            hits[tier as usize] = self.hits(tier);
        }
        DispatchSnapshot {
            hits,
            resolutions: self.resolutions.load(Ordering::Relaxed),
            fallthroughs: self.fallthroughs.load(Ordering::Relaxed),
            transitions: self.transitions.load(Ordering::Relaxed),
            megamorphic_transitions: self.megamorphic_transitions.load(Ordering::Relaxed),
            redefinition_slow_paths: 0,
        }
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// Copy of dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSnapshot {
    /// Calls served per tier, indexed by `DispatchTier as usize`.
    pub hits: [u64; DispatchTier::COUNT],
    /// Tier-3 resolutions through the generic lookup.
    pub resolutions: u64,
    /// Invalidated speculations or entries encountered.
    pub fallthroughs: u64,
    /// Published state transitions.
    pub transitions: u64,
    /// Transitions into the megamorphic state.
    pub megamorphic_transitions: u64,
    /// Entries into the removed-method slow path (engine-wide only).
    pub redefinition_slow_paths: u64,
}

impl DispatchSnapshot {
    /// Calls served by `tier`.
    #[inline]
    pub fn hits(&self, tier: DispatchTier) -> u64 {
        self.hits[tier as usize]
    }

    /// Calls made through a direct call.
    pub fn direct_calls(&self) -> u64 {
        DispatchTier::ALL
            .iter()
            .filter(|t| t.call_kind() == CallKind::Direct)
            .map(|t| self.hits(*t))
            .sum()
    }

    /// Calls made through an indirect call.
    pub fn indirect_calls(&self) -> u64 {
        self.hits(DispatchTier::Megamorphic)
    }

    /// All successful dispatches.
    pub fn total_calls(&self) -> u64 {
        self.hits.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_call_kinds() {
        assert_eq!(DispatchTier::SingleImplementor.call_kind(), CallKind::Direct);
        assert_eq!(DispatchTier::LeafMethod.call_kind(), CallKind::Direct);
        assert_eq!(DispatchTier::Cached.call_kind(), CallKind::Direct);
        assert_eq!(DispatchTier::Megamorphic.call_kind(), CallKind::Indirect);
    }

    #[test]
    fn test_snapshot_totals() {
        let counters = DispatchCounters::new();
        counters.record_hit(DispatchTier::SingleImplementor);
        counters.record_hit(DispatchTier::Cached);
        counters.record_hit(DispatchTier::Cached);
        counters.record_hit(DispatchTier::Megamorphic);
        counters.record_transition(false);
        counters.record_transition(true);

        let snap = counters.snapshot();
        assert_eq!(snap.hits(DispatchTier::Cached), 2);
        assert_eq!(snap.direct_calls(), 3);
        assert_eq!(snap.indirect_calls(), 1);
        assert_eq!(snap.total_calls(), 4);
        assert_eq!(snap.transitions, 2);
        assert_eq!(snap.megamorphic_transitions, 1);
    }

    #[test]
    fn test_concurrent_recording() {
        let counters = std::sync::Arc::new(DispatchCounters::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let c = counters.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.record_hit(DispatchTier::Cached);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(counters.hits(DispatchTier::Cached), 8000);
    }
}
