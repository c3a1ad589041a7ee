//! The INVOKEVIRTUAL call-site node.
//!
//! # Dispatch
//!
//! 1. Null check on the receiver (never cached).
//! 2. Lock-free load of the site's state and a match against the receiver.
//!    A hit invokes its target directly; a megamorphic site looks up and
//!    invokes indirectly.
//! 3. On a miss, the cold path takes the site's writer lock, re-checks the
//!    state, computes the next state, publishes it, and releases the lock
//!    before invoking anything.

use std::sync::Arc;

use quill_runtime::{ConcreteType, MethodVersion, Value};
use tracing::{debug, info};

use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use crate::inline_cache::{
    CacheEntry, CallSiteClassification, CallSiteProfile, DispatchCache, DispatchState,
    LeafSpeculation, Selection, SingleImplementorSpeculation,
};
use crate::ops::invoke_virtual::ResolutionSeed;
use crate::stats::{DispatchCounters, DispatchSnapshot, DispatchTier};

/// How the slow path decided to invoke.
enum Plan {
    Direct(DispatchTier, Arc<MethodVersion>),
    Indirect(Option<Arc<MethodVersion>>),
}

/// A linked virtual call site.
pub struct InvokeVirtualNode {
    engine: Arc<DispatchEngine>,
    seed: ResolutionSeed,
    cache: DispatchCache,
    counters: DispatchCounters,
}

impl InvokeVirtualNode {
    /// Create a node for `seed` in the `Uninitialized` state.
    pub fn new(engine: Arc<DispatchEngine>, seed: ResolutionSeed) -> Self {
        Self {
            engine,
            seed,
            cache: DispatchCache::new(),
            counters: DispatchCounters::new(),
        }
    }

    /// The seed this site was linked with.
    #[inline]
    pub fn seed(&self) -> &ResolutionSeed {
        &self.seed
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatch on `args[0]` and invoke the resolved method with `args`.
    #[inline]
    pub fn dispatch(&self, args: &[Value]) -> Result<Value, DispatchError> {
        let receiver = match args.first() {
            Some(Value::Object(object)) => object.concrete_type(),
            Some(Value::Null) | None => {
                return Err(DispatchError::NullReceiver {
                    method: Arc::from(self.seed.qualified_name()),
                });
            }
            Some(other) => {
                return Err(DispatchError::InvalidReceiver {
                    method: Arc::from(self.seed.qualified_name()),
                    found: other.kind_name(),
                });
            }
        };

        let state = self.cache.load();
        match state.select(receiver) {
            Selection::Direct(tier, target) => self.call_direct(tier, target, args),
            Selection::Indirect => self.call_megamorphic(receiver, None, args),
            Selection::Miss => self.dispatch_slow(receiver, args),
        }
    }

    #[cold]
    #[inline(never)]
    fn dispatch_slow(&self, receiver: &ConcreteType, args: &[Value]) -> Result<Value, DispatchError> {
        let plan = {
            let writer = self.cache.lock();
            let current = self.cache.load_full();
            match current.select(receiver) {
                // Another writer got here first
                Selection::Direct(tier, target) => Plan::Direct(tier, target.clone()),
                Selection::Indirect => Plan::Indirect(None),
                Selection::Miss => {
                    if current.is_fallthrough(receiver) {
                        self.record(|c| c.record_fallthrough());
                    }
                    let (next, plan) = self.transition(&current, receiver)?;
                    if let Some(next) = next {
                        self.publish(&writer, &current, next);
                    }
                    plan
                }
            }
        };

        match plan {
            Plan::Direct(tier, target) => self.call_direct(tier, &target, args),
            Plan::Indirect(target) => self.call_megamorphic(receiver, target, args),
        }
    }

    /// Compute the next state for a miss on `receiver`.
    ///
    /// Tiers are tried from the state's floor downwards. A resolution failure
    /// returns the error and leaves the state as it was.
    fn transition(
        &self,
        current: &DispatchState,
        receiver: &ConcreteType,
    ) -> Result<(Option<DispatchState>, Plan), DispatchError> {
        let config = self.engine.config();
        let floor = current.floor();

        if floor <= DispatchTier::SingleImplementor && config.single_implementor_speculation {
            if let Some(spec) = self.speculate_single_implementor(receiver) {
                let target = spec.target().clone();
                return Ok((
                    Some(DispatchState::SingleImplementor(spec)),
                    Plan::Direct(DispatchTier::SingleImplementor, target),
                ));
            }
        }

        if floor <= DispatchTier::LeafMethod && config.leaf_method_speculation {
            if let Some(spec) = self.speculate_leaf(receiver)? {
                let target = spec.target().clone();
                return Ok((
                    Some(DispatchState::Leaf(spec)),
                    Plan::Direct(DispatchTier::LeafMethod, target),
                ));
            }
        }

        if floor <= DispatchTier::Cached {
            let target = self.engine.method_lookup(&self.seed, receiver)?;
            self.record(|c| c.record_resolution());
            let next = current.with_cached(
                CacheEntry::new(receiver.clone(), target.clone()),
                config.cache_limit,
            );
            let plan = match next {
                DispatchState::Megamorphic => Plan::Indirect(Some(target)),
                _ => Plan::Direct(DispatchTier::Cached, target),
            };
            return Ok((Some(next), plan));
        }

        Ok((None, Plan::Indirect(None)))
    }

    fn speculate_single_implementor(
        &self,
        receiver: &ConcreteType,
    ) -> Option<SingleImplementorSpeculation> {
        let (implementor, assumption) = self.engine.oracle().single_implementor(&self.seed)?;
        if implementor != *receiver {
            return None;
        }
        let target = self.engine.method_lookup(&self.seed, &implementor).ok()?;
        let spec = SingleImplementorSpeculation::new(assumption, implementor, target);
        spec.is_valid().then_some(spec)
    }

    fn speculate_leaf(&self, receiver: &ConcreteType) -> Result<Option<LeafSpeculation>, DispatchError> {
        let seed_method = self.seed.method();
        if seed_method.is_abstract() || seed_method.is_removed() {
            return Ok(None);
        }
        let resolved = self.engine.method_lookup(&self.seed, receiver)?;
        if resolved.method_id() != seed_method.id() {
            return Ok(None);
        }
        let assumption = self.engine.oracle().is_leaf_method(&resolved);
        let spec = LeafSpeculation::new(assumption, resolved);
        Ok(spec.is_valid().then_some(spec))
    }

    fn publish(
        &self,
        writer: &parking_lot::MutexGuard<'_, ()>,
        current: &DispatchState,
        next: DispatchState,
    ) {
        let from = current.label();
        let to = next.label();
        let to_megamorphic = matches!(next, DispatchState::Megamorphic);
        if !self.cache.publish(writer, next) {
            return;
        }
        self.record(|c| c.record_transition(to_megamorphic));

        if to_megamorphic {
            info!(
                target: "quill::dispatch",
                site = self.seed.qualified_name(),
                from,
                "call site went megamorphic"
            );
        } else if self.engine.config().trace_transitions {
            info!(target: "quill::dispatch", site = self.seed.qualified_name(), from, to, "call site transition");
        } else {
            debug!(target: "quill::dispatch", site = self.seed.qualified_name(), from, to, "call site transition");
        }
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Statically bound call.
    #[inline(always)]
    fn call_direct(
        &self,
        tier: DispatchTier,
        target: &MethodVersion,
        args: &[Value],
    ) -> Result<Value, DispatchError> {
        self.record(|c| c.record_hit(tier));
        Ok(target.invoke(args)?)
    }

    /// Call through a looked-up target.
    fn call_megamorphic(
        &self,
        receiver: &ConcreteType,
        resolved: Option<Arc<MethodVersion>>,
        args: &[Value],
    ) -> Result<Value, DispatchError> {
        let target = match resolved {
            Some(target) => target,
            None => self.engine.method_lookup(&self.seed, receiver)?,
        };
        let call_target = target.call_target().ok_or_else(|| DispatchError::AbstractMethod {
            class: Arc::from(receiver.name()),
            method: Arc::from(self.seed.qualified_name()),
        })?;
        self.record(|c| c.record_hit(DispatchTier::Megamorphic));
        Ok(call_target.call(args)?)
    }

    #[inline(always)]
    fn record(&self, f: impl Fn(&DispatchCounters)) {
        f(&self.counters);
        f(self.engine.counters());
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Current state, for downstream compilers.
    pub fn profile(&self) -> CallSiteProfile {
        self.cache.load().profile()
    }

    /// Coarse shape of the site.
    pub fn classification(&self) -> CallSiteClassification {
        self.cache.load().classification()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> Arc<DispatchState> {
        self.cache.load_full()
    }

    /// Counters of this site.
    pub fn stats(&self) -> DispatchSnapshot {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for InvokeVirtualNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeVirtualNode")
            .field("seed", &self.seed)
            .field("cache", &self.cache)
            .finish()
    }
}
