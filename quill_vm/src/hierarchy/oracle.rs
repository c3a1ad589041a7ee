//! Class hierarchy oracle.
//!
//! Tracks, for every loaded class, which concrete classes implement it and
//! which of its methods have been overridden, and hands out revocable
//! assumption tokens on those two facts.
//!
//! # Tokens
//!
//! - **Single implementor**: one token per declaring type, minted on the
//!   first query that finds exactly one concrete implementor. Flipped when a
//!   second implementor registers, or when the implementor is redefined or
//!   unregistered.
//! - **Leaf method**: one token per method, minted on the first query while
//!   no loaded class overrides the method. Flipped when an overriding class
//!   registers or the method is redefined.
//!
//! A flipped token is dropped from the tables; a later query mints a fresh
//! one if the fact holds again.
//!
//! Queries and hooks serialize on one `RwLock`. Queries run on call-site
//! slow paths only, so the lock never sits on the dispatch fast path.

use std::sync::Arc;

use parking_lot::RwLock;
use quill_runtime::{
    Assumption, ClassHierarchyAssumption, ClassId, ConcreteType, HierarchyFact, MethodId,
    MethodVersion,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::debug;

use crate::ops::invoke_virtual::ResolutionSeed;

// =============================================================================
// State
// =============================================================================

#[derive(Debug)]
struct ImplementorToken {
    implementor: ClassId,
    token: Arc<Assumption>,
}

#[derive(Debug, Default)]
struct HierarchyState {
    /// Registered classes.
    classes: FxHashMap<ClassId, ConcreteType>,
    /// Concrete registered classes at or below each class.
    implementors: FxHashMap<ClassId, SmallVec<[ClassId; 2]>>,
    /// Number of registered classes overriding each method.
    overrides: FxHashMap<MethodId, u32>,
    /// Live single-implementor tokens keyed by declaring type.
    single: FxHashMap<ClassId, ImplementorToken>,
    /// Live leaf tokens keyed by method.
    leaf: FxHashMap<MethodId, Arc<Assumption>>,
}

impl HierarchyState {
    fn invalidate_single(&mut self, declaring: ClassId, reason: &str) {
        if let Some(record) = self.single.remove(&declaring) {
            if record.token.invalidate() {
                debug!(
                    target: "quill::hierarchy",
                    token = record.token.name(),
                    reason,
                    "single-implementor assumption invalidated"
                );
            }
        }
    }

    fn invalidate_leaf(&mut self, method: MethodId, reason: &str) {
        if let Some(token) = self.leaf.remove(&method) {
            if token.invalidate() {
                debug!(
                    target: "quill::hierarchy",
                    token = token.name(),
                    reason,
                    "leaf-method assumption invalidated"
                );
            }
        }
    }

    fn invalidate_implementor(&mut self, implementor: ClassId, reason: &str) {
        let stale: SmallVec<[ClassId; 4]> = self
            .single
            .iter()
            .filter(|(_, record)| record.implementor == implementor)
            .map(|(declaring, _)| *declaring)
            .collect();
        for declaring in stale {
            self.invalidate_single(declaring, reason);
        }
    }
}

/// Superclass methods replaced in `ty`'s vtable.
fn overridden_methods(ty: &ConcreteType) -> SmallVec<[MethodId; 4]> {
    let Some(superclass) = ty.superclass() else {
        return SmallVec::new();
    };
    let shared = superclass.vtable_len().min(ty.vtable_len()) as u32;
    (0..shared)
        .filter_map(|slot| {
            let inherited = superclass.vtable_method(slot)?;
            let own = ty.vtable_method(slot)?;
            (inherited.id() != own.id()).then(|| inherited.id())
        })
        .collect()
}

// =============================================================================
// Oracle
// =============================================================================

/// Answers hierarchy questions with revocable assumptions.
#[derive(Debug, Default)]
pub struct ClassHierarchyOracle {
    state: RwLock<HierarchyState>,
}

impl ClassHierarchyOracle {
    /// Create an oracle with no classes registered.
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// The single concrete implementor of the seed's declaring type.
    ///
    /// Returns `None` unless exactly one concrete implementor is registered.
    pub fn single_implementor(
        &self,
        seed: &ResolutionSeed,
    ) -> Option<(ConcreteType, ClassHierarchyAssumption)> {
        let declaring = seed.declaring_type().id();
        let mut state = self.state.write();

        let implementor_id = match state.implementors.get(&declaring) {
            Some(list) if list.len() == 1 => list[0],
            _ => return None,
        };
        let implementor = state.classes.get(&implementor_id)?.clone();

        let existing = state
            .single
            .get(&declaring)
            .filter(|record| record.implementor == implementor_id && record.token.is_valid())
            .map(|record| record.token.clone());
        let token = match existing {
            Some(token) => token,
            None => {
                let token = Assumption::new(format!(
                    "{} has single implementor {}",
                    seed.declaring_type(),
                    implementor
                ));
                state.single.insert(
                    declaring,
                    ImplementorToken {
                        implementor: implementor_id,
                        token: token.clone(),
                    },
                );
                token
            }
        };

        Some((
            implementor.clone(),
            ClassHierarchyAssumption::new(HierarchyFact::SingleImplementor(implementor), token),
        ))
    }

    /// Assumption that no registered class overrides `version`'s method.
    ///
    /// Already invalid if an override is registered.
    pub fn is_leaf_method(&self, version: &MethodVersion) -> ClassHierarchyAssumption {
        let method = version.method_id();
        let mut state = self.state.write();

        let token = if state.overrides.get(&method).copied().unwrap_or(0) > 0 {
            Assumption::never_valid(format!("{} is leaf", version.qualified_name()))
        } else {
            state
                .leaf
                .entry(method)
                .or_insert_with(|| Assumption::new(format!("{} is leaf", version.qualified_name())))
                .clone()
        };
        ClassHierarchyAssumption::new(HierarchyFact::LeafMethod, token)
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Class-load notification.
    ///
    /// Returns `false` if the class was already registered.
    pub fn register_class(&self, ty: &ConcreteType) -> bool {
        let mut state = self.state.write();
        if state.classes.contains_key(&ty.id()) {
            return false;
        }
        state.classes.insert(ty.id(), ty.clone());

        if ty.is_concrete() {
            for ancestor in ty.ancestors() {
                let list = state.implementors.entry(ancestor.id()).or_default();
                list.push(ty.id());
                if list.len() >= 2 {
                    state.invalidate_single(ancestor.id(), "second implementor loaded");
                }
            }
        }

        for method in overridden_methods(ty) {
            *state.overrides.entry(method).or_default() += 1;
            state.invalidate_leaf(method, "override loaded");
        }

        debug!(target: "quill::hierarchy", class = %ty, concrete = ty.is_concrete(), "class registered");
        true
    }

    /// Class-unload notification.
    ///
    /// Returns `false` if the class was not registered.
    pub fn unregister_class(&self, class: ClassId) -> bool {
        let mut state = self.state.write();
        let Some(ty) = state.classes.remove(&class) else {
            return false;
        };

        if ty.is_concrete() {
            for ancestor in ty.ancestors() {
                if let Some(list) = state.implementors.get_mut(&ancestor.id()) {
                    list.retain(|id| *id != class);
                    if list.is_empty() {
                        state.implementors.remove(&ancestor.id());
                    }
                }
            }
        }
        state.invalidate_implementor(class, "implementor unloaded");

        for method in overridden_methods(&ty) {
            if let Some(count) = state.overrides.get_mut(&method) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    state.overrides.remove(&method);
                }
            }
        }

        debug!(target: "quill::hierarchy", class = %ty, "class unregistered");
        true
    }

    /// A class was redefined: tokens naming it as implementor no longer hold.
    pub fn on_class_redefined(&self, class: ClassId) {
        self.state
            .write()
            .invalidate_implementor(class, "implementor redefined");
    }

    /// A method was redefined or removed.
    pub fn on_method_redefined(&self, method: MethodId) {
        self.state.write().invalidate_leaf(method, "method redefined");
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Whether `class` is registered.
    pub fn is_registered(&self, class: ClassId) -> bool {
        self.state.read().classes.contains_key(&class)
    }

    /// Number of registered classes.
    pub fn class_count(&self) -> usize {
        self.state.read().classes.len()
    }

    /// Number of registered concrete classes at or below `class`.
    pub fn implementor_count(&self, class: ClassId) -> usize {
        self.state
            .read()
            .implementors
            .get(&class)
            .map_or(0, |list| list.len())
    }
}
