//! Dispatch engine context.
//!
//! One [`DispatchEngine`] is shared by every call site of a VM instance. It
//! owns the class hierarchy oracle, the redefinition coordinator, the
//! configuration and the engine-wide counters, and is the entry point for
//! class-loading and redefinition events.

use std::sync::Arc;

use quill_runtime::{ClassId, ConcreteType, Method, MethodBody, MethodVersion};

use crate::config::{ConfigError, DispatchConfig};
use crate::error::DispatchError;
use crate::hierarchy::ClassHierarchyOracle;
use crate::ops::invoke_virtual::{InvokeVirtualNode, ResolutionSeed, generic_method_lookup};
use crate::redefinition::RedefinitionCoordinator;
use crate::stats::{DispatchCounters, DispatchSnapshot};

/// Shared services behind every call site.
#[derive(Debug)]
pub struct DispatchEngine {
    config: DispatchConfig,
    root: ConcreteType,
    oracle: Arc<ClassHierarchyOracle>,
    coordinator: RedefinitionCoordinator,
    counters: DispatchCounters,
}

impl DispatchEngine {
    /// Create an engine whose root type is `root`.
    ///
    /// The root type is registered with the oracle.
    pub fn new(root: ConcreteType, config: DispatchConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Self::assemble(root, config))
    }

    /// Create an engine with the default configuration.
    pub fn with_defaults(root: ConcreteType) -> Arc<Self> {
        Self::assemble(root, DispatchConfig::default())
    }

    fn assemble(root: ConcreteType, config: DispatchConfig) -> Arc<Self> {
        let oracle = Arc::new(ClassHierarchyOracle::new());
        oracle.register_class(&root);
        let coordinator = RedefinitionCoordinator::new(oracle.clone(), root.clone(), &config);
        Arc::new(Self {
            config,
            root,
            oracle,
            coordinator,
            counters: DispatchCounters::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The root type arrays dispatch through.
    #[inline]
    pub fn root_type(&self) -> &ConcreteType {
        &self.root
    }

    #[inline]
    pub fn oracle(&self) -> &Arc<ClassHierarchyOracle> {
        &self.oracle
    }

    #[inline]
    pub fn coordinator(&self) -> &RedefinitionCoordinator {
        &self.coordinator
    }

    #[inline]
    pub(crate) fn counters(&self) -> &DispatchCounters {
        &self.counters
    }

    /// Engine-wide counters.
    pub fn stats(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            redefinition_slow_paths: self.coordinator.slow_path_count(),
            ..self.counters.snapshot()
        }
    }

    // =========================================================================
    // Class Loading
    // =========================================================================

    /// A class was loaded.
    pub fn load_class(&self, ty: &ConcreteType) -> bool {
        self.oracle.register_class(ty)
    }

    /// A class was unloaded.
    pub fn unload_class(&self, class: ClassId) -> bool {
        if !self.oracle.unregister_class(class) {
            return false;
        }
        self.coordinator.forget_class(class);
        true
    }

    /// A class was redefined as a whole.
    pub fn class_redefined(&self, class: ClassId) {
        self.oracle.on_class_redefined(class);
    }

    // =========================================================================
    // Redefinition
    // =========================================================================

    /// Replace the body of `method`.
    pub fn redefine_method(&self, method: &Method, body: Option<MethodBody>) -> Arc<MethodVersion> {
        self.coordinator.redefine_method(method, body)
    }

    /// Withdraw `method`.
    pub fn remove_method(&self, method: &Method) -> bool {
        self.coordinator.remove_method(method)
    }

    // =========================================================================
    // Call Sites
    // =========================================================================

    /// Create a call site for `seed`.
    pub fn link_call_site(self: &Arc<Self>, seed: ResolutionSeed) -> InvokeVirtualNode {
        InvokeVirtualNode::new(self.clone(), seed)
    }

    /// Uncached resolution of `seed` on `receiver`.
    pub fn method_lookup(
        &self,
        seed: &ResolutionSeed,
        receiver: &ConcreteType,
    ) -> Result<Arc<MethodVersion>, DispatchError> {
        generic_method_lookup(&self.coordinator, &self.root, seed, receiver)
    }
}
