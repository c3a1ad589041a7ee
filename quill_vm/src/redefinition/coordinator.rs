//! Redefinition coordinator.
//!
//! Owns the global redefinition epoch, applies redefinitions and removals
//! to methods, and resolves call sites whose seed or target method has been
//! removed.
//!
//! # Removed-Method Resolution
//!
//! A removed method no longer sits at a meaningful vtable slot, so the
//! coordinator re-resolves by signature: it walks from the receiver type
//! (the root type for arrays) up the superclass chain and takes the first
//! declared, non-removed method with the seed's signature. The result is a
//! plain method version that flows back into the cache like any other
//! resolution, so a removal never makes a call site speculate and fail in
//! a loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use quill_runtime::{ClassId, ConcreteType, Method, MethodBody, MethodId, MethodVersion, Signature};
use tracing::{debug, info, warn};

use crate::config::DispatchConfig;
use crate::error::RedefinitionError;
use crate::hierarchy::ClassHierarchyOracle;
use crate::ops::invoke_virtual::ResolutionSeed;

/// Applies redefinitions and serves the removed-method slow path.
#[derive(Debug)]
pub struct RedefinitionCoordinator {
    oracle: Arc<ClassHierarchyOracle>,
    root: ConcreteType,
    epoch: AtomicU64,
    /// Held across epoch allocation and the version swap.
    writer: Mutex<()>,
    max_attempts: u32,
    /// Resolutions per (seed method, receiver class), reused while valid.
    resolved: DashMap<(MethodId, ClassId), Arc<MethodVersion>>,
    slow_paths: AtomicU64,
}

impl RedefinitionCoordinator {
    /// Create a coordinator at epoch 0.
    pub fn new(oracle: Arc<ClassHierarchyOracle>, root: ConcreteType, config: &DispatchConfig) -> Self {
        Self {
            oracle,
            root,
            epoch: AtomicU64::new(0),
            writer: Mutex::new(()),
            max_attempts: config.max_redefinition_attempts.max(1),
            resolved: DashMap::new(),
            slow_paths: AtomicU64::new(0),
        }
    }

    /// The most recently issued epoch.
    #[inline]
    pub fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of removed-method resolutions served.
    pub fn slow_path_count(&self) -> u64 {
        self.slow_paths.load(Ordering::Relaxed)
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Install `body` as the new version of `method`.
    ///
    /// The new version is published before the old token is invalidated.
    /// Redefinitions and removals are serialized, so a method's current
    /// version always carries the latest epoch applied to it.
    pub fn redefine_method(&self, method: &Method, body: Option<MethodBody>) -> Arc<MethodVersion> {
        let version = {
            let _writer = self.writer.lock();
            let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            method.redefine(epoch, body)
        };
        let epoch = version.epoch();
        self.oracle.on_method_redefined(method.id());
        info!(
            target: "quill::redefinition",
            method = method.qualified_name(),
            epoch,
            executable = version.is_executable(),
            "method redefined"
        );
        version
    }

    /// Withdraw `method`.
    ///
    /// Returns `false` if it was already removed.
    pub fn remove_method(&self, method: &Method) -> bool {
        let epoch = {
            let _writer = self.writer.lock();
            if !method.mark_removed() {
                return false;
            }
            self.epoch.fetch_add(1, Ordering::AcqRel) + 1
        };
        self.oracle.on_method_redefined(method.id());
        info!(
            target: "quill::redefinition",
            method = method.qualified_name(),
            epoch,
            "method removed"
        );
        true
    }

    // =========================================================================
    // Slow Path
    // =========================================================================

    /// Resolve the seed's signature on `receiver` after a removal.
    #[cold]
    #[inline(never)]
    pub fn handle_removed_method(
        &self,
        seed: &ResolutionSeed,
        receiver: &ConcreteType,
    ) -> Result<Arc<MethodVersion>, RedefinitionError> {
        self.slow_paths.fetch_add(1, Ordering::Relaxed);

        let key = (seed.method().id(), receiver.id());
        let memo = self.resolved.get(&key).map(|entry| entry.value().clone());
        match memo {
            Some(version) if version.is_valid() => return Ok(version),
            Some(_) => {
                self.resolved.remove_if(&key, |_, version| !version.is_valid());
            }
            None => {}
        }

        let start = if receiver.is_array() { &self.root } else { receiver };
        for attempt in 1..=self.max_attempts {
            let method = Self::resolve_live(start, seed.signature()).ok_or_else(|| {
                RedefinitionError::NoSuchMethod {
                    class: receiver.name().to_string(),
                    signature: seed.signature().to_string(),
                }
            })?;

            let version = method.method_version();
            if version.is_valid() {
                debug!(
                    target: "quill::redefinition",
                    seed = seed.qualified_name(),
                    receiver = %receiver,
                    resolved = version.qualified_name(),
                    epoch = version.epoch(),
                    "removed method re-resolved"
                );
                self.resolved.insert(key, version.clone());
                return Ok(version);
            }
            debug!(
                target: "quill::redefinition",
                method = method.qualified_name(),
                attempt,
                "resolution raced with redefinition"
            );
        }

        warn!(
            target: "quill::redefinition",
            seed = seed.qualified_name(),
            receiver = %receiver,
            attempts = self.max_attempts,
            "redefinition attempt limit reached"
        );
        Err(RedefinitionError::Unstable {
            method: seed.qualified_name().to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Drop memoized resolutions for receivers of an unloaded class.
    pub fn forget_class(&self, class: ClassId) {
        self.resolved.retain(|(_, receiver), _| *receiver != class);
    }

    /// Number of memoized resolutions.
    pub fn memoized_count(&self) -> usize {
        self.resolved.len()
    }

    fn resolve_live<'a>(start: &'a ConcreteType, signature: &Signature) -> Option<&'a Arc<Method>> {
        start
            .ancestors()
            .find_map(|ty| ty.find_declared(signature).filter(|m| !m.is_removed()))
    }
}
