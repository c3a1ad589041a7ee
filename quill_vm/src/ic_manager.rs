//! Call-site registry.
//!
//! Maps each INVOKEVIRTUAL instruction to its node, linking it lazily on
//! first execution, and summarizes the shapes of all sites for downstream
//! compilers.

use std::sync::Arc;

use dashmap::DashMap;
use quill_runtime::{LinkError, Value};

use crate::engine::DispatchEngine;
use crate::error::DispatchError;
use crate::inline_cache::CallSiteClassification;
use crate::ops::invoke_virtual::{InvokeVirtualNode, ResolutionSeed};

// =============================================================================
// Call Site Identifier
// =============================================================================

/// Identity of a call instruction within loaded code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId {
    /// The code object containing the instruction.
    pub code_id: u64,
    /// Bytecode offset of the instruction.
    pub bc_offset: u32,
}

impl CallSiteId {
    #[inline]
    pub const fn new(code_id: u64, bc_offset: u32) -> Self {
        Self { code_id, bc_offset }
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Number of sites in each classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallSiteBreakdown {
    pub uninitialized: usize,
    pub monomorphic: usize,
    pub polymorphic: usize,
    pub megamorphic: usize,
}

impl CallSiteBreakdown {
    /// Total sites counted.
    pub fn total(&self) -> usize {
        self.uninitialized + self.monomorphic + self.polymorphic + self.megamorphic
    }
}

/// Lazily linked call sites of one engine.
pub struct CallSiteRegistry {
    engine: Arc<DispatchEngine>,
    sites: DashMap<CallSiteId, Arc<InvokeVirtualNode>>,
}

impl CallSiteRegistry {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self {
            engine,
            sites: DashMap::new(),
        }
    }

    /// The node for `id`, linking it with `link` on first use.
    ///
    /// A link failure leaves the site unlinked.
    pub fn get_or_link<F>(&self, id: CallSiteId, link: F) -> Result<Arc<InvokeVirtualNode>, LinkError>
    where
        F: FnOnce() -> Result<ResolutionSeed, LinkError>,
    {
        if let Some(node) = self.sites.get(&id) {
            return Ok(node.clone());
        }
        let seed = link()?;
        let node = self
            .sites
            .entry(id)
            .or_insert_with(|| Arc::new(self.engine.link_call_site(seed)))
            .clone();
        Ok(node)
    }

    /// The node for `id`, if linked.
    pub fn get(&self, id: CallSiteId) -> Option<Arc<InvokeVirtualNode>> {
        self.sites.get(&id).map(|node| node.clone())
    }

    /// Dispatch through an already linked site.
    ///
    /// Returns `None` if the site was never linked.
    pub fn dispatch(&self, id: CallSiteId, args: &[Value]) -> Option<Result<Value, DispatchError>> {
        let node = self.get(id)?;
        Some(node.dispatch(args))
    }

    /// Number of linked sites.
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Classification counts across all linked sites.
    pub fn breakdown(&self) -> CallSiteBreakdown {
        let mut breakdown = CallSiteBreakdown::default();
        for site in self.sites.iter() {
            match site.classification() {
                CallSiteClassification::Uninitialized => breakdown.uninitialized += 1,
                CallSiteClassification::Monomorphic => breakdown.monomorphic += 1,
                CallSiteClassification::Polymorphic => breakdown.polymorphic += 1,
                CallSiteClassification::Megamorphic => breakdown.megamorphic += 1,
            }
        }
        breakdown
    }
}

impl std::fmt::Debug for CallSiteRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSiteRegistry")
            .field("sites", &self.sites.len())
            .finish()
    }
}
