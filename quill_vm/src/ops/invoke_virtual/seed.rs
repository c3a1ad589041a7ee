//! Resolution seeds.

use std::fmt;
use std::sync::Arc;

use quill_runtime::{ConcreteType, LinkError, Method, Signature};

/// Immutable descriptor of a linked INVOKEVIRTUAL site.
///
/// Holds the declaring type, the vtable slot, and the method found in that
/// slot when the site was linked (the seed method).
#[derive(Clone)]
pub struct ResolutionSeed {
    declaring_type: ConcreteType,
    vtable_index: u32,
    method: Arc<Method>,
}

impl ResolutionSeed {
    /// Link against slot `vtable_index` of `declaring_type`.
    pub fn link(declaring_type: &ConcreteType, vtable_index: u32) -> Result<Self, LinkError> {
        let method = declaring_type
            .vtable_method(vtable_index)
            .ok_or_else(|| LinkError::SlotOutOfRange {
                class: declaring_type.name().to_string(),
                slot: vtable_index,
                len: declaring_type.vtable_len(),
            })?;
        Ok(Self {
            declaring_type: declaring_type.clone(),
            vtable_index,
            method: method.clone(),
        })
    }

    /// Link against the slot holding `signature` in `declaring_type`.
    pub fn for_signature(
        declaring_type: &ConcreteType,
        signature: &Signature,
    ) -> Result<Self, LinkError> {
        let slot = declaring_type
            .vtable_slot_of(signature)
            .ok_or_else(|| LinkError::UnknownMethod {
                class: declaring_type.name().to_string(),
                signature: signature.to_string(),
            })?;
        Self::link(declaring_type, slot)
    }

    /// Type named by the call instruction.
    #[inline]
    pub fn declaring_type(&self) -> &ConcreteType {
        &self.declaring_type
    }

    /// Vtable slot dispatched on.
    #[inline]
    pub fn vtable_index(&self) -> u32 {
        self.vtable_index
    }

    /// Method in the slot at link time.
    #[inline]
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// Target signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        self.method.signature()
    }

    /// `Class.name(descriptor)` of the seed method.
    #[inline]
    pub fn qualified_name(&self) -> &str {
        self.method.qualified_name()
    }
}

impl fmt::Debug for ResolutionSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionSeed")
            .field("declaring_type", &self.declaring_type)
            .field("vtable_index", &self.vtable_index)
            .field("method", &self.method.qualified_name())
            .finish()
    }
}
