//! Loaded classes and their virtual method tables.
//!
//! A [`Class`] is immutable once built. Its identity is a [`ClassId`]
//! allocated from a global counter; [`ConcreteType`] is the shared handle the
//! dispatch engine compares and looks up vtable slots on.
//!
//! # Vtable Layout
//!
//! ```text
//! Object   [0: hashCode, 1: toString]
//!    │
//! Shape    [0: hashCode, 1: toString, 2: area (abstract)]
//!    │
//! Circle   [0: hashCode, 1: toString, 2: area (Circle)]
//! ```
//!
//! A subclass starts from its superclass vtable; a declaration with a
//! matching signature replaces the inherited slot, anything else is
//! appended. Array classes carry no vtable of their own.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use smallvec::SmallVec;
use thiserror::Error;

use crate::object::method::{Method, MethodBody, MethodFlags, MethodVersion, Signature};

// =============================================================================
// Class Identity
// =============================================================================

/// Global counter for class identities.
static NEXT_CLASS_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique class identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub(crate) fn allocate() -> Self {
        Self(NEXT_CLASS_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

bitflags::bitflags! {
    /// Flags describing a loaded class.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClassFlags: u8 {
        /// Cannot be instantiated.
        const ABSTRACT = 1 << 0;
        /// Cannot be subclassed.
        const FINAL = 1 << 1;
        /// Array class; dispatches through the root type.
        const ARRAY = 1 << 2;
    }
}

// =============================================================================
// Link Errors
// =============================================================================

/// Errors raised while building a class or linking against one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The same signature was declared twice in one class.
    #[error("class {class} declares {signature} more than once")]
    DuplicateMethod { class: String, signature: String },

    /// A declaration overrides a final method.
    #[error("class {class} overrides final method {method}")]
    OverridesFinal { class: String, method: String },

    /// The superclass cannot be extended.
    #[error("class {class} cannot extend {superclass}")]
    IllegalSuperclass { class: String, superclass: String },

    /// A vtable slot does not exist on the declaring type.
    #[error("vtable slot {slot} out of range for {class} ({len} slots)")]
    SlotOutOfRange { class: String, slot: u32, len: usize },

    /// No vtable slot carries the requested signature.
    #[error("class {class} has no virtual method {signature}")]
    UnknownMethod { class: String, signature: String },
}

// =============================================================================
// Class
// =============================================================================

/// A loaded class.
pub struct Class {
    id: ClassId,
    name: Arc<str>,
    flags: ClassFlags,
    superclass: Option<ConcreteType>,
    component: Option<ConcreteType>,
    declared: SmallVec<[Arc<Method>; 4]>,
    vtable: Box<[Arc<Method>]>,
}

impl Class {
    /// Class identity.
    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Class name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class flags.
    #[inline]
    pub fn flags(&self) -> ClassFlags {
        self.flags
    }

    /// Whether this is an array class.
    #[inline]
    pub fn is_array(&self) -> bool {
        self.flags.contains(ClassFlags::ARRAY)
    }

    /// Whether this class is abstract.
    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT)
    }

    /// Whether instances of this class can exist and carry a full vtable.
    #[inline]
    pub fn is_concrete(&self) -> bool {
        !self.flags.intersects(ClassFlags::ABSTRACT | ClassFlags::ARRAY)
    }

    /// Direct superclass, `None` for the root type.
    #[inline]
    pub fn superclass(&self) -> Option<&ConcreteType> {
        self.superclass.as_ref()
    }

    /// Element type of an array class.
    #[inline]
    pub fn component(&self) -> Option<&ConcreteType> {
        self.component.as_ref()
    }

    /// Methods declared directly by this class.
    #[inline]
    pub fn declared_methods(&self) -> &[Arc<Method>] {
        &self.declared
    }

    /// Number of vtable slots.
    #[inline]
    pub fn vtable_len(&self) -> usize {
        self.vtable.len()
    }

    /// The method occupying a vtable slot.
    #[inline]
    pub fn vtable_method(&self, slot: u32) -> Option<&Arc<Method>> {
        self.vtable.get(slot as usize)
    }

    /// Current version of the method occupying a vtable slot.
    #[inline]
    pub fn vtable_lookup(&self, slot: u32) -> Option<Arc<MethodVersion>> {
        self.vtable_method(slot).map(|m| m.method_version())
    }

    /// Find a method declared directly by this class.
    pub fn find_declared(&self, signature: &Signature) -> Option<&Arc<Method>> {
        self.declared.iter().find(|m| m.signature() == signature)
    }

    /// Vtable slot holding a method with `signature`.
    pub fn vtable_slot_of(&self, signature: &Signature) -> Option<u32> {
        self.vtable
            .iter()
            .position(|m| m.signature() == signature)
            .map(|slot| slot as u32)
    }
}

// =============================================================================
// Concrete Type
// =============================================================================

/// Shared handle to a loaded class.
///
/// Equality and hashing use the class identity only.
#[derive(Clone)]
pub struct ConcreteType(Arc<Class>);

impl ConcreteType {
    /// Whether `self` is `other` or one of its subclasses.
    pub fn is_subclass_of(&self, other: &ConcreteType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.superclass();
        }
        false
    }

    /// Iterate from this class up to the root type.
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors { next: Some(self) }
    }
}

impl std::ops::Deref for ConcreteType {
    type Target = Class;

    #[inline]
    fn deref(&self) -> &Class {
        &self.0
    }
}

impl PartialEq for ConcreteType {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for ConcreteType {}

impl Hash for ConcreteType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Debug for ConcreteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.name, self.0.id.raw())
    }
}

impl fmt::Display for ConcreteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

/// Superclass chain iterator, starting with the class itself.
#[derive(Debug)]
pub struct Ancestors<'a> {
    next: Option<&'a ConcreteType>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a ConcreteType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.superclass();
        Some(current)
    }
}

// =============================================================================
// Class Builder
// =============================================================================

struct Declaration {
    signature: Signature,
    flags: MethodFlags,
    body: Option<MethodBody>,
}

/// Builds a class and lays out its vtable.
///
/// # Example
///
/// ```ignore
/// let object = ClassBuilder::new("Object").build()?;
/// let shape = ClassBuilder::new("Shape")
///     .extends(&object)
///     .flags(ClassFlags::ABSTRACT)
///     .abstract_method(Signature::new("area", "()I"))
///     .build()?;
/// ```
pub struct ClassBuilder {
    name: Arc<str>,
    flags: ClassFlags,
    superclass: Option<ConcreteType>,
    declarations: Vec<Declaration>,
}

impl ClassBuilder {
    /// Start building a class.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            flags: ClassFlags::empty(),
            superclass: None,
            declarations: Vec::new(),
        }
    }

    /// Set the superclass.
    pub fn extends(mut self, superclass: &ConcreteType) -> Self {
        self.superclass = Some(superclass.clone());
        self
    }

    /// Add class flags. `ARRAY` is reserved for [`ClassBuilder::array_of`].
    pub fn flags(mut self, flags: ClassFlags) -> Self {
        self.flags |= flags - ClassFlags::ARRAY;
        self
    }

    /// Declare a method with a body.
    pub fn method(self, signature: Signature, body: MethodBody) -> Self {
        self.declare(signature, MethodFlags::empty(), Some(body))
    }

    /// Declare a final method with a body.
    pub fn final_method(self, signature: Signature, body: MethodBody) -> Self {
        self.declare(signature, MethodFlags::FINAL, Some(body))
    }

    /// Declare an abstract method.
    pub fn abstract_method(self, signature: Signature) -> Self {
        self.declare(signature, MethodFlags::ABSTRACT, None)
    }

    fn declare(mut self, signature: Signature, flags: MethodFlags, body: Option<MethodBody>) -> Self {
        self.declarations.push(Declaration {
            signature,
            flags,
            body,
        });
        self
    }

    /// Lay out the vtable and create the class.
    pub fn build(self) -> Result<ConcreteType, LinkError> {
        if let Some(superclass) = &self.superclass {
            if superclass.flags().intersects(ClassFlags::FINAL | ClassFlags::ARRAY) {
                return Err(LinkError::IllegalSuperclass {
                    class: self.name.to_string(),
                    superclass: superclass.name().to_string(),
                });
            }
        }

        let id = ClassId::allocate();
        let mut vtable: Vec<Arc<Method>> = self
            .superclass
            .as_ref()
            .map(|s| s.vtable.to_vec())
            .unwrap_or_default();
        let mut declared: SmallVec<[Arc<Method>; 4]> = SmallVec::new();

        for decl in self.declarations {
            if declared.iter().any(|m| m.signature() == &decl.signature) {
                return Err(LinkError::DuplicateMethod {
                    class: self.name.to_string(),
                    signature: decl.signature.to_string(),
                });
            }

            let inherited = vtable
                .iter()
                .position(|m| m.signature() == &decl.signature);
            let slot = match inherited {
                Some(slot) => {
                    if vtable[slot].flags().contains(MethodFlags::FINAL) {
                        return Err(LinkError::OverridesFinal {
                            class: self.name.to_string(),
                            method: vtable[slot].qualified_name().to_string(),
                        });
                    }
                    slot
                }
                None => vtable.len(),
            };

            let method = Arc::new(Method::new(
                decl.signature,
                id,
                &self.name,
                slot as u32,
                decl.flags,
                decl.body,
            ));
            if slot == vtable.len() {
                vtable.push(method.clone());
            } else {
                vtable[slot] = method.clone();
            }
            declared.push(method);
        }

        Ok(ConcreteType(Arc::new(Class {
            id,
            name: self.name,
            flags: self.flags,
            superclass: self.superclass,
            component: None,
            declared,
            vtable: vtable.into_boxed_slice(),
        })))
    }

    /// Create the array class for `component`.
    ///
    /// Arrays extend the root type but carry an empty vtable: virtual calls
    /// on arrays are resolved against the root type's vtable.
    pub fn array_of(component: &ConcreteType, root: &ConcreteType) -> ConcreteType {
        ConcreteType(Arc::new(Class {
            id: ClassId::allocate(),
            name: Arc::from(format!("[{}", component.name())),
            flags: ClassFlags::ARRAY | ClassFlags::FINAL,
            superclass: Some(root.clone()),
            component: Some(component.clone()),
            declared: SmallVec::new(),
            vtable: Box::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn body(value: i64) -> MethodBody {
        Arc::new(move |_args: &[Value]| Ok(Value::Int(value)))
    }

    fn sig(name: &str) -> Signature {
        Signature::new(name, "()I")
    }

    fn root() -> ConcreteType {
        ClassBuilder::new("Object")
            .method(sig("hashCode"), body(0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_subclass_inherits_and_appends_slots() {
        let object = root();
        let shape = ClassBuilder::new("Shape")
            .extends(&object)
            .flags(ClassFlags::ABSTRACT)
            .abstract_method(sig("area"))
            .build()
            .unwrap();

        assert_eq!(shape.vtable_len(), 2);
        assert!(shape.is_abstract());
        assert!(!shape.is_concrete());
        let area = shape.vtable_method(1).unwrap();
        assert_eq!(area.vtable_index(), 1);
        assert!(area.is_abstract());
        assert!(Arc::ptr_eq(
            shape.vtable_method(0).unwrap(),
            object.vtable_method(0).unwrap()
        ));
    }

    #[test]
    fn test_override_replaces_slot() {
        let object = root();
        let shape = ClassBuilder::new("Shape")
            .extends(&object)
            .abstract_method(sig("area"))
            .build()
            .unwrap();
        let circle = ClassBuilder::new("Circle")
            .extends(&shape)
            .method(sig("area"), body(3))
            .build()
            .unwrap();

        assert_eq!(circle.vtable_len(), 2);
        let version = circle.vtable_lookup(1).unwrap();
        assert!(version.is_executable());
        assert_eq!(version.invoke(&[]).unwrap(), Value::Int(3));
        assert_eq!(circle.find_declared(&sig("area")).unwrap().vtable_index(), 1);
        assert!(circle.is_subclass_of(&shape));
        assert!(circle.is_subclass_of(&object));
        assert!(!shape.is_subclass_of(&circle));
    }

    #[test]
    fn test_ancestors_walk_to_root() {
        let object = root();
        let a = ClassBuilder::new("A").extends(&object).build().unwrap();
        let b = ClassBuilder::new("B").extends(&a).build().unwrap();
        let names: Vec<_> = b.ancestors().map(|t| t.name().to_string()).collect();
        assert_eq!(names, ["B", "A", "Object"]);
    }

    #[test]
    fn test_duplicate_declaration_rejected() {
        let err = ClassBuilder::new("Dup")
            .method(sig("f"), body(1))
            .method(sig("f"), body(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, LinkError::DuplicateMethod { .. }));
    }

    #[test]
    fn test_final_override_rejected() {
        let base = ClassBuilder::new("Base")
            .final_method(sig("f"), body(1))
            .build()
            .unwrap();
        let err = ClassBuilder::new("Derived")
            .extends(&base)
            .method(sig("f"), body(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, LinkError::OverridesFinal { .. }));
    }

    #[test]
    fn test_array_class_has_empty_vtable() {
        let object = root();
        let array = ClassBuilder::array_of(&object, &object);
        assert!(array.is_array());
        assert!(!array.is_concrete());
        assert_eq!(array.vtable_len(), 0);
        assert_eq!(array.name(), "[Object");
        assert_eq!(array.superclass(), Some(&object));
        assert_eq!(array.component(), Some(&object));

        let err = ClassBuilder::new("Sub").extends(&array).build().unwrap_err();
        assert!(matches!(err, LinkError::IllegalSuperclass { .. }));
    }

    #[test]
    fn test_identity_equality() {
        let a = root();
        let b = root();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
