//! Methods and method versions.
//!
//! A [`Method`] is the stable identity of a declared method: its signature,
//! declaring class and vtable slot. Its executable body lives in a
//! [`MethodVersion`], an immutable snapshot stamped with the redefinition
//! epoch that produced it.
//!
//! # Redefinition
//!
//! ```text
//!  Method ──current──▶ MethodVersion(epoch 0) ─ token: valid
//!           redefine
//!  Method ──current──▶ MethodVersion(epoch 1) ─ token: valid
//!                      MethodVersion(epoch 0) ─ token: INVALID
//! ```
//!
//! The new version is published before the old token flips, so a reader
//! that observes an invalid token always finds the replacement.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use arc_swap::ArcSwap;

use crate::assumption::Assumption;
use crate::exception::{ExceptionKind, GuestException};
use crate::object::class::ClassId;
use crate::value::Value;

// =============================================================================
// Method Identity
// =============================================================================

/// Global counter for method identities.
static NEXT_METHOD_ID: AtomicU32 = AtomicU32::new(1);

/// Process-unique method identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

impl MethodId {
    fn allocate() -> Self {
        Self(NEXT_METHOD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// Method name plus descriptor, e.g. `area()D`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    name: Arc<str>,
    descriptor: Arc<str>,
}

impl Signature {
    /// Create a signature.
    pub fn new(name: impl Into<Arc<str>>, descriptor: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Method name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Method descriptor.
    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.descriptor)
    }
}

bitflags::bitflags! {
    /// Declaration flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MethodFlags: u8 {
        /// Declared without a body.
        const ABSTRACT = 1 << 0;
        /// Cannot be overridden.
        const FINAL = 1 << 1;
    }
}

// =============================================================================
// Call Targets
// =============================================================================

/// Executable body of a method version.
pub trait CallTarget: Send + Sync {
    /// Invoke the body. `args[0]` is the receiver.
    fn call(&self, args: &[Value]) -> Result<Value, GuestException>;
}

impl<F> CallTarget for F
where
    F: Fn(&[Value]) -> Result<Value, GuestException> + Send + Sync,
{
    #[inline]
    fn call(&self, args: &[Value]) -> Result<Value, GuestException> {
        self(args)
    }
}

/// Shared handle to a call target.
pub type MethodBody = Arc<dyn CallTarget>;

// =============================================================================
// Method Version
// =============================================================================

/// Immutable snapshot of a method body at one redefinition epoch.
pub struct MethodVersion {
    method: MethodId,
    qualified_name: Arc<str>,
    epoch: u64,
    body: Option<MethodBody>,
    /// Valid until this version is redefined away or removed.
    redefined: Arc<Assumption>,
}

impl MethodVersion {
    fn new(method: MethodId, qualified_name: Arc<str>, epoch: u64, body: Option<MethodBody>) -> Self {
        let redefined = Assumption::new(format!("{qualified_name}@{epoch} not redefined"));
        Self {
            method,
            qualified_name,
            epoch,
            body,
            redefined,
        }
    }

    /// Identity of the method this version belongs to.
    #[inline]
    pub fn method_id(&self) -> MethodId {
        self.method
    }

    /// `Class.name(descriptor)` of the owning method.
    #[inline]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Redefinition epoch that produced this version.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether this version has a body.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.body.is_some()
    }

    /// Whether this version is still current.
    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.redefined.is_valid()
    }

    /// Token invalidated when this version is redefined away.
    #[inline]
    pub fn redefine_assumption(&self) -> &Arc<Assumption> {
        &self.redefined
    }

    /// The executable body, if any.
    #[inline]
    pub fn call_target(&self) -> Option<&MethodBody> {
        self.body.as_ref()
    }

    /// Invoke this version's body.
    ///
    /// A codeless version raises `AbstractMethodError`.
    #[inline]
    pub fn invoke(&self, args: &[Value]) -> Result<Value, GuestException> {
        match &self.body {
            Some(body) => body.call(args),
            None => Err(GuestException::new(
                ExceptionKind::AbstractMethod,
                self.qualified_name.clone(),
            )),
        }
    }
}

impl fmt::Debug for MethodVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodVersion")
            .field("method", &self.qualified_name)
            .field("epoch", &self.epoch)
            .field("executable", &self.is_executable())
            .field("valid", &self.is_valid())
            .finish()
    }
}

// =============================================================================
// Method
// =============================================================================

/// A declared method.
pub struct Method {
    id: MethodId,
    signature: Signature,
    declaring_class: ClassId,
    qualified_name: Arc<str>,
    vtable_index: u32,
    flags: MethodFlags,
    current: ArcSwap<MethodVersion>,
    removed: AtomicBool,
}

impl Method {
    pub(crate) fn new(
        signature: Signature,
        declaring_class: ClassId,
        declaring_name: &str,
        vtable_index: u32,
        flags: MethodFlags,
        body: Option<MethodBody>,
    ) -> Self {
        let id = MethodId::allocate();
        let qualified_name: Arc<str> = Arc::from(format!("{declaring_name}.{signature}"));
        let body = if flags.contains(MethodFlags::ABSTRACT) {
            None
        } else {
            body
        };
        let version = MethodVersion::new(id, qualified_name.clone(), 0, body);
        Self {
            id,
            signature,
            declaring_class,
            qualified_name,
            vtable_index,
            flags,
            current: ArcSwap::from_pointee(version),
            removed: AtomicBool::new(false),
        }
    }

    /// Method identity.
    #[inline]
    pub fn id(&self) -> MethodId {
        self.id
    }

    /// Method signature.
    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Class that declares this method.
    #[inline]
    pub fn declaring_class(&self) -> ClassId {
        self.declaring_class
    }

    /// `Class.name(descriptor)`.
    #[inline]
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// Vtable slot this method occupies.
    #[inline]
    pub fn vtable_index(&self) -> u32 {
        self.vtable_index
    }

    /// Declaration flags.
    #[inline]
    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    /// Whether the method was declared abstract.
    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    /// Whether the method was withdrawn by hot redefinition.
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// The current version.
    #[inline]
    pub fn method_version(&self) -> Arc<MethodVersion> {
        self.current.load_full()
    }

    /// Publish a new body at `epoch` and retire the previous version.
    ///
    /// Callers serialize redefinitions of one method; epochs must increase.
    /// A version published on a removed method is born retired.
    ///
    /// Returns the new version.
    pub fn redefine(&self, epoch: u64, body: Option<MethodBody>) -> Arc<MethodVersion> {
        let next = Arc::new(MethodVersion::new(
            self.id,
            self.qualified_name.clone(),
            epoch,
            body,
        ));
        let previous = self.current.swap(next.clone());
        debug_assert!(previous.epoch <= epoch, "redefinition epochs went backwards");
        previous.redefined.invalidate();
        if self.is_removed() {
            next.redefined.invalidate();
        }
        next
    }

    /// Withdraw this method.
    ///
    /// Returns `false` if it was already removed.
    pub fn mark_removed(&self) -> bool {
        if self.removed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.current.load().redefined.invalidate();
        true
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("id", &self.id)
            .field("name", &self.qualified_name)
            .field("vtable_index", &self.vtable_index)
            .field("flags", &self.flags)
            .field("removed", &self.is_removed())
            .finish()
    }
}
