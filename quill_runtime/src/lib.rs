//! Object model for the Quill virtual dispatch engine.
//!
//! This crate provides:
//! - Revocable assumption tokens (`Assumption`, `ClassHierarchyAssumption`)
//! - Loaded classes with virtual method tables (`ConcreteType`, `ClassBuilder`)
//! - Methods and epoch-stamped method versions (`Method`, `MethodVersion`)
//! - Guest values and guest exceptions

#![deny(unsafe_op_in_unsafe_fn)]

pub mod assumption;
pub mod exception;
pub mod object;
pub mod value;

// Re-export commonly used items
pub use assumption::{Assumption, ClassHierarchyAssumption, HierarchyFact};
pub use exception::{ExceptionKind, GuestException};
pub use object::class::{Class, ClassBuilder, ClassFlags, ClassId, ConcreteType, LinkError};
pub use object::method::{
    CallTarget, Method, MethodBody, MethodFlags, MethodId, MethodVersion, Signature,
};
pub use value::{Object, Value};
