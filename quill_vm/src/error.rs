//! Dispatch errors.
//!
//! `NullReceiver` and `AbstractMethod` are guest-visible and map onto guest
//! exceptions. Exceptions thrown by an invoked body pass through untouched
//! as `Guest`. `InvalidReceiver` and `Internal` indicate a broken invariant
//! in a collaborator and are never shown to guest code.

use std::sync::Arc;

use quill_runtime::{ExceptionKind, GuestException};
use thiserror::Error;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Failure of a single virtual dispatch.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// The receiver was null.
    #[error("NullReceiverError: cannot invoke {method} on a null receiver")]
    NullReceiver { method: Arc<str> },

    /// The resolved vtable slot has no executable body.
    #[error("AbstractMethodError: {method} has no implementation in {class}")]
    AbstractMethod { class: Arc<str>, method: Arc<str> },

    /// Exception thrown by the invoked method.
    #[error(transparent)]
    Guest(#[from] GuestException),

    /// The receiver is not an object reference.
    #[error("invalid receiver for {method}: expected an object reference, found {found}")]
    InvalidReceiver { method: Arc<str>, found: &'static str },

    /// The redefinition slow path could not produce a target.
    #[error("internal consistency error: {0}")]
    Internal(#[from] RedefinitionError),
}

impl DispatchError {
    /// Whether the error surfaces to guest code as an exception.
    pub fn is_guest_visible(&self) -> bool {
        matches!(
            self,
            DispatchError::NullReceiver { .. }
                | DispatchError::AbstractMethod { .. }
                | DispatchError::Guest(_)
        )
    }

    /// The guest exception this error is raised as.
    pub fn to_guest_exception(&self) -> Option<GuestException> {
        match self {
            DispatchError::NullReceiver { method } => Some(GuestException::new(
                ExceptionKind::NullPointer,
                format!("cannot invoke {method} on null"),
            )),
            DispatchError::AbstractMethod { class, method } => Some(GuestException::new(
                ExceptionKind::AbstractMethod,
                format!("{class}: {method}"),
            )),
            DispatchError::Guest(exc) => Some(exc.clone()),
            DispatchError::InvalidReceiver { .. } | DispatchError::Internal(_) => None,
        }
    }
}

// =============================================================================
// Redefinition Errors
// =============================================================================

/// Failure of the removed-method slow path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedefinitionError {
    /// No live method with the signature is reachable from the receiver.
    #[error("no live method {signature} reachable from {class}")]
    NoSuchMethod { class: String, signature: String },

    /// Every resolved version was invalidated before it could be used.
    #[error("{method} kept changing during resolution ({attempts} attempts)")]
    Unstable { method: String, attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_visibility() {
        let null = DispatchError::NullReceiver {
            method: Arc::from("A.f()I"),
        };
        assert!(null.is_guest_visible());
        assert_eq!(
            null.to_guest_exception().unwrap().kind(),
            &ExceptionKind::NullPointer
        );

        let internal = DispatchError::from(RedefinitionError::NoSuchMethod {
            class: "A".into(),
            signature: "f()I".into(),
        });
        assert!(!internal.is_guest_visible());
        assert!(internal.to_guest_exception().is_none());
    }

    #[test]
    fn test_guest_exception_is_transparent() {
        let exc = GuestException::thrown("IllegalStateException", "boom");
        let err = DispatchError::from(exc.clone());
        assert_eq!(err.to_string(), exc.to_string());
        assert_eq!(err.to_guest_exception(), Some(exc));
    }

    #[test]
    fn test_abstract_method_message() {
        let err = DispatchError::AbstractMethod {
            class: Arc::from("Square"),
            method: Arc::from("Shape.area()I"),
        };
        assert_eq!(
            err.to_string(),
            "AbstractMethodError: Shape.area()I has no implementation in Square"
        );
        assert_eq!(
            err.to_guest_exception().unwrap().kind(),
            &ExceptionKind::AbstractMethod
        );
    }
}
