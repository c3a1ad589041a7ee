//! Guest-visible exceptions.
//!
//! Method bodies report failures as [`GuestException`]. The dispatch engine
//! never inspects or wraps exceptions thrown by a body; it only creates the
//! two kinds it is responsible for (null receiver, abstract method).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Classification of a guest exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionKind {
    /// A virtual call was made on a null receiver.
    NullPointer,
    /// A vtable slot resolved to a method without a body.
    AbstractMethod,
    /// An exception thrown by guest code, named by its class.
    Thrown(Arc<str>),
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::NullPointer => f.write_str("NullPointerException"),
            ExceptionKind::AbstractMethod => f.write_str("AbstractMethodError"),
            ExceptionKind::Thrown(class) => f.write_str(class),
        }
    }
}

/// An exception raised inside the guest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GuestException {
    kind: ExceptionKind,
    message: Arc<str>,
}

impl GuestException {
    /// Create an exception of the given kind.
    pub fn new(kind: ExceptionKind, message: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a guest exception thrown by user code.
    pub fn thrown(class: impl Into<Arc<str>>, message: impl Into<Arc<str>>) -> Self {
        Self::new(ExceptionKind::Thrown(class.into()), message)
    }

    /// Exception kind.
    #[inline]
    pub fn kind(&self) -> &ExceptionKind {
        &self.kind
    }

    /// Exception message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_uses_kind_and_message() {
        let exc = GuestException::new(ExceptionKind::AbstractMethod, "Shape.area()D");
        assert_eq!(exc.to_string(), "AbstractMethodError: Shape.area()D");
    }

    #[test]
    fn test_thrown_keeps_class_name() {
        let exc = GuestException::thrown("IllegalStateException", "boom");
        assert_eq!(
            exc.kind(),
            &ExceptionKind::Thrown(Arc::from("IllegalStateException"))
        );
        assert_eq!(exc.message(), "boom");
    }
}
