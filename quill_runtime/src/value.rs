//! Guest values.
//!
//! The interpreter passes arguments as a slice of [`Value`]; the first one is
//! the receiver of a virtual call. Object layout is out of scope here, so an
//! instance is just its class plus a field vector.

use std::fmt;
use std::sync::Arc;

use crate::object::class::ConcreteType;

/// A heap instance.
pub struct Object {
    class: ConcreteType,
    fields: Box<[Value]>,
}

impl Object {
    /// Concrete type of this instance.
    #[inline]
    pub fn concrete_type(&self) -> &ConcreteType {
        &self.class
    }

    /// Instance fields (array elements for array instances).
    #[inline]
    pub fn fields(&self) -> &[Value] {
        &self.fields
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("class", &self.class)
            .field("fields", &self.fields.len())
            .finish()
    }
}

/// A guest value.
#[derive(Clone, Default)]
pub enum Value {
    /// The null reference.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    /// Reference to a heap instance.
    Object(Arc<Object>),
}

impl Value {
    /// Allocate an instance of `class` with no fields.
    pub fn new_object(class: &ConcreteType) -> Self {
        Self::with_fields(class, Vec::new())
    }

    /// Allocate an instance of `class` holding `fields`.
    pub fn with_fields(class: &ConcreteType, fields: Vec<Value>) -> Self {
        Value::Object(Arc::new(Object {
            class: class.clone(),
            fields: fields.into_boxed_slice(),
        }))
    }

    /// Whether this is the null reference.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Concrete type of a referenced instance.
    #[inline]
    pub fn concrete_type(&self) -> Option<&ConcreteType> {
        match self {
            Value::Object(obj) => Some(obj.concrete_type()),
            _ => None,
        }
    }

    /// The referenced instance.
    #[inline]
    pub fn as_object(&self) -> Option<&Arc<Object>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Integer payload.
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Short name of the value's kind, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::Object(_) => "object",
        }
    }
}

impl PartialEq for Value {
    /// Primitives compare by value, references by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(obj) => write!(f, "<{:?}>", obj.concrete_type()),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }
}
