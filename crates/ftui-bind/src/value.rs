#![forbid(unsafe_code)]

//! Dynamic property values and declared property types.
//!
//! A binding moves values between containers whose shape is only known at
//! runtime, so property values are a closed enum. Objects are shared
//! [`Container`] handles; everything else is a primitive.
//!
//! # Invariants
//!
//! 1. Primitive values compare structurally; objects compare by identity.
//! 2. [`ValueType::default_value`] is the value a destination falls back to
//!    when conversion fails or the source chain is broken.
//! 3. [`ValueType::accepts`] is runtime assignability: it inspects the value,
//!    never a declared source type.

use std::fmt;
use std::sync::Arc;

use crate::container::{Container, ObjectRef};

/// A dynamically typed property value.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// A nested container; the only kind a chain can traverse through.
    Object(ObjectRef),
}

/// Runtime kind of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Str,
    Object,
}

impl Value {
    /// Runtime kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Str(_) => ValueKind::Str,
            Self::Object(_) => ValueKind::Object,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value takes part in primitive conversion.
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Self::Bool(_) | Self::Int(_) | Self::Float(_) | Self::Str(_)
        )
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// The contained object, if this value is one.
    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Consume the value, keeping it only if it is an object.
    #[must_use]
    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Int(i) => f.debug_tuple("Int").field(i).finish(),
            Self::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Self::Str(s) => f.debug_tuple("Str").field(&&**s).finish(),
            Self::Object(obj) => write!(f, "Object({}@{:p})", obj.type_name(), Arc::as_ptr(obj)),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<&Value> for Value {
    fn from(value: &Value) -> Self {
        value.clone()
    }
}

impl From<ObjectRef> for Value {
    fn from(value: ObjectRef) -> Self {
        Self::Object(value)
    }
}

impl From<&ObjectRef> for Value {
    fn from(value: &ObjectRef) -> Self {
        Self::Object(Arc::clone(value))
    }
}

impl<C: Container> From<Arc<C>> for Value {
    fn from(value: Arc<C>) -> Self {
        Self::Object(value)
    }
}

impl<C: Container> From<&Arc<C>> for Value {
    fn from(value: &Arc<C>) -> Self {
        Self::Object(Arc::clone(value) as ObjectRef)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Object => "object",
        })
    }
}

/// Declared type of a property.
///
/// Containers report the declared type of each property through
/// [`Container::property_type`]; the binding converts pushed values against
/// it and uses its [`default_value`](Self::default_value) as the fallback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ValueType {
    /// Accepts every value unchanged.
    #[default]
    Any,
    Bool,
    Int,
    Float,
    Str,
    Object,
    /// Nullable wrapper around a primitive type.
    Optional(Box<ValueType>),
}

impl ValueType {
    /// Shorthand for `ValueType::Optional(Box::new(inner))`.
    #[must_use]
    pub fn optional(inner: ValueType) -> Self {
        Self::Optional(Box::new(inner))
    }

    /// Whether `value` can be assigned to this type without conversion.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Any, _) => true,
            (Self::Optional(_), Value::Null) => true,
            (Self::Optional(inner), v) => inner.accepts(v),
            (Self::Str | Self::Object, Value::Null) => true,
            (Self::Bool, Value::Bool(_))
            | (Self::Int, Value::Int(_))
            | (Self::Float, Value::Float(_))
            | (Self::Str, Value::Str(_))
            | (Self::Object, Value::Object(_)) => true,
            _ => false,
        }
    }

    /// Whether this is a primitive target for [`change_type`](crate::convert::change_type).
    #[must_use]
    pub fn is_primitive(&self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float | Self::Str)
    }

    /// The type's default/zero value.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Bool => Value::Bool(false),
            Self::Int => Value::Int(0),
            Self::Float => Value::Float(0.0),
            Self::Any | Self::Str | Self::Object | Self::Optional(_) => Value::Null,
        }
    }

    /// Declared type inferred from an initial value. `Null` infers `Any`.
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value.kind() {
            ValueKind::Null => Self::Any,
            ValueKind::Bool => Self::Bool,
            ValueKind::Int => Self::Int,
            ValueKind::Float => Self::Float,
            ValueKind::Str => Self::Str,
            ValueKind::Object => Self::Object,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Float => f.write_str("float"),
            Self::Str => f.write_str("str"),
            Self::Object => f.write_str("object"),
            Self::Optional(inner) => write!(f, "{inner}?"),
        }
    }
}
