#![forbid(unsafe_code)]

//! Error types for binding construction, value conversion and property writes.
//!
//! Only [`BindError`] ever reaches a caller. [`ConvertError`] and
//! [`WriteError`] are produced while a binding pushes a value and are
//! absorbed by the leaf observer: a failed conversion degrades to the
//! destination type's default value, a failed write is skipped.

use std::fmt;

use crate::value::{ValueKind, ValueType};

/// Errors reported when a binding is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// The expression does not reduce to one or more chained property reads.
    InvalidChainExpression {
        /// The offending expression text.
        expression: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The root object of the expression evaluated to null.
    NullRoot {
        /// The expression whose root was null.
        expression: String,
    },
}

impl BindError {
    pub(crate) fn invalid(expression: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidChainExpression {
            expression: expression.into(),
            reason,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidChainExpression { expression, reason } => {
                write!(f, "invalid chain expression `{expression}`: {reason}")
            }
            Self::NullRoot { expression } => {
                write!(f, "root of chain expression `{expression}` is null")
            }
        }
    }
}

impl std::error::Error for BindError {}

/// A value could not be converted to the destination type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    /// Text did not parse as the target type.
    Format {
        /// The text that failed to parse.
        text: String,
        /// The requested type.
        target: ValueType,
    },
    /// The numeric value does not fit the target type.
    Overflow {
        /// The requested type.
        target: ValueType,
    },
    /// No primitive conversion exists between the two types.
    Unsupported {
        /// Runtime kind of the source value.
        from: ValueKind,
        /// The requested type.
        target: ValueType,
    },
    /// Raised by a user-supplied converter.
    Custom(String),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format { text, target } => write!(f, "cannot parse {text:?} as {target}"),
            Self::Overflow { target } => write!(f, "value out of range for {target}"),
            Self::Unsupported { from, target } => {
                write!(f, "no conversion from {from} to {target}")
            }
            Self::Custom(msg) => write!(f, "converter failed: {msg}"),
        }
    }
}

impl std::error::Error for ConvertError {}

/// A property write was rejected by its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// The container has no property with this name.
    UnknownProperty(String),
    /// The property exists but cannot be written.
    ReadOnly(String),
    /// The value's runtime kind is not assignable to the declared type.
    TypeMismatch {
        /// Property name.
        property: String,
        /// Declared type of the property.
        expected: ValueType,
        /// Runtime kind of the rejected value.
        found: ValueKind,
    },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownProperty(name) => write!(f, "unknown property `{name}`"),
            Self::ReadOnly(name) => write!(f, "property `{name}` is read-only"),
            Self::TypeMismatch {
                property,
                expected,
                found,
            } => write!(
                f,
                "property `{property}` expects {expected}, got {found}"
            ),
        }
    }
}

impl std::error::Error for WriteError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_display() {
        let e = BindError::invalid("a..b", "empty property name");
        assert_eq!(
            e.to_string(),
            "invalid chain expression `a..b`: empty property name"
        );

        let e = BindError::NullRoot {
            expression: "a.b".into(),
        };
        assert_eq!(e.to_string(), "root of chain expression `a.b` is null");
    }

    #[test]
    fn convert_error_display() {
        let e = ConvertError::Format {
            text: "abc".into(),
            target: ValueType::Int,
        };
        assert_eq!(e.to_string(), "cannot parse \"abc\" as int");

        let e = ConvertError::Unsupported {
            from: ValueKind::Object,
            target: ValueType::Optional(Box::new(ValueType::Float)),
        };
        assert_eq!(e.to_string(), "no conversion from object to float?");
    }

    #[test]
    fn write_error_display() {
        let e = WriteError::TypeMismatch {
            property: "count".into(),
            expected: ValueType::Int,
            found: ValueKind::Str,
        };
        assert_eq!(e.to_string(), "property `count` expects int, got str");
        assert_eq!(
            WriteError::ReadOnly("id".into()).to_string(),
            "property `id` is read-only"
        );
    }
}
