#![forbid(unsafe_code)]

//! Value conversion between source values and destination types.
//!
//! When a binding has no explicit converter, [`convert`] picks a conversion
//! from the *runtime* kind of each pushed value and the destination's declared
//! [`ValueType`], in this order:
//!
//! 1. The target accepts the value as is: pass it through. (A value that is
//!    already an instance of the target lands here too.)
//! 2. The target is `Optional(inner)`: primitive conversion to `inner`.
//! 3. The value is a primitive and the target is primitive: [`change_type`].
//! 4. Otherwise: the target's default value.
//!
//! Conversion errors never escape a binding; the leaf observer replaces the
//! failed value with the target's default.

use std::fmt;
use std::sync::Arc;

use crate::error::ConvertError;
use crate::value::{Value, ValueType};

type ConvertFn = dyn Fn(&Value) -> Result<Value, ConvertError> + Send + Sync;

/// How a binding turns a source value into a destination value.
#[derive(Clone, Default)]
pub enum Converter {
    /// Resolve per value with [`convert`] against the destination's declared type.
    #[default]
    Auto,
    /// A user-supplied conversion.
    Custom(Arc<ConvertFn>),
}

impl Converter {
    /// Wrap a fallible conversion function.
    pub fn new(f: impl Fn(&Value) -> Result<Value, ConvertError> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    /// Wrap an infallible conversion function.
    pub fn map(f: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(move |v| Ok(f(v))))
    }

    /// Convert `value` for a destination declared as `target`.
    ///
    /// # Errors
    ///
    /// Whatever the resolved conversion reports.
    pub fn apply(&self, value: &Value, target: &ValueType) -> Result<Value, ConvertError> {
        match self {
            Self::Auto => convert(value, target),
            Self::Custom(f) => f(value),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("Auto"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Convert `value` to `target` using the automatic resolution order.
///
/// # Errors
///
/// Returns the [`ConvertError`] of a failed primitive conversion.
pub fn convert(value: &Value, target: &ValueType) -> Result<Value, ConvertError> {
    if target.accepts(value) {
        return Ok(value.clone());
    }
    if let ValueType::Optional(inner) = target {
        return change_type(value, inner);
    }
    if value.is_primitive() && target.is_primitive() {
        return change_type(value, target);
    }
    Ok(target.default_value())
}

/// Primitive conversion between `bool`, `int`, `float` and `str`.
///
/// Floats convert to integers with round-half-to-even. Strings are trimmed
/// before parsing; booleans parse `true`/`false` case-insensitively.
///
/// # Errors
///
/// - [`ConvertError::Format`] if text does not parse.
/// - [`ConvertError::Overflow`] if a float is out of `i64` range or not finite.
/// - [`ConvertError::Unsupported`] for non-primitive values or targets.
pub fn change_type(value: &Value, target: &ValueType) -> Result<Value, ConvertError> {
    let unsupported = || ConvertError::Unsupported {
        from: value.kind(),
        target: target.clone(),
    };
    let format_err = |text: &str| ConvertError::Format {
        text: text.to_owned(),
        target: target.clone(),
    };
    match (target, value) {
        (ValueType::Optional(inner), v) => {
            if v.is_null() {
                Ok(Value::Null)
            } else {
                change_type(v, inner)
            }
        }
        (ValueType::Any, v) => Ok(v.clone()),

        (ValueType::Str, Value::Str(s)) => Ok(Value::Str(Arc::clone(s))),
        (ValueType::Str, Value::Bool(b)) => Ok(Value::from(b.to_string())),
        (ValueType::Str, Value::Int(i)) => Ok(Value::from(i.to_string())),
        (ValueType::Str, Value::Float(x)) => Ok(Value::from(x.to_string())),

        (ValueType::Int, Value::Int(i)) => Ok(Value::Int(*i)),
        (ValueType::Int, Value::Bool(b)) => Ok(Value::Int(i64::from(*b))),
        (ValueType::Int, Value::Float(x)) => float_to_int(*x)
            .map(Value::Int)
            .ok_or_else(|| ConvertError::Overflow {
                target: target.clone(),
            }),
        (ValueType::Int, Value::Str(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format_err(s)),

        (ValueType::Float, Value::Float(x)) => Ok(Value::Float(*x)),
        (ValueType::Float, Value::Bool(b)) => Ok(Value::Float(if *b { 1.0 } else { 0.0 })),
        #[allow(clippy::cast_precision_loss)]
        (ValueType::Float, Value::Int(i)) => Ok(Value::Float(*i as f64)),
        (ValueType::Float, Value::Str(s)) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| format_err(s)),

        (ValueType::Bool, Value::Bool(b)) => Ok(Value::Bool(*b)),
        (ValueType::Bool, Value::Int(i)) => Ok(Value::Bool(*i != 0)),
        (ValueType::Bool, Value::Float(x)) => Ok(Value::Bool(*x != 0.0)),
        (ValueType::Bool, Value::Str(s)) => {
            let t = s.trim();
            if t.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if t.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(format_err(s))
            }
        }

        _ => Err(unsupported()),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(x: f64) -> Option<i64> {
    if !x.is_finite() {
        return None;
    }
    let r = x.round_ties_even();
    // i64::MAX is not representable; 2^63 is the first float out of range.
    if r < i64::MIN as f64 || r >= i64::MAX as f64 {
        return None;
    }
    Some(r as i64)
}
