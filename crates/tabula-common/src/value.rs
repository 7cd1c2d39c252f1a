use std::{
    any::Any,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::ErrorCode;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// User-defined payload carried by [`Value::Custom`].
///
/// Custom payloads let embedders feed their own operand types through the
/// engine; operator overloads are keyed on [`CustomData::type_name`].
pub trait CustomData: Debug + Send + Sync + 'static {
    /// Stable type name used for overload signatures.
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Rendering used by `Display` and by canonical formula text.
    fn render(&self) -> String {
        format!("{self:?}")
    }

    /// Structural equality; the default only treats identical allocations as equal.
    fn eq_data(&self, _other: &dyn CustomData) -> bool {
        false
    }
}

/// The type of a value as seen by operator signatures.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Number,
    Text,
    Boolean,
    Error,
    /// A user type, identified by [`CustomData::type_name`].
    Custom(&'static str),
    /// The argument is consumed as an element reference, not its value.
    Reference,
    Any,
}

impl DataType {
    /// `Any` accepts everything; `Reference` is checked structurally by the evaluator.
    pub fn accepts(&self, other: DataType) -> bool {
        matches!(self, DataType::Any) || *self == other
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Number => write!(f, "number"),
            DataType::Text => write!(f, "text"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Error => write!(f, "error"),
            DataType::Custom(name) => write!(f, "{name}"),
            DataType::Reference => write!(f, "reference"),
            DataType::Any => write!(f, "any"),
        }
    }
}

/// A cell or operand value.
///
/// Every numeric input is widened to `f64` on construction, which trades
/// integer exactness above 2^53 for uniform arithmetic.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    Error(ErrorCode),
    #[cfg_attr(feature = "serde", serde(skip))]
    Custom(Arc<dyn CustomData>),
}

impl Value {
    pub fn custom<T: CustomData>(data: T) -> Self {
        Value::Custom(Arc::new(data))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Number(_) => DataType::Number,
            Value::Text(_) => DataType::Text,
            Value::Boolean(_) => DataType::Boolean,
            Value::Error(_) => DataType::Error,
            Value::Custom(c) => DataType::Custom(c.type_name()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<ErrorCode> {
        match self {
            Value::Error(e) => Some(*e),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Boolean(b) => *b,
            Value::Error(_) => false,
            Value::Custom(_) => true,
        }
    }

    /// Round numbers to `digits` significant digits; other values pass through.
    pub fn rounded(self, digits: u32) -> Self {
        match self {
            Value::Number(n) => Value::Number(round_significant(n, digits)),
            other => other,
        }
    }
}

/// Round `value` to `digits` significant digits.
///
/// Non-finite values, zero, and requests beyond `f64` precision are returned unchanged.
pub fn round_significant(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() || digits == 0 || digits >= 17 {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let scale = digits as i32 - 1 - magnitude;
    if scale > 300 {
        return value;
    }
    if scale >= 0 {
        let factor = 10f64.powi(scale);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-scale);
        (value / factor).round() * factor
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Custom(a), Value::Custom(b)) => Arc::ptr_eq(a, b) || a.eq_data(b.as_ref()),
            _ => false,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Number(n) => n.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Error(e) => e.hash(state),
            Value::Custom(c) => {
                c.type_name().hash(state);
                c.render().hash(state);
            }
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Error(e) => write!(f, "{e}"),
            Value::Custom(c) => write!(f, "{}", c.render()),
        }
    }
}

macro_rules! widen_to_number {
    ($($t:ty),+ $(,)?) => {
        $(
            impl From<$t> for Value {
                fn from(n: $t) -> Self {
                    Value::Number(n as f64)
                }
            }
        )+
    };
}

widen_to_number!(f64, f32, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<ErrorCode> for Value {
    fn from(e: ErrorCode) -> Self {
        Value::Error(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Money(i64);

    impl CustomData for Money {
        fn type_name(&self) -> &'static str {
            "money"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn integers_widen_to_double() {
        assert_eq!(Value::from(3_i32), Value::Number(3.0));
        assert_eq!(Value::from(7_u64), Value::Number(7.0));
        assert_eq!(Value::from(1.5_f32), Value::Number(1.5));
        assert_eq!(Value::from(3_i64).data_type(), DataType::Number);
    }

    #[test]
    fn significant_digit_rounding_removes_float_noise() {
        assert_eq!(round_significant(0.1 + 0.2, 15), 0.3);
        assert_eq!(round_significant(123456.789, 4), 123500.0);
        assert_eq!(round_significant(-0.000123456, 3), -0.000123);
        assert_eq!(round_significant(0.0, 5), 0.0);
        assert!(round_significant(f64::NAN, 5).is_nan());
    }

    #[test]
    fn custom_values_report_their_type_name() {
        let v = Value::custom(Money(5));
        assert_eq!(v.data_type(), DataType::Custom("money"));
        assert_eq!(v.clone(), v);
        assert_ne!(v, Value::custom(Money(5)));
    }

    #[test]
    fn display_uses_shortest_number_form() {
        assert_eq!(Value::Number(14.0).to_string(), "14");
        assert_eq!(Value::Number(0.25).to_string(), "0.25");
        assert_eq!(Value::Error(ErrorCode::NaN).to_string(), "#NAN");
    }
}
