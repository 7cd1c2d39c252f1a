//! Evaluation error codes.
//!
//! - **`ErrorCode`** : the closed set of evaluation failures
//!
//! Error codes never escape evaluation as `Err`; they travel as values
//! (an `EvaluationError` token, or `Value::Error` once written into a cell)
//! so that one failing formula cannot abort unrelated recalculation.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// All recognised evaluation error codes.
///
/// Names are CamelCase while `Display` renders the short `#CODE` form used
/// in rendered cell values.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DivideByZero,
    NaN,
    Infinity,
    InvalidOperand,
    InvalidPendingOperator,
    InvalidTableOperand,
    ReferenceRequired,
    StackOverflow,
    StackUnderflow,
    OperandDataTypeMismatch,
    OperandRequired,
    Unspecified,
    NoError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 13] = [
        Self::DivideByZero,
        Self::NaN,
        Self::Infinity,
        Self::InvalidOperand,
        Self::InvalidPendingOperator,
        Self::InvalidTableOperand,
        Self::ReferenceRequired,
        Self::StackOverflow,
        Self::StackUnderflow,
        Self::OperandDataTypeMismatch,
        Self::OperandRequired,
        Self::Unspecified,
        Self::NoError,
    ];

    /// Parse the rendered `#CODE` form (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(needle))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DivideByZero => "#DIV/0",
            Self::NaN => "#NAN",
            Self::Infinity => "#INF",
            Self::InvalidOperand => "#OPERAND",
            Self::InvalidPendingOperator => "#PENDING",
            Self::InvalidTableOperand => "#TABLE",
            Self::ReferenceRequired => "#REF",
            Self::StackOverflow => "#OVERFLOW",
            Self::StackUnderflow => "#UNDERFLOW",
            Self::OperandDataTypeMismatch => "#TYPE",
            Self::OperandRequired => "#REQUIRED",
            Self::Unspecified => "#ERROR",
            Self::NoError => "#OK",
        }
    }

    /// `NoError` is the only code that does not represent a failure.
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::NoError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
