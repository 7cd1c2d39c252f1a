//! Reusable operator shapes for the built-in catalogue.

use tabula_common::{DataType, ErrorCode, Value};

use crate::operator::{OpCaps, Operator, OperatorContext, number_arg};
use crate::token::{Token, TokenType};

pub(crate) static NUMBERS: [DataType; 5] = [DataType::Number; 5];
pub(crate) static ANYS: [DataType; 5] = [DataType::Any; 5];

pub(crate) fn function_type(arity: usize) -> TokenType {
    match arity {
        1 => TokenType::UnaryFunc,
        2 => TokenType::BinaryFunc,
        _ => TokenType::GenericFunc,
    }
}

/// A fixed-arity function over numbers.
#[derive(Debug)]
pub struct NumericFunc {
    label: &'static str,
    aliases: &'static [&'static str],
    arity: usize,
    f: fn(&[f64]) -> Result<f64, ErrorCode>,
}

impl NumericFunc {
    pub const fn new(
        label: &'static str,
        aliases: &'static [&'static str],
        arity: usize,
        f: fn(&[f64]) -> Result<f64, ErrorCode>,
    ) -> Self {
        Self {
            label,
            aliases,
            arity,
            f,
        }
    }
}

impl Operator for NumericFunc {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        function_type(self.arity)
    }

    fn arg_types(&self) -> &[DataType] {
        &NUMBERS[..self.arity]
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        let numbers: Result<Vec<f64>, ErrorCode> = args.iter().map(number_arg).collect();
        match numbers.and_then(|n| (self.f)(&n)) {
            Ok(n) => Token::number(n),
            Err(e) => Token::Error(e),
        }
    }
}

/// A fixed-arity function over arbitrary operands.
///
/// Argument types are checked before `f` runs; `Any` slots accept every
/// value. Null and error arguments only reach `f` when the capabilities
/// allow them.
#[derive(Debug)]
pub struct ScalarFunc {
    label: &'static str,
    aliases: &'static [&'static str],
    args: &'static [DataType],
    result: DataType,
    caps: OpCaps,
    f: fn(&[Token]) -> Result<Token, ErrorCode>,
}

impl ScalarFunc {
    pub const fn new(
        label: &'static str,
        aliases: &'static [&'static str],
        args: &'static [DataType],
        result: DataType,
        f: fn(&[Token]) -> Result<Token, ErrorCode>,
    ) -> Self {
        Self {
            label,
            aliases,
            args,
            result,
            caps: OpCaps::PURE,
            f,
        }
    }

    pub const fn with_caps(mut self, caps: OpCaps) -> Self {
        self.caps = caps;
        self
    }
}

impl Operator for ScalarFunc {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        function_type(self.args.len())
    }

    fn arg_types(&self) -> &[DataType] {
        self.args
    }

    fn result_type(&self) -> DataType {
        self.result
    }

    fn caps(&self) -> OpCaps {
        self.caps
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        for (arg, ty) in args.iter().zip(self.args) {
            if let Some(v) = arg.value() {
                if !ty.accepts(v.data_type()) {
                    return Token::Error(ErrorCode::OperandDataTypeMismatch);
                }
            }
        }
        (self.f)(args).unwrap_or_else(Token::Error)
    }
}

pub(crate) fn text(s: impl Into<String>) -> Token {
    Token::Operand(Value::Text(s.into()))
}

pub(crate) fn boolean(b: bool) -> Token {
    Token::Operand(Value::Boolean(b))
}

/// Whole-number argument, truncated toward zero.
pub(crate) fn integer_arg(token: &Token) -> Result<i64, ErrorCode> {
    let n = number_arg(token)?;
    if !n.is_finite() || n.abs() > i64::MAX as f64 {
        return Err(ErrorCode::InvalidOperand);
    }
    Ok(n.trunc() as i64)
}
