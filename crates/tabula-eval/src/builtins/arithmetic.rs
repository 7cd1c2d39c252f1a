//! Infix and prefix operators: arithmetic, comparison, logic, concatenation.

use std::cmp::Ordering;
use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use super::utils::{ANYS, NUMBERS, boolean, text};
use crate::operator::{OpCaps, Operator, OperatorContext, bool_arg, number_arg, value_arg};
use crate::token::{Token, TokenType};

static BOOLEANS: [DataType; 2] = [DataType::Boolean; 2];

/// Binary arithmetic on two numbers.
#[derive(Debug)]
pub struct ArithmeticOp {
    label: &'static str,
    aliases: &'static [&'static str],
    priority: u8,
    right_assoc: bool,
    f: fn(f64, f64) -> Result<f64, ErrorCode>,
}

impl Operator for ArithmeticOp {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        TokenType::BinaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &NUMBERS[..2]
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn caps(&self) -> OpCaps {
        if self.right_assoc {
            OpCaps::PURE | OpCaps::RIGHT_ASSOC
        } else {
            OpCaps::PURE
        }
    }

    fn overload_symbol(&self) -> Option<&str> {
        crate::registry::OVERLOADABLE
            .contains(&self.label)
            .then_some(self.label)
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        let result = number_arg(&args[0])
            .and_then(|a| number_arg(&args[1]).map(|b| (a, b)))
            .and_then(|(a, b)| (self.f)(a, b));
        match result {
            Ok(n) => Token::number(n),
            Err(e) => Token::Error(e),
        }
    }
}

fn divide(a: f64, b: f64) -> Result<f64, ErrorCode> {
    if b == 0.0 {
        Err(ErrorCode::DivideByZero)
    } else {
        Ok(a / b)
    }
}

/// Modulo takes the sign of the divisor.
fn modulo(a: f64, b: f64) -> Result<f64, ErrorCode> {
    if b == 0.0 {
        Err(ErrorCode::DivideByZero)
    } else {
        Ok(a - b * (a / b).floor())
    }
}

/// Prefix negation; written `-x`.
#[derive(Debug)]
pub struct Negate;

impl Operator for Negate {
    fn label(&self) -> &str {
        "neg"
    }

    fn aliases(&self) -> &[&'static str] {
        &["negate"]
    }

    fn symbol(&self) -> &str {
        "-"
    }

    fn token_type(&self) -> TokenType {
        TokenType::UnaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &NUMBERS[..1]
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn overload_symbol(&self) -> Option<&str> {
        Some("-")
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        match number_arg(&args[0]) {
            Ok(n) => Token::number(-n),
            Err(e) => Token::Error(e),
        }
    }
}

#[derive(Debug)]
pub struct Not;

impl Operator for Not {
    fn label(&self) -> &str {
        "not"
    }

    fn aliases(&self) -> &[&'static str] {
        &["!"]
    }

    fn token_type(&self) -> TokenType {
        TokenType::UnaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &BOOLEANS[..1]
    }

    fn result_type(&self) -> DataType {
        DataType::Boolean
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        match bool_arg(&args[0]) {
            Ok(b) => boolean(!b),
            Err(e) => Token::Error(e),
        }
    }
}

/// Ordering between two values of the same kind.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
        (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
        (Value::Custom(_), Value::Custom(_)) if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

#[derive(Debug)]
pub struct Comparison {
    label: &'static str,
    aliases: &'static [&'static str],
    test: fn(Ordering) -> bool,
    /// Equality tests accept mismatched kinds (never equal); orderings reject them.
    equality: bool,
}

impl Operator for Comparison {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        TokenType::BinaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &ANYS[..2]
    }

    fn result_type(&self) -> DataType {
        DataType::Boolean
    }

    fn priority(&self) -> u8 {
        3
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        let (a, b) = match (value_arg(&args[0]), value_arg(&args[1])) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return Token::Error(e),
        };
        match compare_values(&a, &b) {
            Some(ord) => boolean((self.test)(ord)),
            None if self.equality => boolean((self.test)(Ordering::Less)),
            None => Token::Error(ErrorCode::OperandDataTypeMismatch),
        }
    }
}

#[derive(Debug)]
pub struct LogicalOp {
    label: &'static str,
    aliases: &'static [&'static str],
    priority: u8,
    f: fn(bool, bool) -> bool,
}

impl Operator for LogicalOp {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        TokenType::BinaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &BOOLEANS
    }

    fn result_type(&self) -> DataType {
        DataType::Boolean
    }

    fn priority(&self) -> u8 {
        self.priority
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        match (bool_arg(&args[0]), bool_arg(&args[1])) {
            (Ok(a), Ok(b)) => boolean((self.f)(a, b)),
            (Err(e), _) | (_, Err(e)) => Token::Error(e),
        }
    }
}

/// `a & b` joins the display forms of both operands.
#[derive(Debug)]
pub struct Concat;

impl Operator for Concat {
    fn label(&self) -> &str {
        "&"
    }

    fn token_type(&self) -> TokenType {
        TokenType::BinaryOp
    }

    fn arg_types(&self) -> &[DataType] {
        &ANYS[..2]
    }

    fn result_type(&self) -> DataType {
        DataType::Text
    }

    fn priority(&self) -> u8 {
        4
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        match (value_arg(&args[0]), value_arg(&args[1])) {
            (Ok(a), Ok(b)) => text(format!("{a}{b}")),
            (Err(e), _) | (_, Err(e)) => Token::Error(e),
        }
    }
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let arithmetic = [
        ArithmeticOp {
            label: "+",
            aliases: &["add", "plus"],
            priority: 5,
            right_assoc: false,
            f: |a, b| Ok(a + b),
        },
        ArithmeticOp {
            label: "-",
            aliases: &["subtract", "minus", "sub"],
            priority: 5,
            right_assoc: false,
            f: |a, b| Ok(a - b),
        },
        ArithmeticOp {
            label: "*",
            aliases: &["multiply", "times", "mul"],
            priority: 6,
            right_assoc: false,
            f: |a, b| Ok(a * b),
        },
        ArithmeticOp {
            label: "/",
            aliases: &["divide", "div"],
            priority: 6,
            right_assoc: false,
            f: divide,
        },
        ArithmeticOp {
            label: "%",
            aliases: &["mod"],
            priority: 6,
            right_assoc: false,
            f: modulo,
        },
        ArithmeticOp {
            label: "^",
            aliases: &["**"],
            priority: 8,
            right_assoc: true,
            f: |a, b| Ok(a.powf(b)),
        },
    ];
    for op in arithmetic {
        out.push(Arc::new(op));
    }

    let comparisons = [
        Comparison {
            label: "=",
            aliases: &["==", "eq"],
            test: Ordering::is_eq,
            equality: true,
        },
        Comparison {
            label: "!=",
            aliases: &["<>", "ne"],
            test: Ordering::is_ne,
            equality: true,
        },
        Comparison {
            label: "<",
            aliases: &["lt"],
            test: Ordering::is_lt,
            equality: false,
        },
        Comparison {
            label: "<=",
            aliases: &["le"],
            test: Ordering::is_le,
            equality: false,
        },
        Comparison {
            label: ">",
            aliases: &["gt"],
            test: Ordering::is_gt,
            equality: false,
        },
        Comparison {
            label: ">=",
            aliases: &["ge"],
            test: Ordering::is_ge,
            equality: false,
        },
    ];
    for op in comparisons {
        out.push(Arc::new(op));
    }

    let logical = [
        LogicalOp {
            label: "and",
            aliases: &["&&"],
            priority: 2,
            f: |a, b| a && b,
        },
        LogicalOp {
            label: "xor",
            aliases: &[],
            priority: 2,
            f: |a, b| a != b,
        },
        LogicalOp {
            label: "or",
            aliases: &["||"],
            priority: 1,
            f: |a, b| a || b,
        },
    ];
    for op in logical {
        out.push(Arc::new(op));
    }

    out.push(Arc::new(Concat));
    out.push(Arc::new(Negate));
    out.push(Arc::new(Not));
}
