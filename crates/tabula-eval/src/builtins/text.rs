//! Text functions.
//!
//! Positions are 1-based and counted in characters, not bytes.

use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use super::utils::{ScalarFunc, boolean, integer_arg, text};
use crate::operator::{Operator, text_arg, value_arg};
use crate::token::Token;

const T: DataType = DataType::Text;
const N: DataType = DataType::Number;
const A: DataType = DataType::Any;

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn take_chars(s: &str, skip: usize, take: usize) -> String {
    s.chars().skip(skip).take(take).collect()
}

fn count_arg(token: &Token) -> Result<usize, ErrorCode> {
    let n = integer_arg(token)?;
    usize::try_from(n).map_err(|_| ErrorCode::InvalidOperand)
}

fn to_number(value: &Value) -> Result<f64, ErrorCode> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::Boolean(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ErrorCode::OperandDataTypeMismatch),
        _ => Err(ErrorCode::OperandDataTypeMismatch),
    }
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let funcs = [
        ScalarFunc::new("len", &["length"], &[T], N, |a| {
            Ok(Token::number(char_count(text_arg(&a[0])?) as f64))
        }),
        ScalarFunc::new("upper", &["ucase"], &[T], T, |a| {
            Ok(text(text_arg(&a[0])?.to_uppercase()))
        }),
        ScalarFunc::new("lower", &["lcase"], &[T], T, |a| {
            Ok(text(text_arg(&a[0])?.to_lowercase()))
        }),
        ScalarFunc::new("trim", &[], &[T], T, |a| Ok(text(text_arg(&a[0])?.trim()))),
        ScalarFunc::new("ltrim", &[], &[T], T, |a| {
            Ok(text(text_arg(&a[0])?.trim_start()))
        }),
        ScalarFunc::new("rtrim", &[], &[T], T, |a| {
            Ok(text(text_arg(&a[0])?.trim_end()))
        }),
        ScalarFunc::new("left", &[], &[T, N], T, |a| {
            Ok(text(take_chars(text_arg(&a[0])?, 0, count_arg(&a[1])?)))
        }),
        ScalarFunc::new("right", &[], &[T, N], T, |a| {
            let s = text_arg(&a[0])?;
            let n = count_arg(&a[1])?;
            let len = char_count(s);
            Ok(text(take_chars(s, len.saturating_sub(n), n)))
        }),
        ScalarFunc::new("substr", &["mid", "substring"], &[T, N, N], T, |a| {
            let start = count_arg(&a[1])?;
            if start == 0 {
                return Err(ErrorCode::InvalidOperand);
            }
            Ok(text(take_chars(text_arg(&a[0])?, start - 1, count_arg(&a[2])?)))
        }),
        ScalarFunc::new("replace", &["substitute"], &[T, T, T], T, |a| {
            let from = text_arg(&a[1])?;
            if from.is_empty() {
                return Ok(a[0].clone());
            }
            Ok(text(text_arg(&a[0])?.replace(from, text_arg(&a[2])?)))
        }),
        ScalarFunc::new("repeat", &["rept"], &[T, N], T, |a| {
            Ok(text(text_arg(&a[0])?.repeat(count_arg(&a[1])?)))
        }),
        ScalarFunc::new("contains", &[], &[T, T], DataType::Boolean, |a| {
            Ok(boolean(text_arg(&a[0])?.contains(text_arg(&a[1])?)))
        }),
        ScalarFunc::new("startswith", &[], &[T, T], DataType::Boolean, |a| {
            Ok(boolean(text_arg(&a[0])?.starts_with(text_arg(&a[1])?)))
        }),
        ScalarFunc::new("endswith", &[], &[T, T], DataType::Boolean, |a| {
            Ok(boolean(text_arg(&a[0])?.ends_with(text_arg(&a[1])?)))
        }),
        // 0 when absent
        ScalarFunc::new("indexof", &["find"], &[T, T], N, |a| {
            let hay = text_arg(&a[0])?;
            let position = hay
                .find(text_arg(&a[1])?)
                .map_or(0, |byte| char_count(&hay[..byte]) + 1);
            Ok(Token::number(position as f64))
        }),
        ScalarFunc::new("concat", &[], &[A, A], T, |a| {
            Ok(text(format!("{}{}", value_arg(&a[0])?, value_arg(&a[1])?)))
        }),
        ScalarFunc::new("totext", &["text", "str"], &[A], T, |a| {
            Ok(text(value_arg(&a[0])?.to_string()))
        }),
        ScalarFunc::new("tonumber", &["num", "value"], &[A], N, |a| {
            Ok(Token::number(to_number(&value_arg(&a[0])?)?))
        }),
        ScalarFunc::new("char", &["chr"], &[N], T, |a| {
            let code = u32::try_from(integer_arg(&a[0])?).map_err(|_| ErrorCode::InvalidOperand)?;
            char::from_u32(code)
                .map(|c| text(c.to_string()))
                .ok_or(ErrorCode::InvalidOperand)
        }),
        ScalarFunc::new("code", &["ord"], &[T], N, |a| {
            text_arg(&a[0])?
                .chars()
                .next()
                .map(|c| Token::number(c as u32 as f64))
                .ok_or(ErrorCode::InvalidOperand)
        }),
    ];
    for op in funcs {
        out.push(Arc::new(op));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::StaticContext;

    fn call(label: &str, args: &[Token]) -> Token {
        let mut ops = Vec::new();
        operators(&mut ops);
        let op = ops
            .into_iter()
            .find(|o| o.label() == label || o.aliases().iter().any(|a| *a == label))
            .expect("operator");
        op.evaluate(args, &StaticContext::default())
    }

    #[test]
    fn positions_count_characters() {
        assert_eq!(call("len", &[Token::operand("héllo")]), Token::number(5.0));
        assert_eq!(
            call("substr", &[Token::operand("héllo"), Token::number(2.0), Token::number(3.0)]),
            text("éll")
        );
        assert_eq!(
            call("right", &[Token::operand("abc"), Token::number(5.0)]),
            text("abc")
        );
        assert_eq!(
            call("find", &[Token::operand("héllo"), Token::operand("l")]),
            Token::number(3.0)
        );
        assert_eq!(
            call("find", &[Token::operand("abc"), Token::operand("z")]),
            Token::number(0.0)
        );
    }

    #[test]
    fn conversions_reject_unparsable_text() {
        assert_eq!(call("tonumber", &[Token::operand(" 2.5 ")]), Token::number(2.5));
        assert_eq!(
            call("value", &[Token::operand("two")]),
            Token::Error(ErrorCode::OperandDataTypeMismatch)
        );
        assert_eq!(call("str", &[Token::number(4.0)]), text("4"));
        assert_eq!(
            call("upper", &[Token::number(4.0)]),
            Token::Error(ErrorCode::OperandDataTypeMismatch)
        );
    }
}
