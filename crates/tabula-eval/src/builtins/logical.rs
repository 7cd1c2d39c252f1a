//! Conditionals and type predicates.

use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use super::utils::{ScalarFunc, boolean};
use crate::operator::{OpCaps, Operator, bool_arg, number_arg};
use crate::token::Token;

const A: DataType = DataType::Any;
const N: DataType = DataType::Number;
const B: DataType = DataType::Boolean;

/// Predicates see nulls and errors as ordinary arguments.
const INSPECT: OpCaps = OpCaps::PURE
    .union(OpCaps::ALLOW_NULLS)
    .union(OpCaps::ALLOW_ERRORS);

fn is_kind(token: &Token, test: fn(&Value) -> bool) -> Token {
    boolean(token.value().is_some_and(test))
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let funcs = [
        ScalarFunc::new("isnull", &["isblank", "isempty"], &[A], B, |a| {
            Ok(boolean(a[0].is_null()))
        })
        .with_caps(INSPECT),
        ScalarFunc::new("isnumber", &["isnum"], &[A], B, |a| {
            Ok(is_kind(&a[0], |v| matches!(v, Value::Number(_))))
        })
        .with_caps(INSPECT),
        ScalarFunc::new("istext", &[], &[A], B, |a| {
            Ok(is_kind(&a[0], |v| matches!(v, Value::Text(_))))
        })
        .with_caps(INSPECT),
        ScalarFunc::new("isboolean", &["isbool", "islogical"], &[A], B, |a| {
            Ok(is_kind(&a[0], |v| matches!(v, Value::Boolean(_))))
        })
        .with_caps(INSPECT),
        ScalarFunc::new("iserror", &["iserr"], &[A], B, |a| Ok(boolean(a[0].is_error())))
            .with_caps(INSPECT),
        ScalarFunc::new("iseven", &[], &[N], B, |a| {
            Ok(boolean(number_arg(&a[0])?.trunc() % 2.0 == 0.0))
        }),
        ScalarFunc::new("isodd", &[], &[N], B, |a| {
            Ok(boolean(number_arg(&a[0])?.trunc() % 2.0 != 0.0))
        }),
        // both branches are evaluated eagerly; errors in the unused one are dropped
        ScalarFunc::new("if", &["iif"], &[A, A, A], A, |a| {
            if let Some(e) = a[0].error() {
                return Err(e);
            }
            if a[0].is_null() {
                return Err(ErrorCode::OperandRequired);
            }
            Ok(if bool_arg(&a[0])? { a[1].clone() } else { a[2].clone() })
        })
        .with_caps(INSPECT),
        ScalarFunc::new("ifnull", &["coalesce", "nvl"], &[A, A], A, |a| {
            Ok(if a[0].is_null() { a[1].clone() } else { a[0].clone() })
        })
        .with_caps(OpCaps::PURE.union(OpCaps::ALLOW_NULLS)),
        ScalarFunc::new("iferror", &[], &[A, A], A, |a| {
            Ok(if a[0].is_error() { a[1].clone() } else { a[0].clone() })
        })
        .with_caps(INSPECT),
        ScalarFunc::new("between", &[], &[N, N, N], B, |a| {
            let x = number_arg(&a[0])?;
            Ok(boolean(x >= number_arg(&a[1])? && x <= number_arg(&a[2])?))
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
        let op = ops.into_iter().find(|o| o.label() == label).expect("operator");
        op.evaluate(args, &StaticContext::default())
    }

    #[test]
    fn predicates_accept_nulls_and_errors() {
        assert_eq!(call("isnull", &[Token::Null]), boolean(true));
        assert_eq!(call("iserror", &[Token::Error(ErrorCode::NaN)]), boolean(true));
        assert_eq!(call("isnumber", &[Token::Null]), boolean(false));
        assert_eq!(call("istext", &[Token::operand("x")]), boolean(true));
    }

    #[test]
    fn conditionals_pick_a_branch() {
        let yes = Token::operand("yes");
        let broken = Token::Error(ErrorCode::DivideByZero);
        assert_eq!(call("if", &[boolean(true), yes.clone(), broken.clone()]), yes);
        assert_eq!(
            call("if", &[Token::number(0.0), yes.clone(), broken.clone()]),
            broken
        );
        assert_eq!(
            call("if", &[Token::Null, yes.clone(), yes.clone()]),
            Token::Error(ErrorCode::OperandRequired)
        );
        assert_eq!(call("ifnull", &[Token::Null, yes.clone()]), yes);
        assert_eq!(call("iferror", &[broken, yes.clone()]), yes);
    }
}
