//! The built-in operator catalogue.

pub mod arithmetic;
pub mod datetime;
pub mod logical;
pub mod math;
pub mod random;
pub mod stat;
pub mod text;
pub mod transform;
mod utils;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tabula_common::Value;

use crate::operator::Operator;
use crate::token::Token;

pub use stat::StatInput;
pub use utils::{NumericFunc, ScalarFunc};

/// Every built-in operator, in registration order.
pub fn operators() -> Vec<Arc<dyn Operator>> {
    let mut out: Vec<Arc<dyn Operator>> = Vec::with_capacity(256);
    arithmetic::operators(&mut out);
    math::operators(&mut out);
    logical::operators(&mut out);
    text::operators(&mut out);
    stat::operators(&mut out);
    transform::operators(&mut out);
    datetime::operators(&mut out);
    random::operators(&mut out);
    out
}

/// Named constants.
pub fn constants() -> Vec<Token> {
    use std::f64::consts;
    let phi = (1.0 + 5f64.sqrt()) / 2.0;
    vec![
        Token::named("pi", Value::Number(consts::PI)),
        Token::named("e", Value::Number(consts::E)),
        Token::named("tau", Value::Number(consts::TAU)),
        Token::named("phi", Value::Number(phi)),
        Token::named("sqrt2", Value::Number(consts::SQRT_2)),
        Token::named("ln2", Value::Number(consts::LN_2)),
        Token::named("ln10", Value::Number(consts::LN_10)),
        Token::named("true", Value::Boolean(true)),
        Token::named("false", Value::Boolean(false)),
    ]
}

pub(crate) fn builtin_table() -> FxHashMap<String, Token> {
    let mut table = FxHashMap::default();
    for op in operators() {
        let labels = std::iter::once(op.label()).chain(op.aliases().iter().copied());
        for label in labels {
            table.insert(label.to_ascii_lowercase(), Token::Operator(Arc::clone(&op)));
        }
    }
    for constant in constants() {
        if let Token::Constant { label: Some(l), .. } = &constant {
            table.insert(l.to_string(), constant.clone());
        }
    }
    table.insert("null".to_string(), Token::Null);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn labels_and_aliases_are_unique() {
        let mut seen = FxHashSet::default();
        let mut clashes = Vec::new();
        for op in operators() {
            for label in std::iter::once(op.label()).chain(op.aliases().iter().copied()) {
                if !seen.insert(label.to_ascii_lowercase()) {
                    clashes.push(label.to_string());
                }
            }
        }
        for c in constants() {
            if let Token::Constant { label: Some(l), .. } = c {
                if !seen.insert(l.to_string()) {
                    clashes.push(l.to_string());
                }
            }
        }
        assert!(clashes.is_empty(), "duplicate built-in labels: {clashes:?}");
    }

    #[test]
    fn catalogue_covers_every_family() {
        use crate::token::TokenType;
        let ops = operators();
        let count = |tt: TokenType| ops.iter().filter(|o| o.token_type() == tt).count();
        assert!(count(TokenType::BinaryOp) >= 15);
        assert_eq!(count(TokenType::UnaryOp), 2);
        assert!(count(TokenType::UnaryFunc) >= 40);
        assert!(count(TokenType::StatOp) >= 25);
        assert!(count(TokenType::TransformOp) >= 15);
        assert!(builtin_table().len() > 250);
    }

    #[test]
    fn arity_matches_token_type() {
        use crate::token::TokenType;
        for op in operators() {
            match op.token_type() {
                TokenType::UnaryOp | TokenType::UnaryFunc => assert_eq!(op.arity(), 1, "{op:?}"),
                TokenType::BinaryOp | TokenType::BinaryFunc => assert_eq!(op.arity(), 2, "{op:?}"),
                TokenType::StatOp | TokenType::TransformOp => assert_eq!(op.arity(), 1, "{op:?}"),
                TokenType::GenericFunc => assert!(op.arity() != 1 && op.arity() != 2, "{op:?}"),
                other => panic!("unexpected token type {other:?}"),
            }
        }
    }
}
