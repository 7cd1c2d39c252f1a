//! Volatile random-number functions.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tabula_common::{DataType, ErrorCode};

use super::utils::NUMBERS;
use crate::operator::{OpCaps, Operator, OperatorContext, number_arg};
use crate::token::{Token, TokenType};

static RNG: Lazy<Mutex<SmallRng>> = Lazy::new(|| {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed);
    Mutex::new(SmallRng::seed_from_u64(seed))
});

/// Reseed the shared generator, making subsequent draws reproducible.
pub fn seed(seed: u64) {
    *RNG.lock() = SmallRng::seed_from_u64(seed);
}

#[derive(Debug)]
pub struct RandFn;

impl Operator for RandFn {
    fn label(&self) -> &str {
        "rand"
    }

    fn aliases(&self) -> &[&'static str] {
        &["random"]
    }

    fn token_type(&self) -> TokenType {
        TokenType::GenericFunc
    }

    fn arg_types(&self) -> &[DataType] {
        &[]
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn caps(&self) -> OpCaps {
        OpCaps::VOLATILE
    }

    fn evaluate(&self, _args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        Token::number(RNG.lock().gen_range(0.0..1.0))
    }
}

/// Uniform integer in `[lo, hi]`.
#[derive(Debug)]
pub struct RandBetweenFn;

impl Operator for RandBetweenFn {
    fn label(&self) -> &str {
        "randbetween"
    }

    fn aliases(&self) -> &[&'static str] {
        &["randint"]
    }

    fn token_type(&self) -> TokenType {
        TokenType::BinaryFunc
    }

    fn arg_types(&self) -> &[DataType] {
        &NUMBERS[..2]
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn caps(&self) -> OpCaps {
        OpCaps::VOLATILE
    }

    fn evaluate(&self, args: &[Token], _ctx: &dyn OperatorContext) -> Token {
        let bounds = number_arg(&args[0]).and_then(|lo| number_arg(&args[1]).map(|hi| (lo, hi)));
        match bounds {
            Ok((lo, hi)) => {
                let (lo, hi) = (lo.ceil() as i64, hi.floor() as i64);
                if lo > hi {
                    return Token::Error(ErrorCode::InvalidOperand);
                }
                Token::number(RNG.lock().gen_range(lo..=hi) as f64)
            }
            Err(e) => Token::Error(e),
        }
    }
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    out.push(Arc::new(RandFn));
    out.push(Arc::new(RandBetweenFn));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::StaticContext;

    #[test]
    fn draws_stay_within_bounds() {
        let ctx = StaticContext::default();
        for _ in 0..200 {
            let n = number_arg(&RandFn.evaluate(&[], &ctx)).unwrap();
            assert!((0.0..1.0).contains(&n));
            let k = number_arg(&RandBetweenFn.evaluate(&[Token::number(1.5), Token::number(3.0)], &ctx))
                .unwrap();
            assert!(k == 2.0 || k == 3.0);
        }
        assert_eq!(
            RandBetweenFn.evaluate(&[Token::number(5.0), Token::number(1.0)], &ctx),
            Token::Error(ErrorCode::InvalidOperand)
        );
    }
}
