//! Numeric functions: elementary, trigonometric, rounding, combinatorics.

use std::f64::consts::PI;
use std::sync::Arc;

use tabula_common::{ErrorCode, round_significant};

use super::utils::NumericFunc;
use crate::operator::Operator;

fn factorial(n: f64) -> Result<f64, ErrorCode> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(ErrorCode::InvalidOperand);
    }
    // overflows to infinity past 170!
    Ok((1..=n.min(171.0) as u64).fold(1.0, |acc, k| acc * k as f64))
}

fn choose(n: f64, k: f64) -> Result<f64, ErrorCode> {
    if n < 0.0 || k < 0.0 || n.fract() != 0.0 || k.fract() != 0.0 {
        return Err(ErrorCode::InvalidOperand);
    }
    if k > n {
        return Ok(0.0);
    }
    let k = k.min(n - k);
    Ok((0..k as u64).fold(1.0, |acc, i| acc * (n - i as f64) / (i as f64 + 1.0)).round())
}

fn permutations(n: f64, k: f64) -> Result<f64, ErrorCode> {
    if n < 0.0 || k < 0.0 || n.fract() != 0.0 || k.fract() != 0.0 {
        return Err(ErrorCode::InvalidOperand);
    }
    if k > n {
        return Ok(0.0);
    }
    Ok((0..k as u64).fold(1.0, |acc, i| acc * (n - i as f64)))
}

fn gcd(a: f64, b: f64) -> Result<f64, ErrorCode> {
    if a.fract() != 0.0 || b.fract() != 0.0 || !a.is_finite() || !b.is_finite() {
        return Err(ErrorCode::InvalidOperand);
    }
    let (mut a, mut b) = (a.abs() as u64, b.abs() as u64);
    while b != 0 {
        (a, b) = (b, a % b);
    }
    Ok(a as f64)
}

fn lcm(a: f64, b: f64) -> Result<f64, ErrorCode> {
    let g = gcd(a, b)?;
    if g == 0.0 {
        return Ok(0.0);
    }
    Ok((a * b).abs() / g)
}

/// Round to `digits` decimal places; negative digits round left of the point.
fn round_to(x: f64, digits: f64) -> f64 {
    scaled(x, digits, f64::round)
}

fn trunc_to(x: f64, digits: f64) -> f64 {
    scaled(x, digits, f64::trunc)
}

fn scaled(x: f64, digits: f64, op: fn(f64) -> f64) -> f64 {
    let places = digits.trunc() as i32;
    if places >= 0 {
        let factor = 10f64.powi(places);
        op(x * factor) / factor
    } else {
        let factor = 10f64.powi(-places);
        op(x / factor) * factor
    }
}

fn nonzero(d: f64) -> Result<f64, ErrorCode> {
    if d == 0.0 {
        Err(ErrorCode::DivideByZero)
    } else {
        Ok(d)
    }
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let unary = [
        NumericFunc::new("abs", &[], 1, |x| Ok(x[0].abs())),
        NumericFunc::new("sign", &["sgn"], 1, |x| {
            Ok(if x[0] > 0.0 {
                1.0
            } else if x[0] < 0.0 {
                -1.0
            } else {
                0.0
            })
        }),
        NumericFunc::new("sqrt", &[], 1, |x| Ok(x[0].sqrt())),
        NumericFunc::new("cbrt", &[], 1, |x| Ok(x[0].cbrt())),
        NumericFunc::new("square", &["sqr"], 1, |x| Ok(x[0] * x[0])),
        NumericFunc::new("cube", &[], 1, |x| Ok(x[0] * x[0] * x[0])),
        NumericFunc::new("exp", &[], 1, |x| Ok(x[0].exp())),
        NumericFunc::new("exp2", &[], 1, |x| Ok(x[0].exp2())),
        NumericFunc::new("ln", &["log"], 1, |x| Ok(x[0].ln())),
        NumericFunc::new("log10", &[], 1, |x| Ok(x[0].log10())),
        NumericFunc::new("log2", &[], 1, |x| Ok(x[0].log2())),
        NumericFunc::new("recip", &["reciprocal", "inverse"], 1, |x| {
            Ok(1.0 / nonzero(x[0])?)
        }),
        NumericFunc::new("sin", &[], 1, |x| Ok(x[0].sin())),
        NumericFunc::new("cos", &[], 1, |x| Ok(x[0].cos())),
        NumericFunc::new("tan", &[], 1, |x| Ok(x[0].tan())),
        NumericFunc::new("asin", &["arcsin"], 1, |x| Ok(x[0].asin())),
        NumericFunc::new("acos", &["arccos"], 1, |x| Ok(x[0].acos())),
        NumericFunc::new("atan", &["arctan"], 1, |x| Ok(x[0].atan())),
        NumericFunc::new("sec", &[], 1, |x| Ok(1.0 / nonzero(x[0].cos())?)),
        NumericFunc::new("csc", &[], 1, |x| Ok(1.0 / nonzero(x[0].sin())?)),
        NumericFunc::new("cot", &[], 1, |x| Ok(1.0 / nonzero(x[0].tan())?)),
        NumericFunc::new("sinh", &[], 1, |x| Ok(x[0].sinh())),
        NumericFunc::new("cosh", &[], 1, |x| Ok(x[0].cosh())),
        NumericFunc::new("tanh", &[], 1, |x| Ok(x[0].tanh())),
        NumericFunc::new("asinh", &[], 1, |x| Ok(x[0].asinh())),
        NumericFunc::new("acosh", &[], 1, |x| Ok(x[0].acosh())),
        NumericFunc::new("atanh", &[], 1, |x| Ok(x[0].atanh())),
        NumericFunc::new("degrees", &["deg", "todegrees"], 1, |x| {
            Ok(x[0] * 180.0 / PI)
        }),
        NumericFunc::new("radians", &["rad", "toradians"], 1, |x| {
            Ok(x[0] * PI / 180.0)
        }),
        NumericFunc::new("floor", &["int"], 1, |x| Ok(x[0].floor())),
        NumericFunc::new("ceil", &["ceiling"], 1, |x| Ok(x[0].ceil())),
        NumericFunc::new("round", &[], 1, |x| Ok(x[0].round())),
        NumericFunc::new("trunc", &["truncate"], 1, |x| Ok(x[0].trunc())),
        NumericFunc::new("frac", &["fract"], 1, |x| Ok(x[0].fract())),
        NumericFunc::new("fact", &["factorial"], 1, |x| factorial(x[0])),
        NumericFunc::new("sigmoid", &["logistic"], 1, |x| {
            Ok(1.0 / (1.0 + (-x[0]).exp()))
        }),
    ];

    let multi = [
        NumericFunc::new("atan2", &[], 2, |x| Ok(x[0].atan2(x[1]))),
        NumericFunc::new("hypot", &[], 2, |x| Ok(x[0].hypot(x[1]))),
        NumericFunc::new("logb", &["logbase"], 2, |x| Ok(x[0].log(x[1]))),
        NumericFunc::new("power", &["pow"], 2, |x| Ok(x[0].powf(x[1]))),
        NumericFunc::new("root", &["nthroot"], 2, |x| {
            Ok(x[0].powf(1.0 / nonzero(x[1])?))
        }),
        NumericFunc::new("roundto", &["roundn"], 2, |x| Ok(round_to(x[0], x[1]))),
        NumericFunc::new("truncto", &["truncn"], 2, |x| Ok(trunc_to(x[0], x[1]))),
        NumericFunc::new("signif", &["roundsig"], 2, |x| {
            Ok(round_significant(x[0], x[1].max(0.0) as u32))
        }),
        NumericFunc::new("quotient", &["idiv"], 2, |x| {
            Ok((x[0] / nonzero(x[1])?).trunc())
        }),
        NumericFunc::new("remainder", &["rem"], 2, |x| {
            let d = nonzero(x[1])?;
            Ok(x[0] - d * (x[0] / d).trunc())
        }),
        NumericFunc::new("gcd", &[], 2, |x| gcd(x[0], x[1])),
        NumericFunc::new("lcm", &[], 2, |x| lcm(x[0], x[1])),
        NumericFunc::new("combin", &["ncr", "choose"], 2, |x| choose(x[0], x[1])),
        NumericFunc::new("permut", &["npr"], 2, |x| permutations(x[0], x[1])),
        NumericFunc::new("greatest", &["max2"], 2, |x| Ok(x[0].max(x[1]))),
        NumericFunc::new("least", &["min2"], 2, |x| Ok(x[0].min(x[1]))),
        NumericFunc::new("copysign", &[], 2, |x| Ok(x[0].copysign(x[1]))),
        NumericFunc::new("fdim", &[], 2, |x| Ok((x[0] - x[1]).max(0.0))),
        NumericFunc::new("clamp", &[], 3, |x| {
            if x[1] > x[2] {
                return Err(ErrorCode::InvalidOperand);
            }
            Ok(x[0].clamp(x[1], x[2]))
        }),
        NumericFunc::new("lerp", &[], 3, |x| Ok(x[0] + (x[1] - x[0]) * x[2])),
        NumericFunc::new("fma", &["muladd"], 3, |x| Ok(x[0].mul_add(x[1], x[2]))),
    ];

    for op in unary.into_iter().chain(multi) {
        out.push(Arc::new(op));
    }
}
