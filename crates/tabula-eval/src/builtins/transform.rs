//! Transform operators.
//!
//! A transform maps the whole series a reference spans to a new series of
//! the same length and yields the element at the current evaluation
//! position, so `cumsum(col 1)` in a column derivation produces a running
//! total down the rows. Non-numeric cells are gaps in the series.

use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use crate::operator::{OpCaps, Operator, OperatorContext, reference_arg};
use crate::token::{Token, TokenType};

static REFERENCE: [DataType; 1] = [DataType::Reference];

pub type Series = [Option<f64>];

#[derive(Debug)]
pub struct TransformOp {
    label: &'static str,
    aliases: &'static [&'static str],
    f: fn(&Series) -> Vec<Option<f64>>,
}

impl TransformOp {
    pub const fn new(
        label: &'static str,
        aliases: &'static [&'static str],
        f: fn(&Series) -> Vec<Option<f64>>,
    ) -> Self {
        Self { label, aliases, f }
    }
}

fn series(values: &[Option<Value>]) -> Result<Vec<Option<f64>>, ErrorCode> {
    values
        .iter()
        .map(|v| match v {
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(Value::Error(e)) => Err(*e),
            _ => Ok(None),
        })
        .collect()
}

impl Operator for TransformOp {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        TokenType::TransformOp
    }

    fn arg_types(&self) -> &[DataType] {
        &REFERENCE
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn caps(&self) -> OpCaps {
        OpCaps::PURE
    }

    fn evaluate(&self, args: &[Token], ctx: &dyn OperatorContext) -> Token {
        let result = reference_arg(&args[0]).and_then(|r| {
            let position = ctx.position(&r).ok_or(ErrorCode::InvalidTableOperand)?;
            let input = series(&ctx.values(&r)?)?;
            Ok((self.f)(&input).get(position).copied().flatten())
        });
        match result {
            Ok(Some(n)) => Token::number(n),
            Ok(None) => Token::Null,
            Err(e) => Token::Error(e),
        }
    }
}

/* ───────────────────────── series maps ───────────────────────── */

fn present(s: &Series) -> impl Iterator<Item = f64> + '_ {
    s.iter().flatten().copied()
}

/// Running fold; gaps keep their place and do not reset the accumulator.
fn running(s: &Series, init: f64, step: fn(f64, f64) -> f64) -> Vec<Option<f64>> {
    let mut acc = init;
    s.iter()
        .map(|x| {
            x.map(|x| {
                acc = step(acc, x);
                acc
            })
        })
        .collect()
}

fn cummean(s: &Series) -> Vec<Option<f64>> {
    let mut total = 0.0;
    let mut count = 0.0;
    s.iter()
        .map(|x| {
            x.map(|x| {
                total += x;
                count += 1.0;
                total / count
            })
        })
        .collect()
}

fn normalize(s: &Series) -> Vec<Option<f64>> {
    let total: f64 = present(s).sum();
    s.iter().map(|x| x.map(|x| x / total)).collect()
}

fn sample_stats(s: &Series) -> Option<(f64, f64)> {
    let values: Vec<f64> = present(s).collect();
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

fn zscore(s: &Series) -> Vec<Option<f64>> {
    match sample_stats(s) {
        Some((mean, sd)) => s.iter().map(|x| x.map(|x| (x - mean) / sd)).collect(),
        None => vec![None; s.len()],
    }
}

fn demean(s: &Series) -> Vec<Option<f64>> {
    let values: Vec<f64> = present(s).collect();
    if values.is_empty() {
        return vec![None; s.len()];
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    s.iter().map(|x| x.map(|x| x - mean)).collect()
}

/// Descending rank; ties share the best rank.
fn rank(s: &Series) -> Vec<Option<f64>> {
    s.iter()
        .map(|x| x.map(|x| 1.0 + present(s).filter(|y| *y > x).count() as f64))
        .collect()
}

/// Share of the other values strictly below this one.
fn percent_rank(s: &Series) -> Vec<Option<f64>> {
    let n = present(s).count();
    s.iter()
        .map(|x| {
            x.map(|x| {
                if n < 2 {
                    0.0
                } else {
                    present(s).filter(|y| *y < x).count() as f64 / (n - 1) as f64
                }
            })
        })
        .collect()
}

fn scale(s: &Series) -> Vec<Option<f64>> {
    let lo = present(s).fold(f64::INFINITY, f64::min);
    let hi = present(s).fold(f64::NEG_INFINITY, f64::max);
    s.iter().map(|x| x.map(|x| (x - lo) / (hi - lo))).collect()
}

/// Pairwise with the previous cell; the first cell and cells after a gap have none.
fn pairwise(s: &Series, f: fn(f64, f64) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; s.len()];
    for i in 1..s.len() {
        if let (Some(prev), Some(cur)) = (s[i - 1], s[i]) {
            out[i] = Some(f(prev, cur));
        }
    }
    out
}

fn lag(s: &Series) -> Vec<Option<f64>> {
    std::iter::once(None).chain(s.iter().copied()).take(s.len()).collect()
}

fn lead(s: &Series) -> Vec<Option<f64>> {
    s.iter().copied().skip(1).chain(std::iter::once(None)).collect()
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let ops = [
        TransformOp::new("cumsum", &["runningsum", "runningtotal"], |s| {
            running(s, 0.0, |a, x| a + x)
        }),
        TransformOp::new("cumprod", &["runningproduct"], |s| running(s, 1.0, |a, x| a * x)),
        TransformOp::new("cummax", &["runningmax"], |s| {
            running(s, f64::NEG_INFINITY, f64::max)
        }),
        TransformOp::new("cummin", &["runningmin"], |s| running(s, f64::INFINITY, f64::min)),
        TransformOp::new("cummean", &["runningmean", "runningavg"], cummean),
        TransformOp::new("normalize", &["share"], normalize),
        TransformOp::new("zscore", &["standardize"], zscore),
        TransformOp::new("demean", &["center"], demean),
        TransformOp::new("rank", &[], rank),
        TransformOp::new("pctrank", &["percentrank"], percent_rank),
        TransformOp::new("scale", &["minmax", "rescale"], scale),
        TransformOp::new("delta", &["diff"], |s| pairwise(s, |prev, cur| cur - prev)),
        TransformOp::new("pctchange", &["growth"], |s| {
            pairwise(s, |prev, cur| cur / prev - 1.0)
        }),
        TransformOp::new("lag", &["previous"], lag),
        TransformOp::new("lead", &["next"], lead),
    ];
    for op in ops {
        out.push(Arc::new(op));
    }
}
