//! Statistical operators.
//!
//! A stat operator consumes a reference (column, row, table, subset, or
//! cell) and reduces every value it spans to one number. Non-numeric cells
//! are skipped; the first error value encountered is propagated. A plain
//! scalar argument is treated as a one-element sample.

use std::sync::Arc;

use tabula_common::{DataType, ErrorCode, Value};

use crate::operator::{OpCaps, Operator, OperatorContext};
use crate::token::{Token, TokenType};

static REFERENCE: [DataType; 1] = [DataType::Reference];

/// The sample a stat operator reduces.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatInput {
    /// Numeric values, in table order.
    pub numbers: Vec<f64>,
    /// Cells holding any value.
    pub non_null: usize,
    /// Cells spanned, empty ones included.
    pub total: usize,
}

impl StatInput {
    pub fn from_values(values: &[Option<Value>]) -> Result<Self, ErrorCode> {
        let mut input = StatInput {
            total: values.len(),
            ..Default::default()
        };
        for v in values.iter().flatten() {
            input.non_null += 1;
            match v {
                Value::Number(n) => input.numbers.push(*n),
                Value::Error(e) => return Err(*e),
                _ => {}
            }
        }
        Ok(input)
    }

    pub fn from_numbers(numbers: Vec<f64>) -> Self {
        let n = numbers.len();
        Self {
            numbers,
            non_null: n,
            total: n,
        }
    }

    fn n(&self) -> f64 {
        self.numbers.len() as f64
    }

    fn sorted(&self) -> Vec<f64> {
        let mut v = self.numbers.clone();
        v.sort_by(f64::total_cmp);
        v
    }
}

#[derive(Debug)]
pub struct StatOp {
    label: &'static str,
    aliases: &'static [&'static str],
    f: fn(&StatInput) -> Option<f64>,
}

impl StatOp {
    pub const fn new(
        label: &'static str,
        aliases: &'static [&'static str],
        f: fn(&StatInput) -> Option<f64>,
    ) -> Self {
        Self { label, aliases, f }
    }

    fn gather(&self, arg: &Token, ctx: &dyn OperatorContext) -> Result<StatInput, ErrorCode> {
        match arg {
            Token::Reference(r) => StatInput::from_values(&ctx.values(r)?),
            Token::Null => Ok(StatInput {
                total: 1,
                ..Default::default()
            }),
            Token::Error(e) => Err(*e),
            Token::Operand(Value::Number(n)) | Token::Constant { value: Value::Number(n), .. } => {
                Ok(StatInput::from_numbers(vec![*n]))
            }
            _ => Err(ErrorCode::OperandDataTypeMismatch),
        }
    }
}

impl Operator for StatOp {
    fn label(&self) -> &str {
        self.label
    }

    fn aliases(&self) -> &[&'static str] {
        self.aliases
    }

    fn token_type(&self) -> TokenType {
        TokenType::StatOp
    }

    fn arg_types(&self) -> &[DataType] {
        &REFERENCE
    }

    fn result_type(&self) -> DataType {
        DataType::Number
    }

    fn caps(&self) -> OpCaps {
        OpCaps::PURE | OpCaps::ALLOW_NULLS
    }

    fn evaluate(&self, args: &[Token], ctx: &dyn OperatorContext) -> Token {
        match self.gather(&args[0], ctx) {
            Ok(input) => (self.f)(&input).map_or(Token::Error(ErrorCode::OperandRequired), Token::number),
            Err(e) => Token::Error(e),
        }
    }
}

/* ───────────────────────── reductions ───────────────────────── */

fn non_empty(s: &StatInput) -> Option<&[f64]> {
    (!s.numbers.is_empty()).then_some(s.numbers.as_slice())
}

fn sum(s: &StatInput) -> Option<f64> {
    Some(s.numbers.iter().sum())
}

fn mean(s: &StatInput) -> Option<f64> {
    non_empty(s).map(|v| v.iter().sum::<f64>() / v.len() as f64)
}

/// Sum of squared deviations from the mean.
fn squared_deviations(s: &StatInput) -> Option<f64> {
    let m = mean(s)?;
    Some(s.numbers.iter().map(|x| (x - m).powi(2)).sum())
}

fn variance(s: &StatInput) -> Option<f64> {
    (s.numbers.len() >= 2).then(|| squared_deviations(s).map(|d| d / (s.n() - 1.0)))?
}

fn population_variance(s: &StatInput) -> Option<f64> {
    squared_deviations(s).map(|d| d / s.n())
}

fn stdev(s: &StatInput) -> Option<f64> {
    variance(s).map(f64::sqrt)
}

fn population_stdev(s: &StatInput) -> Option<f64> {
    population_variance(s).map(f64::sqrt)
}

/// Linear interpolation between closest ranks, inclusive of both ends.
pub(crate) fn quantile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn median(s: &StatInput) -> Option<f64> {
    quantile(&s.sorted(), 0.5)
}

/// Most frequent value; ties go to the value seen first.
fn mode(s: &StatInput) -> Option<f64> {
    let mut best: Option<(f64, usize)> = None;
    for (i, x) in s.numbers.iter().enumerate() {
        if s.numbers[..i].contains(x) {
            continue;
        }
        let count = s.numbers[i..].iter().filter(|y| *y == x).count();
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((*x, count));
        }
    }
    best.map(|(x, _)| x)
}

fn min(s: &StatInput) -> Option<f64> {
    non_empty(s).map(|v| v.iter().copied().fold(f64::INFINITY, f64::min))
}

fn max(s: &StatInput) -> Option<f64> {
    non_empty(s).map(|v| v.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

fn skew(s: &StatInput) -> Option<f64> {
    let n = s.n();
    if n < 3.0 {
        return None;
    }
    let m = mean(s)?;
    let sd = stdev(s)?;
    let cubed: f64 = s.numbers.iter().map(|x| ((x - m) / sd).powi(3)).sum();
    Some(n / ((n - 1.0) * (n - 2.0)) * cubed)
}

/// Excess kurtosis with the sample correction.
fn kurtosis(s: &StatInput) -> Option<f64> {
    let n = s.n();
    if n < 4.0 {
        return None;
    }
    let m = mean(s)?;
    let sd = stdev(s)?;
    let fourth: f64 = s.numbers.iter().map(|x| ((x - m) / sd).powi(4)).sum();
    let lead = n * (n + 1.0) / ((n - 1.0) * (n - 2.0) * (n - 3.0));
    let tail = 3.0 * (n - 1.0).powi(2) / ((n - 2.0) * (n - 3.0));
    Some(lead * fourth - tail)
}

/// Non-positive inputs yield NaN, which the evaluator reports as an error.
fn geomean(s: &StatInput) -> Option<f64> {
    let v = non_empty(s)?;
    if v.iter().any(|x| *x <= 0.0) {
        return Some(f64::NAN);
    }
    Some((v.iter().map(|x| x.ln()).sum::<f64>() / v.len() as f64).exp())
}

fn harmean(s: &StatInput) -> Option<f64> {
    let v = non_empty(s)?;
    if v.iter().any(|x| *x <= 0.0) {
        return Some(f64::NAN);
    }
    Some(v.len() as f64 / v.iter().map(|x| 1.0 / x).sum::<f64>())
}

fn avedev(s: &StatInput) -> Option<f64> {
    let m = mean(s)?;
    Some(s.numbers.iter().map(|x| (x - m).abs()).sum::<f64>() / s.n())
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    let ops = [
        StatOp::new("sum", &["total"], sum),
        StatOp::new("mean", &["avg", "average"], mean),
        StatOp::new("median", &["med"], median),
        StatOp::new("mode", &[], mode),
        StatOp::new("min", &["minimum"], min),
        StatOp::new("max", &["maximum"], max),
        StatOp::new("count", &["n"], |s| Some(s.n())),
        StatOp::new("counta", &["countnonnull"], |s| Some(s.non_null as f64)),
        StatOp::new("countnull", &["countblank"], |s| {
            Some((s.total - s.non_null) as f64)
        }),
        StatOp::new("product", &["prod"], |s| {
            non_empty(s).map(|v| v.iter().product())
        }),
        StatOp::new("range", &["spread"], |s| Some(max(s)? - min(s)?)),
        StatOp::new("var", &["variance"], variance),
        StatOp::new("varp", &["pvar"], population_variance),
        StatOp::new("stdev", &["sd", "stddev"], stdev),
        StatOp::new("stdevp", &["psd", "pstdev"], population_stdev),
        StatOp::new("sumsq", &["sumofsquares"], |s| {
            Some(s.numbers.iter().map(|x| x * x).sum())
        }),
        StatOp::new("skew", &["skewness"], skew),
        StatOp::new("kurtosis", &["kurt"], kurtosis),
        StatOp::new("geomean", &[], geomean),
        StatOp::new("harmean", &[], harmean),
        StatOp::new("avedev", &["mad"], avedev),
        StatOp::new("first", &[], |s| s.numbers.first().copied()),
        StatOp::new("last", &[], |s| s.numbers.last().copied()),
        StatOp::new("q1", &["quartile1"], |s| quantile(&s.sorted(), 0.25)),
        StatOp::new("q3", &["quartile3"], |s| quantile(&s.sorted(), 0.75)),
        StatOp::new("iqr", &[], |s| {
            let sorted = s.sorted();
            Some(quantile(&sorted, 0.75)? - quantile(&sorted, 0.25)?)
        }),
        StatOp::new("cv", &[], |s| Some(stdev(s)? / mean(s)?)),
        StatOp::new("sem", &["stderr"], |s| Some(stdev(s)? / s.n().sqrt())),
    ];
    for op in ops {
        out.push(Arc::new(op));
    }
}
