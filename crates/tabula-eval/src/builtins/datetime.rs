//! Date and time functions.
//!
//! Instants are numbers of seconds since the Unix epoch, UTC.

use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use tabula_common::{DataType, ErrorCode};

use super::utils::NumericFunc;
use crate::operator::{OpCaps, Operator, OperatorContext};
use crate::token::{Token, TokenType};

const SECONDS_PER_DAY: f64 = 86_400.0;

fn instant(t: f64) -> Result<DateTime<Utc>, ErrorCode> {
    if !t.is_finite() {
        return Err(ErrorCode::InvalidOperand);
    }
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9) as u32;
    DateTime::from_timestamp(secs as i64, nanos).ok_or(ErrorCode::InvalidOperand)
}

fn timestamp(dt: DateTime<Utc>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1e9
}

fn midnight(date: NaiveDate) -> Result<f64, ErrorCode> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp() as f64)
        .ok_or(ErrorCode::InvalidOperand)
}

fn date(y: f64, m: f64, d: f64) -> Result<f64, ErrorCode> {
    let (m, d) = (
        u32::try_from(m as i64).map_err(|_| ErrorCode::InvalidOperand)?,
        u32::try_from(d as i64).map_err(|_| ErrorCode::InvalidOperand)?,
    );
    let date = NaiveDate::from_ymd_opt(y as i32, m, d).ok_or(ErrorCode::InvalidOperand)?;
    midnight(date)
}

/// `now()` and `today()`; read the evaluation clock, so they are volatile.
#[derive(Debug)]
pub struct Clock {
    label: &'static str,
    date_only: bool,
}

impl Operator for Clock {
    fn label(&self) -> &str {
        self.label
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

    fn evaluate(&self, _args: &[Token], ctx: &dyn OperatorContext) -> Token {
        let now = ctx.now();
        if self.date_only {
            midnight(now.date_naive()).map_or_else(Token::Error, Token::number)
        } else {
            Token::number(timestamp(now))
        }
    }
}

pub(super) fn operators(out: &mut Vec<Arc<dyn Operator>>) {
    out.push(Arc::new(Clock {
        label: "now",
        date_only: false,
    }));
    out.push(Arc::new(Clock {
        label: "today",
        date_only: true,
    }));

    let parts = [
        NumericFunc::new("year", &[], 1, |t| Ok(instant(t[0])?.year() as f64)),
        NumericFunc::new("month", &[], 1, |t| Ok(instant(t[0])?.month() as f64)),
        NumericFunc::new("day", &[], 1, |t| Ok(instant(t[0])?.day() as f64)),
        NumericFunc::new("hour", &[], 1, |t| Ok(instant(t[0])?.hour() as f64)),
        NumericFunc::new("minute", &[], 1, |t| Ok(instant(t[0])?.minute() as f64)),
        NumericFunc::new("second", &[], 1, |t| Ok(instant(t[0])?.second() as f64)),
        // Monday = 1
        NumericFunc::new("weekday", &["dayofweek"], 1, |t| {
            Ok(instant(t[0])?.weekday().number_from_monday() as f64)
        }),
        NumericFunc::new("dayofyear", &["yearday"], 1, |t| Ok(instant(t[0])?.ordinal() as f64)),
        NumericFunc::new("date", &["makedate"], 3, |a| date(a[0], a[1], a[2])),
        NumericFunc::new("time", &["maketime"], 3, |a| {
            Ok(a[0] * 3600.0 + a[1] * 60.0 + a[2])
        }),
        NumericFunc::new("days", &["datediff"], 2, |a| Ok((a[1] - a[0]) / SECONDS_PER_DAY)),
        NumericFunc::new("adddays", &[], 2, |a| Ok(a[0] + a[1] * SECONDS_PER_DAY)),
    ];
    for op in parts {
        out.push(Arc::new(op));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_round_trip_through_epoch_seconds() {
        let t = date(2024.0, 2.0, 29.0).unwrap();
        assert_eq!(t, 1_709_164_800.0);
        let dt = instant(t + 3_723.0).unwrap();
        assert_eq!((dt.year(), dt.month(), dt.day()), (2024, 2, 29));
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (1, 2, 3));
        assert_eq!(date(2023.0, 2.0, 29.0), Err(ErrorCode::InvalidOperand));
    }
}
