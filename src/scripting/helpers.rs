//! Built-in helper functions available to every script
//!
//! Pure helpers only; functions that talk to the owning step are registered
//! in `engine.rs` next to the step context they read.

use crate::scripting::value::{BigNumber, ScriptDate, Undefined};
use crate::types::Value;
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta};
use num_traits::{FromPrimitive, ToPrimitive, Zero};
use rhai::{Dynamic, Engine, EvalAltResult};

type RhaiResult<T> = std::result::Result<T, Box<EvalAltResult>>;

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Cap on strings built by `fill_string`, `lpad` and `rpad` when the engine
/// has no `max_string_size`
const DEFAULT_MAX_BUILT_STRING: usize = 16 * 1024 * 1024;

/// Registers all helper functions in the Rhai engine.
///
/// `max_string_size` bounds the strings the padding helpers build (0 keeps
/// the default cap).
pub fn register_helpers(engine: &mut Engine, max_string_size: usize) {
    let limit = if max_string_size == 0 {
        DEFAULT_MAX_BUILT_STRING
    } else {
        max_string_size
    };
    register_undefined(engine);
    register_string_functions(engine, limit);
    register_date_functions(engine);
    register_big_number_functions(engine);
}

fn register_undefined(engine: &mut Engine) {
    engine.register_type_with_name::<Undefined>("undefined");
    engine.register_fn("to_string", |_: &mut Undefined| "undefined".to_string());
    engine.register_fn("to_debug", |_: &mut Undefined| "undefined".to_string());
    engine.register_fn("is_undefined", |value: Dynamic| value.is::<Undefined>());
    engine.register_fn("is_null", |value: Dynamic| {
        value.is_unit() || value.is::<Undefined>()
    });
}

fn register_string_functions(engine: &mut Engine, limit: usize) {
    engine.register_fn("upper", |s: &str| s.to_uppercase());
    engine.register_fn("lower", |s: &str| s.to_lowercase());
    engine.register_fn("ltrim", |s: &str| s.trim_start().to_string());
    engine.register_fn("rtrim", |s: &str| s.trim_end().to_string());

    // lpad("7", 3, "0") == "007"
    engine.register_fn("lpad", move |s: &str, len: i64, pad: &str| -> RhaiResult<String> {
        let fill = padding(s, len, pad, limit)?;
        Ok(format!("{}{}", fill, s))
    });
    engine.register_fn("rpad", move |s: &str, len: i64, pad: &str| -> RhaiResult<String> {
        let fill = padding(s, len, pad, limit)?;
        Ok(format!("{}{}", s, fill))
    });

    engine.register_fn("fill_string", move |s: &str, count: i64| -> RhaiResult<String> {
        let count = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
        match s.len().checked_mul(count) {
            Some(total) if total <= limit => Ok(s.repeat(count)),
            _ => Err(format!("fill_string result exceeds the string size limit {}", limit).into()),
        }
    });

    engine.register_fn("is_num", |s: &str| s.trim().parse::<f64>().is_ok());

    engine.register_fn("str2num", |s: &str| -> RhaiResult<f64> {
        s.trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s).into())
    });

    engine.register_fn("num2str", |n: f64| n.to_string());
    engine.register_fn("num2str", |n: i64| n.to_string());
    engine.register_fn("num2str", |n: f64, decimals: i64| {
        format!("{:.*}", decimals.clamp(0, 17) as usize, n)
    });

    engine.register_fn("get_digits_only", |s: &str| -> String {
        s.chars().filter(|c| c.is_ascii_digit()).collect()
    });

    engine.register_fn("luhn_check", |s: &str| luhn_check(s));
}

/// Characters needed to pad `s` to `len` characters using `pad` cyclically
fn padding(s: &str, len: i64, pad: &str, limit: usize) -> RhaiResult<String> {
    let current = s.chars().count();
    let target = usize::try_from(len).unwrap_or(0);
    if pad.is_empty() || target <= current {
        return Ok(String::new());
    }
    if target > limit {
        return Err(format!("padded length {} exceeds the string size limit {}", len, limit).into());
    }
    Ok(pad.chars().cycle().take(target - current).collect())
}

fn luhn_check(s: &str) -> bool {
    let digits: Vec<u32> = s
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(10))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default();
    if digits.len() < 2 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn register_date_functions(engine: &mut Engine) {
    engine.register_type_with_name::<ScriptDate>("Date");

    engine.register_get("year", |d: &mut ScriptDate| d.year());
    engine.register_get("month", |d: &mut ScriptDate| d.month());
    engine.register_get("day", |d: &mut ScriptDate| d.day());
    engine.register_get("hour", |d: &mut ScriptDate| d.hour());
    engine.register_get("minute", |d: &mut ScriptDate| d.minute());
    engine.register_get("second", |d: &mut ScriptDate| d.second());
    engine.register_get("millis", |d: &mut ScriptDate| d.millis());

    engine.register_fn("year", |d: ScriptDate| d.year());
    engine.register_fn("month", |d: ScriptDate| d.month());
    engine.register_fn("day", |d: ScriptDate| d.day());
    engine.register_fn("quarter", |d: ScriptDate| (d.month() - 1) / 3 + 1);
    engine.register_fn("week", |d: ScriptDate| {
        d.naive().map(|ts| ts.iso_week().week() as i64).unwrap_or(0)
    });

    engine.register_fn("now", || {
        ScriptDate::from_naive(chrono::Utc::now().naive_utc())
    });
    engine.register_fn("date_from_millis", ScriptDate::from_millis);
    engine.register_fn("date", |y: i64, m: i64, d: i64| -> RhaiResult<ScriptDate> {
        let day = i32::try_from(y)
            .ok()
            .zip(u32::try_from(m).ok().zip(u32::try_from(d).ok()))
            .and_then(|(y, (m, d))| NaiveDate::from_ymd_opt(y, m, d))
            .and_then(|day| day.and_hms_opt(0, 0, 0))
            .ok_or_else(|| format!("invalid date {}-{}-{}", y, m, d))?;
        Ok(ScriptDate::from_naive(day))
    });

    engine.register_fn("date_add", date_add);
    engine.register_fn("date_diff", date_diff);

    engine.register_fn("date2str", |d: ScriptDate| d.to_string());
    engine.register_fn("date2str", |d: ScriptDate, fmt: &str| -> RhaiResult<String> {
        let ts = d.naive().ok_or("date out of range")?;
        let items: Vec<Item> = StrftimeItems::new(fmt).collect();
        if items.iter().any(|i| matches!(i, Item::Error)) {
            return Err(format!("invalid date format '{}'", fmt).into());
        }
        Ok(ts.format_with_items(items.into_iter()).to_string())
    });

    engine.register_fn("str2date", |s: &str| -> RhaiResult<ScriptDate> {
        Value::parse_date(s)
            .map(ScriptDate::from_millis)
            .ok_or_else(|| format!("'{}' is not a date", s).into())
    });
    engine.register_fn("str2date", |s: &str, fmt: &str| -> RhaiResult<ScriptDate> {
        NaiveDateTime::parse_from_str(s.trim(), fmt)
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(s.trim(), fmt)
                    .ok()
                    .and_then(|day| day.and_hms_opt(0, 0, 0))
            })
            .map(ScriptDate::from_naive)
            .ok_or_else(|| format!("'{}' does not match date format '{}'", s, fmt).into())
    });

    engine.register_fn("to_string", |d: &mut ScriptDate| d.to_string());
    engine.register_fn("to_debug", |d: &mut ScriptDate| format!("Date({})", d));

    engine.register_fn("==", |a: ScriptDate, b: ScriptDate| a == b);
    engine.register_fn("!=", |a: ScriptDate, b: ScriptDate| a != b);
    engine.register_fn("<", |a: ScriptDate, b: ScriptDate| a < b);
    engine.register_fn("<=", |a: ScriptDate, b: ScriptDate| a <= b);
    engine.register_fn(">", |a: ScriptDate, b: ScriptDate| a > b);
    engine.register_fn(">=", |a: ScriptDate, b: ScriptDate| a >= b);
    engine.register_fn("-", |a: ScriptDate, b: ScriptDate| -> RhaiResult<i64> {
        a.millis()
            .checked_sub(b.millis())
            .ok_or_else(|| "date arithmetic overflow".into())
    });
}

/// Shift a date by `amount` units (`y`, `m`, `w`, `d`, `hh`, `mi`, `ss`, `ms`)
fn date_add(date: ScriptDate, unit: &str, amount: i64) -> RhaiResult<ScriptDate> {
    let ts = date.naive().ok_or("date out of range")?;
    let shifted = match unit.to_ascii_lowercase().as_str() {
        "y" | "year" => amount.checked_mul(12).and_then(|m| shift_months(ts, m)),
        "m" | "month" => shift_months(ts, amount),
        "w" | "week" => TimeDelta::try_weeks(amount).and_then(|d| ts.checked_add_signed(d)),
        "d" | "day" => TimeDelta::try_days(amount).and_then(|d| ts.checked_add_signed(d)),
        "hh" | "hour" => TimeDelta::try_hours(amount).and_then(|d| ts.checked_add_signed(d)),
        "mi" | "minute" => TimeDelta::try_minutes(amount).and_then(|d| ts.checked_add_signed(d)),
        "ss" | "second" => TimeDelta::try_seconds(amount).and_then(|d| ts.checked_add_signed(d)),
        "ms" => TimeDelta::try_milliseconds(amount).and_then(|d| ts.checked_add_signed(d)),
        other => return Err(format!("unknown date unit '{}'", other).into()),
    };
    shifted
        .map(ScriptDate::from_naive)
        .ok_or_else(|| "date arithmetic overflow".into())
}

fn shift_months(ts: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let magnitude = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        ts.checked_add_months(magnitude)
    } else {
        ts.checked_sub_months(magnitude)
    }
}

/// `to - from` expressed in whole units
fn date_diff(from: ScriptDate, to: ScriptDate, unit: &str) -> RhaiResult<i64> {
    let diff = to
        .millis()
        .checked_sub(from.millis())
        .ok_or("date arithmetic overflow")?;
    let result = match unit.to_ascii_lowercase().as_str() {
        "ms" => diff,
        "ss" | "second" => diff / 1_000,
        "mi" | "minute" => diff / 60_000,
        "hh" | "hour" => diff / 3_600_000,
        "d" | "day" => diff / MILLIS_PER_DAY,
        "w" | "week" => diff / (7 * MILLIS_PER_DAY),
        "m" | "month" => (to.year() * 12 + to.month()) - (from.year() * 12 + from.month()),
        "y" | "year" => to.year() - from.year(),
        other => return Err(format!("unknown date unit '{}'", other).into()),
    };
    Ok(result)
}

fn big_from_float(f: f64) -> RhaiResult<BigDecimal> {
    BigDecimal::from_f64(f).ok_or_else(|| format!("{} is not a finite number", f).into())
}

macro_rules! big_number_op {
    ($engine:ident, $op:tt) => {
        $engine.register_fn(stringify!($op), |a: BigNumber, b: BigNumber| {
            BigNumber(a.0 $op b.0)
        });
        $engine.register_fn(stringify!($op), |a: BigNumber, b: i64| {
            BigNumber(a.0 $op BigDecimal::from(b))
        });
        $engine.register_fn(stringify!($op), |a: i64, b: BigNumber| {
            BigNumber(BigDecimal::from(a) $op b.0)
        });
        $engine.register_fn(stringify!($op), |a: BigNumber, b: f64| -> RhaiResult<BigNumber> {
            Ok(BigNumber(a.0 $op big_from_float(b)?))
        });
    };
}

fn register_big_number_functions(engine: &mut Engine) {
    engine.register_type_with_name::<BigNumber>("BigNumber");

    engine.register_fn("big_number", |s: &str| -> RhaiResult<BigNumber> {
        Value::parse_big_number(s)
            .map(BigNumber)
            .ok_or_else(|| format!("'{}' is not a number", s).into())
    });
    engine.register_fn("big_number", |i: i64| BigNumber(BigDecimal::from(i)));
    engine.register_fn("big_number", |f: f64| -> RhaiResult<BigNumber> {
        big_from_float(f).map(BigNumber)
    });

    big_number_op!(engine, +);
    big_number_op!(engine, -);
    big_number_op!(engine, *);

    engine.register_fn("/", |a: BigNumber, b: BigNumber| -> RhaiResult<BigNumber> {
        if b.0.is_zero() {
            return Err("division by zero".into());
        }
        Ok(BigNumber(a.0 / b.0))
    });
    engine.register_fn("-", |a: BigNumber| BigNumber(-a.0));

    engine.register_fn("==", |a: BigNumber, b: BigNumber| a == b);
    engine.register_fn("!=", |a: BigNumber, b: BigNumber| a != b);
    engine.register_fn("<", |a: BigNumber, b: BigNumber| a < b);
    engine.register_fn("<=", |a: BigNumber, b: BigNumber| a <= b);
    engine.register_fn(">", |a: BigNumber, b: BigNumber| a > b);
    engine.register_fn(">=", |a: BigNumber, b: BigNumber| a >= b);

    engine.register_fn("round", |a: BigNumber, scale: i64| {
        BigNumber(a.0.with_scale_round(scale, RoundingMode::HalfUp))
    });
    engine.register_fn("to_float", |a: BigNumber| a.0.to_f64().unwrap_or(f64::NAN));
    engine.register_fn("to_int", |a: BigNumber| -> RhaiResult<i64> {
        a.0.to_i64()
            .ok_or_else(|| format!("{} does not fit an integer", a.0).into())
    });
    engine.register_fn("to_string", |a: &mut BigNumber| a.to_string());
    engine.register_fn("to_debug", |a: &mut BigNumber| format!("BigNumber({})", a));
}
