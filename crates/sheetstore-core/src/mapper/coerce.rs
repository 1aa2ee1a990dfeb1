//! Cell coercion into canonical column types

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::normalize_header;
use crate::schema::{ColumnType, Value};

/// Day zero of spreadsheet serial dates
const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

/// Largest serial accepted (9999-12-31)
const MAX_SERIAL: i64 = 2_958_465;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d", "%d-%m-%Y"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Outcome of coercing one cell
#[derive(Debug, Clone, PartialEq)]
pub enum Coerced {
    Value(Value),
    /// Nothing in the cell; the column default applies
    Blank,
    /// Unparseable; the null-marker applies and a warning is raised
    Invalid,
}

/// Number conventions of a sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberLocale {
    /// Either convention; a lone separator is the decimal point
    #[default]
    Neutral,
    /// `1.234,56`; a lone `.` before exactly three digits groups thousands
    PtBr,
}

impl NumberLocale {
    /// Cell text for a decimal in this convention
    pub fn render(self, value: Decimal) -> String {
        match self {
            NumberLocale::Neutral => value.to_string(),
            NumberLocale::PtBr => value.to_string().replace('.', ","),
        }
    }
}

pub fn coerce_cell(raw: &str, ty: ColumnType, locale: NumberLocale) -> Coerced {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Coerced::Blank;
    }
    let value = match ty {
        ColumnType::Text => Some(Value::Text(trimmed.to_string())),
        ColumnType::Integer => parse_decimal_in(trimmed, locale)
            .and_then(whole)
            .map(Value::Integer),
        ColumnType::Decimal => parse_decimal_in(trimmed, locale).map(Value::Decimal),
        ColumnType::Date => parse_date(trimmed).map(Value::Date),
        ColumnType::Enum(variants) => match_enum(trimmed, variants).map(Value::from),
    };
    value.map(Coerced::Value).unwrap_or(Coerced::Invalid)
}

/// Parses money in either `1.234,56` or `1,234.56` form
///
/// The last separator is the decimal point when both kinds appear. A separator
/// kind that repeats is a thousands separator. A single separator of either
/// kind is the decimal point.
pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    parse_decimal_in(raw, NumberLocale::Neutral)
}

/// [`parse_decimal`] under the conventions of `locale`
pub fn parse_decimal_in(raw: &str, locale: NumberLocale) -> Option<Decimal> {
    let mut s: String = raw
        .replace("R$", "")
        .replace('$', "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') && s.len() > 2 {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest.to_string();
    }
    if s.is_empty() {
        return None;
    }

    let value = if s.contains(|c: char| c == 'e' || c == 'E') {
        Decimal::from_scientific(&s).ok()?
    } else {
        if !s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
            return None;
        }
        Decimal::from_str(&canonical_number(&s, locale)?).ok()?
    };
    Some(if negative { -value } else { value })
}

/// Rewrites digits and separators into `1234.56` form
fn canonical_number(s: &str, locale: NumberLocale) -> Option<String> {
    let dots = s.matches('.').count();
    let commas = s.matches(',').count();

    let decimal_sep = match (dots, commas) {
        (0, 0) => None,
        (_, 0) if dots > 1 => None,
        (0, _) if commas > 1 => None,
        (1, 0) if locale == NumberLocale::PtBr && groups_thousands(s) => None,
        (1, 0) => Some('.'),
        (0, 1) => Some(','),
        _ => {
            let last = s.rfind(|c: char| c == '.' || c == ',')?;
            let sep = s[last..].chars().next()?;
            // The decimal separator may appear only once
            if s.matches(sep).count() > 1 {
                return None;
            }
            Some(sep)
        }
    };

    let out: String = s
        .chars()
        .filter_map(|c| match c {
            '.' | ',' if Some(c) == decimal_sep => Some('.'),
            '.' | ',' => None,
            d => Some(d),
        })
        .collect();
    if out.is_empty() || out == "." {
        None
    } else {
        Some(out)
    }
}

/// `1.500`: one to three digits, a dot, then exactly three digits
fn groups_thousands(s: &str) -> bool {
    match s.split_once('.') {
        Some((int, frac)) => (1..=3).contains(&int.len()) && frac.len() == 3,
        None => false,
    }
}

/// Whole numbers; `3.0` is accepted, `3.5` is not
pub fn parse_integer(raw: &str) -> Option<i64> {
    parse_decimal(raw).and_then(whole)
}

fn whole(d: Decimal) -> Option<i64> {
    if d.fract().is_zero() {
        d.to_i64()
    } else {
        None
    }
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    from_serial(s)
}

/// Spreadsheet serial day number, fractional part (time of day) ignored
fn from_serial(s: &str) -> Option<NaiveDate> {
    if !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let days = Decimal::from_str(s).ok()?.trunc().to_i64()?;
    if !(1..=MAX_SERIAL).contains(&days) {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_days(Days::new(days as u64))
}

/// Declared spelling of the variant matching `raw`
pub fn match_enum(raw: &str, variants: &'static [&'static str]) -> Option<&'static str> {
    let wanted = normalize_header(raw);
    variants
        .iter()
        .copied()
        .find(|v| normalize_header(v) == wanted)
}
