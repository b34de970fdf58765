//! Runtime values held by configuration variables.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A value of a configuration variable.
///
/// Deserialization is untagged: literals arrive as null, bool, int, double,
/// string or string list. Decimal and date values are produced by coercing
/// literals against the declared variable kind at model load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Unassigned (non-configurable variable without a default).
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    /// Selection of a `string_multi` variable.
    Multi(Vec<Arc<str>>),
    Decimal(Decimal),
    Date(NaiveDate),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn multi<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Value::Multi(items.into_iter().map(Into::into).collect())
    }

    /// Returns true if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for int, double and decimal values.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Double(_) | Value::Decimal(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Date(d) => Some(days_since_epoch(*d)),
            _ => None,
        }
    }

    /// Numeric view of the value. Dates count as their day number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Decimal(d) => d.to_f64(),
            Value::Date(d) => Some(days_since_epoch(*d) as f64),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Int(v) => Some(Decimal::from(*v)),
            Value::Double(v) => Decimal::from_f64(*v),
            Value::Decimal(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_multi(&self) -> Option<&[Arc<str>]> {
        match self {
            Value::Multi(items) => Some(items),
            _ => None,
        }
    }

    /// Short name of the value's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::Multi(_) => "string_multi",
            Value::Decimal(_) => "decimal",
            Value::Date(_) => "date",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Multi(a), Value::Multi(b)) => {
                // Selections are sets: order does not matter
                a.len() == b.len() && a.iter().all(|item| b.contains(item))
            }
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            // Cross-kind numbers are equal only when both denote the same number
            (Value::Int(i), Value::Double(d)) | (Value::Double(d), Value::Int(i)) => int_eq_double(*i, *d),
            (Value::Int(i), Value::Decimal(m)) | (Value::Decimal(m), Value::Int(i)) => Decimal::from(*i) == *m,
            (Value::Double(d), Value::Decimal(m)) | (Value::Decimal(m), Value::Double(d)) => {
                Decimal::from_f64(*d) == Some(*m)
            }
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Null => 0u8.hash(state),
            Value::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // Numbers that compare equal across kinds must hash equally
            Value::Int(_) | Value::Double(_) | Value::Decimal(_) => {
                2u8.hash(state);
                let normalized = self.as_f64().unwrap_or(0.0);
                if normalized == 0.0 {
                    0u64.hash(state);
                } else {
                    normalized.to_bits().hash(state);
                }
            }
            Value::Str(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Multi(items) => {
                4u8.hash(state);
                let mut sorted: Vec<&Arc<str>> = items.iter().collect();
                sorted.sort();
                for item in sorted {
                    item.hash(state);
                }
            }
            Value::Date(d) => {
                5u8.hash(state);
                d.hash(state);
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Decimal> for Value {
    fn from(v: Decimal) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Multi(items) => write!(f, "[{}]", items.join(", ")),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

/// Compares two values of compatible kinds.
///
/// Numbers compare across int/double/decimal. Returns `None` for
/// incomparable kinds and for `Null`.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Decimal(x), Value::Decimal(y)) => Some(x.cmp(y)),
        (Value::Decimal(_), Value::Int(_)) | (Value::Int(_), Value::Decimal(_)) => {
            Some(a.as_decimal()?.cmp(&b.as_decimal()?))
        }
        (x, y) if x.is_numeric() && y.is_numeric() => {
            let ordering = x.as_f64()?.partial_cmp(&y.as_f64()?)?;
            if ordering == Ordering::Equal && x != y {
                // Distinct numbers that round to the same double
                return Some(x.as_decimal()?.cmp(&y.as_decimal()?));
            }
            Some(ordering)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Parses an ISO `YYYY-MM-DD` date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// The date `days` after 1970-01-01; negative counts go back.
pub fn date_from_days(days: i64) -> Option<NaiveDate> {
    shift_date(NaiveDate::default(), days)
}

/// Days from 1970-01-01 to `date`.
pub fn days_since_epoch(date: NaiveDate) -> i64 {
    date.signed_duration_since(NaiveDate::default()).num_days()
}

/// Moves a date by a signed number of days, `None` when out of range.
pub fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

/// Exact equality of an integer and a double.
fn int_eq_double(int: i64, double: f64) -> bool {
    // i64::MAX is not representable, so the range check is exclusive
    const BOUND: f64 = 9_223_372_036_854_775_808.0;
    double.fract() == 0.0 && (-BOUND..BOUND).contains(&double) && double as i64 == int
}
