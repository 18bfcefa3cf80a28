//! Argument and literal values flowing through query plans.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::{Error, FieldKind};

/// A bound argument or a keyset value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(BigDecimal),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    String(String),
    /// Query vector for similarity search.
    Vector(Vec<f32>),
    /// Inclusive bounds consumed by `Within`.
    Range(Box<Value>, Box<Value>),
    /// Collection argument consumed by `In` / `NotIn`.
    List(Vec<Value>),
}

impl Value {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Construct a range argument.
    #[must_use]
    pub fn range(lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Value::Range(Box::new(lower.into()), Box::new(upper.into()))
    }

    /// Scalar kind of this value, if it has one.
    #[must_use]
    pub fn kind(&self) -> Option<FieldKind> {
        Some(match self {
            Value::Bool(_) => FieldKind::Bool,
            Value::Number(_) => FieldKind::Decimal,
            Value::Uuid(_) => FieldKind::Uuid,
            Value::DateTime(_) => FieldKind::DateTimeUtc,
            Value::Date(_) => FieldKind::Date,
            Value::Time(_) => FieldKind::Time,
            Value::String(_) => FieldKind::String,
            Value::Vector(_) => FieldKind::Vector,
            Value::Null | Value::Range(..) | Value::List(_) => return None,
        })
    }

    /// Render a scalar value into the string form used by scroll tokens.
    ///
    /// # Errors
    /// Returns `Error::InvalidArgument` for composite values.
    pub fn to_key_string(&self) -> Result<String, Error> {
        Ok(match self {
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.normalized().to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::DateTime(dt) => dt.to_rfc3339(),
            Value::Date(d) => d.to_string(),
            Value::Time(t) => t.to_string(),
            Value::String(s) => s.clone(),
            Value::Null | Value::Vector(_) | Value::Range(..) | Value::List(_) => {
                return Err(Error::InvalidArgument(format!(
                    "{self} value cannot be used as a keyset key"
                )));
            }
        })
    }

    /// Parse a scroll token key back into a value of the given kind.
    ///
    /// # Errors
    /// Returns `Error::InvalidScrollPosition` if the text does not parse.
    pub fn parse_key(kind: FieldKind, s: &str) -> Result<Self, Error> {
        let bad = || Error::InvalidScrollPosition(format!("invalid {kind} key: {s}"));
        Ok(match kind {
            FieldKind::String => Value::String(s.to_owned()),
            FieldKind::I64 | FieldKind::F64 | FieldKind::Decimal => {
                Value::Number(BigDecimal::from_str(s).map_err(|_| bad())?)
            }
            FieldKind::Bool => Value::Bool(s.parse::<bool>().map_err(|_| bad())?),
            FieldKind::Uuid => Value::Uuid(s.parse::<Uuid>().map_err(|_| bad())?),
            FieldKind::DateTimeUtc => Value::DateTime(
                DateTime::parse_from_rfc3339(s)
                    .map_err(|_| bad())?
                    .with_timezone(&Utc),
            ),
            FieldKind::Date => Value::Date(s.parse::<NaiveDate>().map_err(|_| bad())?),
            FieldKind::Time => Value::Time(s.parse::<NaiveTime>().map_err(|_| bad())?),
            FieldKind::Vector => return Err(bad()),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(_) => write!(f, "bool"),
            Value::Number(_) => write!(f, "number"),
            Value::Uuid(_) => write!(f, "uuid"),
            Value::DateTime(_) => write!(f, "datetime"),
            Value::Date(_) => write!(f, "date"),
            Value::Time(_) => write!(f, "time"),
            Value::String(_) => write!(f, "string"),
            Value::Vector(_) => write!(f, "vector"),
            Value::Range(..) => write!(f, "range"),
            Value::List(_) => write!(f, "list"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Number(BigDecimal::from(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Number(BigDecimal::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
