use std::collections::HashMap;

use chrono::{self, LocalResult, TimeZone, Utc};
use lazy_static::lazy_static;
use log::warn;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::f64_to_i64_safe;

lazy_static! {
    static ref LOOSE_VERSION_PREFIX: Regex = Regex::new(r"^\d+(\.\d+)?(\.\d+)?").unwrap();
}

/// A JSON-like value. Context attributes, clause operands and flag variations all share this
/// representation.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string.
    String(String),
    /// An ordered list of values.
    Array(Vec<AttributeValue>),
    /// A number. JSON does not distinguish integers from floats, and neither do we.
    Number(f64),
    /// A boolean.
    Bool(bool),
    /// A string-keyed map of values.
    Object(HashMap<String, AttributeValue>),
    /// JSON null.
    Null,
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Number(i as f64)
    }
}

impl From<f64> for AttributeValue {
    fn from(f: f64) -> Self {
        AttributeValue::Number(f)
    }
}

impl<T> From<Vec<T>> for AttributeValue
where
    AttributeValue: From<T>,
{
    fn from(v: Vec<T>) -> Self {
        AttributeValue::Array(v.into_iter().map(AttributeValue::from).collect())
    }
}

impl From<&Value> for AttributeValue {
    fn from(v: &Value) -> Self {
        match v {
            Value::Null => AttributeValue::Null,
            Value::Bool(b) => AttributeValue::Bool(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => AttributeValue::Number(f),
                None => {
                    warn!("number {} is not representable as f64, keeping it as a string", n);
                    AttributeValue::String(n.to_string())
                }
            },
            Value::String(s) => AttributeValue::String(s.clone()),
            Value::Array(items) => items.iter().map(AttributeValue::from).collect(),
            Value::Object(map) => AttributeValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for AttributeValue {
    fn from(v: Value) -> Self {
        AttributeValue::from(&v)
    }
}

impl FromIterator<AttributeValue> for AttributeValue {
    fn from_iter<I: IntoIterator<Item = AttributeValue>>(iter: I) -> Self {
        AttributeValue::Array(iter.into_iter().collect())
    }
}

impl AttributeValue {
    /// Returns the string slice if this is a string. No conversion is attempted.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the number if this is a number. Numeric strings are not converted.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the boolean if this is a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    /// Interprets the value as a UTC timestamp. Numbers are Unix epoch milliseconds, strings must
    /// be RFC 3339 (e.g. `2016-04-16T17:09:12.759-07:00`).
    pub fn to_datetime(&self) -> Option<chrono::DateTime<Utc>> {
        match self {
            AttributeValue::Number(millis) => {
                let millis = f64_to_i64_safe(*millis)?;
                match Utc.timestamp_millis_opt(millis) {
                    LocalResult::Single(time) => Some(time),
                    _ => None,
                }
            }
            AttributeValue::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        }
    }

    /// Interprets a string value as a semantic version.
    ///
    /// Strict semver is tried first; failing that, a leading `major[.minor[.patch]]` has its
    /// missing components filled with zeros ("2" becomes "2.0.0", "2.1-rc" becomes "2.1.0-rc").
    /// Build metadata is discarded so that it never affects comparisons.
    pub fn to_semver(&self) -> Option<semver::Version> {
        let text = self.as_str()?;
        let mut version = semver::Version::parse(text)
            .ok()
            .or_else(|| parse_loose_semver(text))?;
        version.build = semver::BuildMetadata::EMPTY;
        Some(version)
    }

    /// The string form used as hash input when bucketing: strings as-is, integral numbers in
    /// decimal. Every other value is unbucketable.
    #[allow(clippy::float_cmp)]
    pub(crate) fn as_bucketable(&self) -> Option<String> {
        match self {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Number(f) => {
                f64_to_i64_safe(*f).and_then(|i| (i as f64 == *f).then(|| i.to_string()))
            }
            _ => None,
        }
    }

    /// Applies `p` to a scalar value, or to each element of an array, returning true on the
    /// first success. Null never satisfies the predicate.
    pub(crate) fn any<P>(&self, p: P) -> bool
    where
        P: Fn(&AttributeValue) -> bool,
    {
        match self {
            AttributeValue::Null => false,
            AttributeValue::Array(values) => values.iter().any(p),
            _ => p(self),
        }
    }
}

fn parse_loose_semver(text: &str) -> Option<semver::Version> {
    let captures = LOOSE_VERSION_PREFIX.captures(text)?;
    let numeric = captures.get(0)?;

    let mut padded = numeric.as_str().to_string();
    for group in 1..captures.len() {
        if captures.get(group).is_none() {
            padded.push_str(".0");
        }
    }
    padded.push_str(&text[numeric.end()..]);

    semver::Version::parse(&padded).ok()
}
