//! Partition transforms: pure functions from a column value to a partition
//! value. Determinism here is a hard interop requirement — every Iceberg
//! implementation must derive bit-identical partition values from the same
//! input, or readers will prune the wrong files.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

use chrono::{DateTime, Datelike};
use murmur3::murmur3_32;

use crate::value::{truncate_string_bound, Literal};
use crate::{Error, IcebergResult};

const MILLIS_PER_DAY: i64 = 86_400_000;
const MILLIS_PER_HOUR: i64 = 3_600_000;

/// A partition transform, parsed from and formatted to the grammar
/// `identity | year | month | day | hour | void | bucket[N] | truncate[W]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    Identity,
    Year,
    Month,
    Day,
    Hour,
    Void,
    Bucket(u32),
    Truncate(u32),
}

impl Transform {
    /// Applies the transform. `None` means a null partition value (always the
    /// case for `void`, and for null inputs).
    pub fn apply(&self, value: Option<&Literal>) -> IcebergResult<Option<Literal>> {
        let Some(value) = value else {
            return Ok(None);
        };
        let out = match self {
            Transform::Identity => Some(value.clone()),
            Transform::Void => None,
            Transform::Bucket(n) => Some(Literal::Int(bucket_hash(value, *n)?)),
            Transform::Truncate(w) => Some(truncate(value, *w)?),
            Transform::Year | Transform::Month | Transform::Day | Transform::Hour => {
                Some(Literal::Int(self.apply_temporal(value)?))
            }
        };
        Ok(out)
    }

    // Temporal transforms operate on the value coerced to a UTC instant in
    // epoch milliseconds.
    fn apply_temporal(&self, value: &Literal) -> IcebergResult<i32> {
        let millis = match value {
            Literal::Long(ms) => *ms,
            Literal::Int(days) => i64::from(*days) * MILLIS_PER_DAY,
            other => {
                return Err(Error::validation(format!(
                    "cannot apply {self} to non-temporal value {other:?}"
                )))
            }
        };
        let result = match self {
            Transform::Day => millis.div_euclid(MILLIS_PER_DAY),
            Transform::Hour => millis.div_euclid(MILLIS_PER_HOUR),
            Transform::Year | Transform::Month => {
                let utc = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                    Error::validation(format!("timestamp {millis}ms out of range for {self}"))
                })?;
                let years = i64::from(utc.year()) - 1970;
                match self {
                    Transform::Year => years,
                    _ => years * 12 + i64::from(utc.month0()),
                }
            }
            _ => unreachable!("apply_temporal called for {self}"),
        };
        i32::try_from(result)
            .map_err(|_| Error::validation(format!("{self} result {result} overflows i32")))
    }

    /// The suffix used when generating a default partition-field name
    /// (`{column}_{suffix}`).
    pub fn default_name_suffix(&self) -> &'static str {
        match self {
            Transform::Identity => "identity",
            Transform::Year => "year",
            Transform::Month => "month",
            Transform::Day => "day",
            Transform::Hour => "hour",
            Transform::Void => "null",
            Transform::Bucket(_) => "bucket",
            Transform::Truncate(_) => "trunc",
        }
    }

    /// The result type is `int` for every transform except identity (source
    /// type) and truncate (source type). Used when generating manifest
    /// partition schemas.
    pub fn preserves_source_type(&self) -> bool {
        matches!(self, Transform::Identity | Transform::Truncate(_))
    }
}

/// `((murmur3_32(bytes, seed 0) mod n) + n) mod n`, over the value's
/// canonical 8-byte-widened little-endian encoding. Must stay bit-for-bit
/// identical to the Java and Python implementations.
fn bucket_hash(value: &Literal, n: u32) -> IcebergResult<i32> {
    if n == 0 {
        return Err(Error::validation("bucket width must be positive"));
    }
    let bytes = value.to_hash_bytes();
    let hash = murmur3_32(&mut Cursor::new(bytes), 0)
        .map_err(|e| Error::generic(format!("murmur3 over in-memory buffer failed: {e}")))?
        as i32;
    let n = n as i32;
    Ok(((hash % n) + n) % n)
}

fn truncate(value: &Literal, width: u32) -> IcebergResult<Literal> {
    if width == 0 {
        return Err(Error::validation("truncate width must be positive"));
    }
    let out = match value {
        Literal::Int(v) => Literal::Int(v - v.rem_euclid(width as i32)),
        Literal::Long(v) => Literal::Long(v - v.rem_euclid(i64::from(width))),
        Literal::String(s) => Literal::String(truncate_string_bound(s, width as usize).to_string()),
        Literal::Binary(b) => Literal::Binary(b[..b.len().min(width as usize)].to_vec()),
        other => {
            return Err(Error::validation(format!(
                "cannot truncate value {other:?}"
            )))
        }
    };
    Ok(out)
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
        }
    }
}

impl FromStr for Transform {
    type Err = Error;

    fn from_str(s: &str) -> IcebergResult<Self> {
        let t = match s {
            "identity" => Transform::Identity,
            "year" => Transform::Year,
            "month" => Transform::Month,
            "day" => Transform::Day,
            "hour" => Transform::Hour,
            "void" => Transform::Void,
            // bucket/truncate without an argument is malformed, not defaulted
            "bucket" | "truncate" => {
                return Err(Error::validation(format!(
                    "transform '{s}' requires an argument, e.g. '{s}[16]'"
                )))
            }
            other => {
                let (name, arg) = other
                    .split_once('[')
                    .and_then(|(name, rest)| Some((name, rest.strip_suffix(']')?)))
                    .ok_or_else(|| {
                        Error::validation(format!("unparseable transform spec '{other}'"))
                    })?;
                let arg: u32 = arg.parse().map_err(|_| {
                    Error::validation(format!("non-integer transform argument in '{other}'"))
                })?;
                if arg == 0 {
                    return Err(Error::validation(format!(
                        "transform argument must be positive in '{other}'"
                    )));
                }
                match name {
                    "bucket" => Transform::Bucket(arg),
                    "truncate" => Transform::Truncate(arg),
                    _ => {
                        return Err(Error::validation(format!(
                            "unknown transform '{name}' in '{other}'"
                        )))
                    }
                }
            }
        };
        Ok(t)
    }
}

impl serde::Serialize for Transform {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Transform {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::Deserialize as _;
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
