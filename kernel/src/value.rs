//! Typed single values ([`Literal`]) and their canonical byte encodings.
//!
//! Two encodings matter for cross-implementation compatibility:
//!
//! * the *bound* form used for statistics lower/upper bounds — fixed-width
//!   little-endian for numerics and temporals, raw bytes for strings/binary;
//! * the *hash* form fed to the bucket transform — identical except that all
//!   integer-family values widen to 8 bytes so that `bucket(34i32)` and
//!   `bucket(34i64)` agree across engines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::PrimitiveType;
use crate::{Error, IcebergResult};

/// A single typed value: a partition value, a transform input, or a
/// statistics bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Uuid(Uuid),
    Binary(Vec<u8>),
}

impl Literal {
    /// Days since the Unix epoch.
    pub fn date(days: i32) -> Self {
        Literal::Int(days)
    }

    /// Microseconds since the Unix epoch, matching Iceberg's timestamp unit.
    pub fn timestamp_micros(micros: i64) -> Self {
        Literal::Long(micros)
    }

    /// The fixed-width (or raw) byte form used for statistics bounds.
    pub fn to_bound_bytes(&self) -> Vec<u8> {
        match self {
            Literal::Boolean(b) => vec![u8::from(*b)],
            Literal::Int(v) => v.to_le_bytes().to_vec(),
            Literal::Long(v) => v.to_le_bytes().to_vec(),
            Literal::Float(v) => v.to_le_bytes().to_vec(),
            Literal::Double(v) => v.to_le_bytes().to_vec(),
            Literal::String(s) => s.as_bytes().to_vec(),
            Literal::Uuid(u) => u.as_bytes().to_vec(),
            Literal::Binary(b) => b.clone(),
        }
    }

    /// The byte form hashed by the bucket transform. Integer-family values
    /// widen to 8-byte little-endian; everything else matches the bound form.
    pub fn to_hash_bytes(&self) -> Vec<u8> {
        match self {
            Literal::Int(v) => (*v as i64).to_le_bytes().to_vec(),
            Literal::Float(v) => (*v as f64).to_le_bytes().to_vec(),
            other => other.to_bound_bytes(),
        }
    }

    /// Renders the value the way it appears in a Hive-style partition path
    /// segment.
    pub fn to_path_string(&self) -> String {
        match self {
            Literal::Boolean(b) => b.to_string(),
            Literal::Int(v) => v.to_string(),
            Literal::Long(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
            Literal::Double(v) => v.to_string(),
            Literal::String(s) => s.clone(),
            Literal::Uuid(u) => u.to_string(),
            Literal::Binary(b) => b.iter().map(|x| format!("{x:02x}")).collect(),
        }
    }

    /// Parses a partition-path segment back to a value, preferring the
    /// narrowest numeric reading before falling back to a string.
    pub fn from_path_string(s: &str) -> Literal {
        if let Ok(v) = s.parse::<i64>() {
            return Literal::Long(v);
        }
        if let Ok(v) = s.parse::<f64>() {
            return Literal::Double(v);
        }
        match s {
            "true" => Literal::Boolean(true),
            "false" => Literal::Boolean(false),
            _ => Literal::String(s.to_string()),
        }
    }

    /// Decodes a statistics bound back to a typed value given its column
    /// type. The inverse of [`Self::to_bound_bytes`].
    pub fn from_bound_bytes(bytes: &[u8], ty: &PrimitiveType) -> IcebergResult<Literal> {
        fn fixed<const N: usize>(bytes: &[u8], what: &str) -> IcebergResult<[u8; N]> {
            bytes
                .try_into()
                .map_err(|_| Error::codec(format!("{what} bound must be {N} bytes")))
        }
        let lit = match ty {
            PrimitiveType::Boolean => {
                Literal::Boolean(*bytes.first().ok_or_else(|| Error::codec("empty bound"))? != 0)
            }
            PrimitiveType::Int | PrimitiveType::Date => {
                Literal::Int(i32::from_le_bytes(fixed(bytes, "int")?))
            }
            PrimitiveType::Long
            | PrimitiveType::Time
            | PrimitiveType::Timestamp
            | PrimitiveType::Timestamptz => Literal::Long(i64::from_le_bytes(fixed(bytes, "long")?)),
            PrimitiveType::Float => Literal::Float(f32::from_le_bytes(fixed(bytes, "float")?)),
            PrimitiveType::Double => Literal::Double(f64::from_le_bytes(fixed(bytes, "double")?)),
            PrimitiveType::String => Literal::String(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| Error::codec("string bound is not valid UTF-8"))?,
            ),
            PrimitiveType::Uuid => Literal::Uuid(Uuid::from_bytes(fixed(bytes, "uuid")?)),
            PrimitiveType::Binary | PrimitiveType::Fixed(_) | PrimitiveType::Decimal { .. } => {
                Literal::Binary(bytes.to_vec())
            }
        };
        Ok(lit)
    }
}

/// Shortens a string bound to at most `width` characters for compact
/// statistics storage. Upper bounds shortened this way remain valid only if
/// the caller also increments the final character; this helper is for lower
/// bounds and display, so it truncates on a char boundary and nothing more.
///
/// `width` counts Unicode code points, not UTF-16 code units, so a
/// supplementary-plane character counts as one. The Java and Python
/// implementations truncate by code point as well, and cross-implementation
/// agreement on partition values is what matters here.
pub fn truncate_string_bound(s: &str, width: usize) -> &str {
    match s.char_indices().nth(width) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
