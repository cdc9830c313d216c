//! Snapshots: immutable, append-only records of table state, plus the named
//! refs (branches and tags) that point at them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The name of the ref every successful commit advances.
pub const MAIN_BRANCH: &str = "main";

/// The high-level operation a snapshot performed, recorded in its summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Append,
    Replace,
    Overwrite,
    Delete,
}

/// Snapshot summary: the operation plus string-encoded counters
/// (`added-data-files`, `added-records`, `total-files-size`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub operation: Operation,
    #[serde(flatten)]
    pub other: HashMap<String, String>,
}

impl Summary {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            other: HashMap::new(),
        }
    }

    pub fn with_counter(mut self, key: impl Into<String>, value: u64) -> Self {
        self.other.insert(key.into(), value.to_string());
        self
    }
}

/// An immutable record of table state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    #[serde(rename = "parent-snapshot-id", skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<i64>,
    /// The table's commit sequence assigned to this snapshot; non-negative
    /// and strictly the value the table handed out for this commit.
    #[serde(rename = "sequence-number")]
    pub sequence_number: i64,
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    #[serde(rename = "manifest-list")]
    pub manifest_list: String,
    pub summary: Summary,
    #[serde(rename = "schema-id", skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<i32>,
    /// v3: the first row id assigned to rows in this snapshot.
    #[serde(rename = "first-row-id", skip_serializing_if = "Option::is_none")]
    pub first_row_id: Option<i64>,
    /// v3: how many rows this snapshot added; advances the table's
    /// `next-row-id` on commit.
    #[serde(rename = "added-rows", skip_serializing_if = "Option::is_none")]
    pub added_rows: Option<i64>,
}

/// Whether a ref is a moving branch head or a fixed tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefType {
    Branch,
    Tag,
}

/// A named pointer to a snapshot with optional retention overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotReference {
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
    #[serde(rename = "type")]
    pub ref_type: RefType,
    #[serde(
        rename = "min-snapshots-to-keep",
        skip_serializing_if = "Option::is_none"
    )]
    pub min_snapshots_to_keep: Option<u32>,
    #[serde(
        rename = "max-snapshot-age-ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_snapshot_age_ms: Option<i64>,
    #[serde(rename = "max-ref-age-ms", skip_serializing_if = "Option::is_none")]
    pub max_ref_age_ms: Option<i64>,
}

impl SnapshotReference {
    pub fn branch(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            ref_type: RefType::Branch,
            min_snapshots_to_keep: None,
            max_snapshot_age_ms: None,
            max_ref_age_ms: None,
        }
    }

    pub fn tag(snapshot_id: i64) -> Self {
        Self {
            snapshot_id,
            ref_type: RefType::Tag,
            min_snapshots_to_keep: None,
            max_snapshot_age_ms: None,
            max_ref_age_ms: None,
        }
    }
}

/// Walks the parent chain of `snapshot_id` (inclusive) over `snapshots`,
/// stopping at the first missing parent. Used by expiration to compute the
/// must-keep set.
pub fn ancestors_of<'a>(
    snapshots: &'a [Snapshot],
    snapshot_id: i64,
) -> impl Iterator<Item = &'a Snapshot> + 'a {
    let by_id: HashMap<i64, &Snapshot> =
        snapshots.iter().map(|s| (s.snapshot_id, s)).collect();
    let mut next = Some(snapshot_id);
    std::iter::from_fn(move || {
        let current = by_id.get(&next?)?;
        next = current.parent_snapshot_id;
        Some(*current)
    })
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    pub(crate) fn snapshot(id: i64, parent: Option<i64>, seq: i64, ts: i64) -> Snapshot {
        Snapshot {
            snapshot_id: id,
            parent_snapshot_id: parent,
            sequence_number: seq,
            timestamp_ms: ts,
            manifest_list: format!("metadata/snap-{id}.avro"),
            summary: Summary::new(Operation::Append),
            schema_id: Some(0),
            first_row_id: None,
            added_rows: None,
        }
    }
}
