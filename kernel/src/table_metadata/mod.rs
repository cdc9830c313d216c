//! [`TableMetadata`]: the versioned, immutable description of a table —
//! schemas, partition specs, sort orders, snapshot history, refs, and
//! properties. Values are never mutated in place; every change goes through
//! [`TableMetadataBuilder`] and produces a strictly newer value.
//!
//! The JSON form uses the Iceberg table-spec key spelling exactly
//! (`format-version`, `last-sequence-number`, `snapshot-log`, ...); it is the
//! on-disk wire format other engines read.

mod builder;

pub use builder::{ExpireSnapshots, TableMetadataBuilder};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::partition::PartitionSpec;
use crate::schema::{Properties, Schema};
use crate::snapshot::{Snapshot, SnapshotReference};
use crate::{Error, IcebergResult};

/// Supported table format versions.
pub const SUPPORTED_FORMAT_VERSIONS: [u8; 2] = [2, 3];

/// A sort field: a transform over a source column plus direction and null
/// ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub transform: crate::transform::Transform,
    #[serde(rename = "source-id")]
    pub source_id: i32,
    pub direction: SortDirection,
    #[serde(rename = "null-order")]
    pub null_order: NullOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullOrder {
    #[serde(rename = "nulls-first")]
    NullsFirst,
    #[serde(rename = "nulls-last")]
    NullsLast,
}

/// An id-stamped sort order. Order id 0 is reserved for the unsorted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortOrder {
    #[serde(rename = "order-id")]
    pub order_id: i32,
    pub fields: Vec<SortField>,
}

impl SortOrder {
    pub fn unsorted() -> Self {
        Self {
            order_id: 0,
            fields: Vec::new(),
        }
    }
}

/// One row of the snapshot log: when a snapshot became current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLogEntry {
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    #[serde(rename = "snapshot-id")]
    pub snapshot_id: i64,
}

/// One row of the metadata log: the path of a superseded metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLogEntry {
    #[serde(rename = "timestamp-ms")]
    pub timestamp_ms: i64,
    #[serde(rename = "metadata-file")]
    pub metadata_file: String,
}

/// The complete metadata of one table version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    #[serde(rename = "format-version")]
    pub format_version: u8,
    #[serde(rename = "table-uuid")]
    pub table_uuid: Uuid,
    pub location: String,
    #[serde(rename = "last-sequence-number")]
    pub last_sequence_number: i64,
    #[serde(rename = "last-updated-ms")]
    pub last_updated_ms: i64,
    #[serde(rename = "last-column-id")]
    pub last_column_id: i32,
    pub schemas: Vec<Schema>,
    #[serde(rename = "current-schema-id")]
    pub current_schema_id: i32,
    #[serde(rename = "partition-specs")]
    pub partition_specs: Vec<PartitionSpec>,
    #[serde(rename = "default-spec-id")]
    pub default_spec_id: i32,
    #[serde(rename = "last-partition-id")]
    pub last_partition_id: i32,
    #[serde(rename = "sort-orders")]
    pub sort_orders: Vec<SortOrder>,
    #[serde(rename = "default-sort-order-id")]
    pub default_sort_order_id: i32,
    #[serde(default)]
    pub properties: Properties,
    #[serde(
        rename = "current-snapshot-id",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub snapshots: Vec<Snapshot>,
    #[serde(rename = "snapshot-log", default)]
    pub snapshot_log: Vec<SnapshotLogEntry>,
    #[serde(rename = "metadata-log", default)]
    pub metadata_log: Vec<MetadataLogEntry>,
    #[serde(default)]
    pub refs: HashMap<String, SnapshotReference>,
    /// v3: the next row id to assign; advanced by each snapshot's
    /// `added-rows`.
    #[serde(rename = "next-row-id", skip_serializing_if = "Option::is_none")]
    pub next_row_id: Option<i64>,
}

impl TableMetadata {
    /// Creates the initial metadata of a brand-new table:
    /// `last-sequence-number = 0`, no snapshots, the given schema/spec/order
    /// as current defaults.
    pub fn new(
        format_version: u8,
        location: impl Into<String>,
        schema: Schema,
        spec: PartitionSpec,
        sort_order: SortOrder,
        properties: Properties,
        timestamp_ms: i64,
    ) -> IcebergResult<Self> {
        if !SUPPORTED_FORMAT_VERSIONS.contains(&format_version) {
            return Err(Error::validation(format!(
                "unsupported format version {format_version}"
            )));
        }
        let last_column_id = schema.max_field_id();
        let last_partition_id = spec.max_field_id().unwrap_or(0);
        let metadata = Self {
            format_version,
            table_uuid: Uuid::new_v4(),
            location: location.into(),
            last_sequence_number: 0,
            last_updated_ms: timestamp_ms,
            last_column_id,
            current_schema_id: schema.schema_id,
            schemas: vec![schema],
            default_spec_id: spec.spec_id,
            partition_specs: vec![spec],
            last_partition_id,
            default_sort_order_id: sort_order.order_id,
            sort_orders: vec![sort_order],
            properties,
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            metadata_log: Vec::new(),
            refs: HashMap::new(),
            next_row_id: (format_version >= 3).then_some(0),
        };
        metadata.validate()?;
        Ok(metadata)
    }

    /// Opens a builder over this value. The builder never mutates `self`; it
    /// produces a new value on `build()`.
    pub fn into_builder(self) -> TableMetadataBuilder {
        TableMetadataBuilder::new(self)
    }

    pub fn current_schema(&self) -> IcebergResult<&Schema> {
        self.schema_by_id(self.current_schema_id)
    }

    pub fn schema_by_id(&self, id: i32) -> IcebergResult<&Schema> {
        self.schemas
            .iter()
            .find(|s| s.schema_id == id)
            .ok_or_else(|| Error::not_found(format!("no schema with id {id}")))
    }

    pub fn default_spec(&self) -> IcebergResult<&PartitionSpec> {
        self.spec_by_id(self.default_spec_id)
    }

    pub fn spec_by_id(&self, id: i32) -> IcebergResult<&PartitionSpec> {
        self.partition_specs
            .iter()
            .find(|s| s.spec_id == id)
            .ok_or_else(|| Error::not_found(format!("no partition spec with id {id}")))
    }

    pub fn sort_order_by_id(&self, id: i32) -> IcebergResult<&SortOrder> {
        self.sort_orders
            .iter()
            .find(|o| o.order_id == id)
            .ok_or_else(|| Error::not_found(format!("no sort order with id {id}")))
    }

    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    pub fn snapshot_by_id(&self, id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == id)
    }

    pub fn ref_by_name(&self, name: &str) -> Option<&SnapshotReference> {
        self.refs.get(name)
    }

    /// Time travel: the snapshot with the greatest `timestamp_ms <= t`, or
    /// none when the table had no snapshot yet at `t`.
    pub fn snapshot_at_timestamp(&self, t: i64) -> Option<&Snapshot> {
        self.snapshots
            .iter()
            .filter(|s| s.timestamp_ms <= t)
            .max_by_key(|s| (s.timestamp_ms, s.sequence_number))
    }

    /// Checks the referential invariants every metadata value must satisfy.
    /// Builder operations call this before handing a value back.
    pub fn validate(&self) -> IcebergResult<()> {
        self.schema_by_id(self.current_schema_id).map_err(|_| {
            Error::validation(format!(
                "current-schema-id {} not present in schemas",
                self.current_schema_id
            ))
        })?;
        self.spec_by_id(self.default_spec_id).map_err(|_| {
            Error::validation(format!(
                "default-spec-id {} not present in partition-specs",
                self.default_spec_id
            ))
        })?;
        self.sort_order_by_id(self.default_sort_order_id)
            .map_err(|_| {
                Error::validation(format!(
                    "default-sort-order-id {} not present in sort-orders",
                    self.default_sort_order_id
                ))
            })?;
        if let Some(current) = self.current_snapshot_id {
            if self.snapshot_by_id(current).is_none() {
                return Err(Error::validation(format!(
                    "current-snapshot-id {current} not present in snapshots"
                )));
            }
        }
        for (name, reference) in &self.refs {
            if self.snapshot_by_id(reference.snapshot_id).is_none() {
                return Err(Error::validation(format!(
                    "ref '{name}' points at missing snapshot {}",
                    reference.snapshot_id
                )));
            }
        }
        let max_sequence = self
            .snapshots
            .iter()
            .map(|s| s.sequence_number)
            .max()
            .unwrap_or(0);
        if self.last_sequence_number < max_sequence {
            return Err(Error::validation(format!(
                "last-sequence-number {} below max snapshot sequence {max_sequence}",
                self.last_sequence_number
            )));
        }
        Ok(())
    }

    /// Parses a metadata JSON document, validating the invariants on the way
    /// in so a corrupt file is rejected at the boundary.
    pub fn from_json_bytes(bytes: &[u8]) -> IcebergResult<Self> {
        let metadata: TableMetadata = serde_json::from_slice(bytes)?;
        if !SUPPORTED_FORMAT_VERSIONS.contains(&metadata.format_version) {
            return Err(Error::validation(format!(
                "unsupported format version {}",
                metadata.format_version
            )));
        }
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn to_json_bytes(&self) -> IcebergResult<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}
