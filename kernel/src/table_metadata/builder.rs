//! Copy-on-write mutations over [`TableMetadata`].
//!
//! A [`TableMetadataBuilder`] consumes a metadata value, applies a sequence
//! of operations, and hands back a new, validated value from `build()`. The
//! input value is never visible half-mutated: operations that fail leave the
//! builder unusable (they consume it), and `build()` re-checks every
//! referential invariant.

use std::collections::HashSet;

use tracing::debug;

use super::{MetadataLogEntry, SnapshotLogEntry, SortOrder, TableMetadata};
use crate::partition::PartitionSpec;
use crate::schema::Schema;
use crate::snapshot::{ancestors_of, RefType, Snapshot, SnapshotReference, MAIN_BRANCH};
use crate::{Error, IcebergResult};

/// Builder over a [`TableMetadata`] value. Every operation returns
/// `IcebergResult<Self>` so call chains read linearly and the first failed
/// invariant aborts the chain.
#[derive(Debug)]
pub struct TableMetadataBuilder {
    metadata: TableMetadata,
}

impl TableMetadataBuilder {
    pub(super) fn new(metadata: TableMetadata) -> Self {
        Self { metadata }
    }

    /// Appends a schema, bumping `last-column-id` to cover every field id the
    /// new schema assigns (nested struct/list/map ids included). Does not
    /// change the current schema.
    pub fn add_schema(mut self, schema: Schema) -> IcebergResult<Self> {
        if self
            .metadata
            .schemas
            .iter()
            .any(|s| s.schema_id == schema.schema_id)
        {
            return Err(Error::validation(format!(
                "schema id {} already exists",
                schema.schema_id
            )));
        }
        self.metadata.last_column_id = self.metadata.last_column_id.max(schema.max_field_id());
        self.metadata.schemas.push(schema);
        Ok(self)
    }

    /// Makes an already-added schema current. `NotFound` when absent.
    pub fn set_current_schema(mut self, schema_id: i32) -> IcebergResult<Self> {
        self.metadata.schema_by_id(schema_id)?;
        self.metadata.current_schema_id = schema_id;
        Ok(self)
    }

    /// Appends a partition spec, bumping `last-partition-id`. Does not change
    /// the default spec.
    pub fn add_partition_spec(mut self, spec: PartitionSpec) -> IcebergResult<Self> {
        if self
            .metadata
            .partition_specs
            .iter()
            .any(|s| s.spec_id == spec.spec_id)
        {
            return Err(Error::validation(format!(
                "partition spec id {} already exists",
                spec.spec_id
            )));
        }
        if let Some(max) = spec.max_field_id() {
            self.metadata.last_partition_id = self.metadata.last_partition_id.max(max);
        }
        self.metadata.partition_specs.push(spec);
        Ok(self)
    }

    /// Makes an already-added partition spec the default. `NotFound` when
    /// absent.
    pub fn set_default_partition_spec(mut self, spec_id: i32) -> IcebergResult<Self> {
        self.metadata.spec_by_id(spec_id)?;
        self.metadata.default_spec_id = spec_id;
        Ok(self)
    }

    pub fn add_sort_order(mut self, order: SortOrder) -> IcebergResult<Self> {
        if self
            .metadata
            .sort_orders
            .iter()
            .any(|o| o.order_id == order.order_id)
        {
            return Err(Error::validation(format!(
                "sort order id {} already exists",
                order.order_id
            )));
        }
        self.metadata.sort_orders.push(order);
        Ok(self)
    }

    pub fn set_default_sort_order(mut self, order_id: i32) -> IcebergResult<Self> {
        self.metadata.sort_order_by_id(order_id)?;
        self.metadata.default_sort_order_id = order_id;
        Ok(self)
    }

    /// Appends a snapshot and makes it current: bumps
    /// `last-sequence-number` (monotonic max), records a snapshot-log entry,
    /// points the `main` branch at it, and on v3 advances `next-row-id` by
    /// the snapshot's `added-rows`.
    pub fn add_snapshot(mut self, snapshot: Snapshot) -> IcebergResult<Self> {
        if snapshot.sequence_number < 0 {
            return Err(Error::validation(format!(
                "snapshot sequence number {} is negative",
                snapshot.sequence_number
            )));
        }
        if self.metadata.snapshot_by_id(snapshot.snapshot_id).is_some() {
            return Err(Error::validation(format!(
                "snapshot id {} already exists",
                snapshot.snapshot_id
            )));
        }
        if let Some(schema_id) = snapshot.schema_id {
            self.metadata.schema_by_id(schema_id)?;
        }
        self.metadata.last_sequence_number = self
            .metadata
            .last_sequence_number
            .max(snapshot.sequence_number);
        self.metadata.last_updated_ms = self.metadata.last_updated_ms.max(snapshot.timestamp_ms);
        self.metadata.snapshot_log.push(SnapshotLogEntry {
            timestamp_ms: snapshot.timestamp_ms,
            snapshot_id: snapshot.snapshot_id,
        });
        self.metadata.current_snapshot_id = Some(snapshot.snapshot_id);
        self.metadata
            .refs
            .entry(MAIN_BRANCH.to_string())
            .and_modify(|r| r.snapshot_id = snapshot.snapshot_id)
            .or_insert_with(|| SnapshotReference::branch(snapshot.snapshot_id));
        if self.metadata.format_version >= 3 {
            if let Some(added) = snapshot.added_rows {
                let next = self.metadata.next_row_id.unwrap_or(0);
                self.metadata.next_row_id = Some(next + added);
            }
        }
        debug!(
            snapshot_id = snapshot.snapshot_id,
            sequence_number = snapshot.sequence_number,
            "added snapshot"
        );
        self.metadata.snapshots.push(snapshot);
        Ok(self)
    }

    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.properties.insert(key.into(), value.into());
        self
    }

    pub fn remove_property(mut self, key: &str) -> Self {
        self.metadata.properties.remove(key);
        self
    }

    /// Points a named ref at a snapshot. `NotFound` when the snapshot is
    /// absent.
    pub fn set_ref(mut self, name: impl Into<String>, reference: SnapshotReference) -> IcebergResult<Self> {
        let name = name.into();
        if self.metadata.snapshot_by_id(reference.snapshot_id).is_none() {
            return Err(Error::not_found(format!(
                "cannot set ref '{name}': no snapshot with id {}",
                reference.snapshot_id
            )));
        }
        self.metadata.refs.insert(name, reference);
        Ok(self)
    }

    pub fn create_tag(self, name: impl Into<String>, snapshot_id: i64) -> IcebergResult<Self> {
        self.set_ref(name, SnapshotReference::tag(snapshot_id))
    }

    pub fn create_branch(self, name: impl Into<String>, snapshot_id: i64) -> IcebergResult<Self> {
        self.set_ref(name, SnapshotReference::branch(snapshot_id))
    }

    pub fn remove_ref(mut self, name: &str) -> IcebergResult<Self> {
        if self.metadata.refs.remove(name).is_none() {
            return Err(Error::not_found(format!("no ref named '{name}'")));
        }
        if name == MAIN_BRANCH {
            self.metadata.current_snapshot_id = None;
        }
        Ok(self)
    }

    /// Records the path of the metadata file this new version supersedes.
    pub fn add_metadata_log_entry(mut self, metadata_file: impl Into<String>, timestamp_ms: i64) -> Self {
        self.metadata.metadata_log.push(MetadataLogEntry {
            timestamp_ms,
            metadata_file: metadata_file.into(),
        });
        self
    }

    /// Replaces the table UUID; used when registering an imported table.
    pub fn assign_uuid(mut self, uuid: uuid::Uuid) -> Self {
        self.metadata.table_uuid = uuid;
        self
    }

    /// Removes expirable snapshots per `config`, along with their
    /// snapshot-log rows. Never removes a snapshot referenced by a ref or an
    /// ancestor of one, and never drops the kept count below
    /// `max(min_snapshots_to_keep, |must_keep|)`. Manifest files and the
    /// metadata log are untouched — deleting unreachable files is the
    /// caller's concern.
    pub fn expire_snapshots(mut self, config: &ExpireSnapshots, now_ms: i64) -> Self {
        let must_keep = self.must_keep_snapshot_ids();

        // Oldest first, so the cap keeps the newest candidates.
        let mut candidates: Vec<&Snapshot> = self
            .metadata
            .snapshots
            .iter()
            .filter(|s| !must_keep.contains(&s.snapshot_id))
            .filter(|s| match config.max_age_ms {
                Some(max_age) => s.timestamp_ms < now_ms - max_age,
                None => true,
            })
            .collect();
        candidates.sort_by_key(|s| (s.timestamp_ms, s.snapshot_id));

        let floor = usize::max(config.min_snapshots_to_keep, must_keep.len());
        let expirable_budget = self.metadata.snapshots.len().saturating_sub(floor);
        let expired: HashSet<i64> = candidates
            .iter()
            .take(expirable_budget)
            .map(|s| s.snapshot_id)
            .collect();
        if expired.is_empty() {
            return self;
        }

        debug!(count = expired.len(), "expiring snapshots");
        self.metadata
            .snapshots
            .retain(|s| !expired.contains(&s.snapshot_id));
        self.metadata
            .snapshot_log
            .retain(|entry| !expired.contains(&entry.snapshot_id));
        self
    }

    // Referenced snapshots plus every ancestor reachable from one.
    fn must_keep_snapshot_ids(&self) -> HashSet<i64> {
        let mut keep = HashSet::new();
        for reference in self.metadata.refs.values() {
            for ancestor in ancestors_of(&self.metadata.snapshots, reference.snapshot_id) {
                keep.insert(ancestor.snapshot_id);
            }
        }
        // A current snapshot with no ref (possible after remove_ref churn) is
        // still live state.
        if let Some(current) = self.metadata.current_snapshot_id {
            for ancestor in ancestors_of(&self.metadata.snapshots, current) {
                keep.insert(ancestor.snapshot_id);
            }
        }
        keep
    }

    /// Validates and returns the new metadata value.
    pub fn build(self) -> IcebergResult<TableMetadata> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}

/// Configuration for [`TableMetadataBuilder::expire_snapshots`].
#[derive(Debug, Clone, Default)]
pub struct ExpireSnapshots {
    /// Only snapshots older than `now - max_age_ms` are expirable. `None`
    /// makes every unreferenced snapshot expirable.
    pub max_age_ms: Option<i64>,
    /// Lower bound on the number of snapshots left after expiration.
    pub min_snapshots_to_keep: usize,
}

#[cfg(test)]
mod tests {
    use super::super::test_fixtures::simple_table;
    use super::*;
    use crate::schema::{NestedField, PrimitiveType, Type};
    use crate::snapshot::test_fixtures::snapshot;
    use crate::snapshot::{Operation, Summary};
    use crate::transform::Transform;

    #[test]
    fn add_schema_bumps_last_column_id_monotonically() {
        let table = simple_table(2);
        let wide = Schema::new(
            1,
            vec![NestedField::required(
                9,
                "extra",
                Type::primitive(PrimitiveType::Long),
            )],
        );
        let table = table
            .into_builder()
            .add_schema(wide)
            .unwrap()
            .set_current_schema(1)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(table.last_column_id, 9);
        assert_eq!(table.current_schema_id, 1);

        // A later schema with smaller ids must not shrink last-column-id.
        let narrow = Schema::new(
            2,
            vec![NestedField::required(
                3,
                "small",
                Type::primitive(PrimitiveType::Int),
            )],
        );
        let table = table.into_builder().add_schema(narrow).unwrap().build().unwrap();
        assert_eq!(table.last_column_id, 9);
    }

    #[test]
    fn set_current_schema_fails_for_unknown_id() {
        let err = simple_table(2)
            .into_builder()
            .set_current_schema(5)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn add_partition_spec_bumps_last_partition_id() {
        let table = simple_table(2);
        let spec = PartitionSpec::builder(1)
            .add(&table.schemas[0], "id", Transform::Bucket(8))
            .unwrap()
            .build();
        let table = table
            .into_builder()
            .add_partition_spec(spec)
            .unwrap()
            .set_default_partition_spec(1)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(table.last_partition_id, 1000);
        assert_eq!(table.default_spec_id, 1);
    }

    #[test]
    fn add_snapshot_advances_everything() {
        let table = simple_table(2);
        let snap = Snapshot {
            snapshot_id: 101,
            parent_snapshot_id: None,
            sequence_number: 1,
            timestamp_ms: 1_600_000_001_000,
            manifest_list: "metadata/snap-101.avro".to_string(),
            summary: Summary::new(Operation::Append).with_counter("added-data-files", 1),
            schema_id: Some(0),
            first_row_id: None,
            added_rows: None,
        };
        let table = table.into_builder().add_snapshot(snap).unwrap().build().unwrap();
        assert_eq!(table.current_snapshot_id, Some(101));
        assert_eq!(table.last_sequence_number, 1);
        assert_eq!(table.refs[MAIN_BRANCH].snapshot_id, 101);
        assert_eq!(table.snapshot_log.len(), 1);
        assert_eq!(table.snapshot_log[0].snapshot_id, 101);
    }

    #[test]
    fn last_sequence_number_never_decreases() {
        let mut table = simple_table(2);
        let mut expected_max = 0;
        for (id, seq) in [(1i64, 3i64), (2, 1), (3, 5), (4, 4)] {
            table = table
                .into_builder()
                .add_snapshot(snapshot(id, None, seq, 1000 + id))
                .unwrap()
                .build()
                .unwrap();
            expected_max = expected_max.max(seq);
            assert_eq!(table.last_sequence_number, expected_max);
        }
    }

    #[test]
    fn v3_next_row_id_accumulates_added_rows() {
        let table = simple_table(3);
        let mut snap = snapshot(1, None, 1, 2000);
        snap.first_row_id = Some(0);
        snap.added_rows = Some(100);
        let table = table.into_builder().add_snapshot(snap).unwrap().build().unwrap();
        assert_eq!(table.next_row_id, Some(100));

        let mut snap = snapshot(2, Some(1), 2, 3000);
        snap.first_row_id = Some(100);
        snap.added_rows = Some(25);
        let table = table.into_builder().add_snapshot(snap).unwrap().build().unwrap();
        assert_eq!(table.next_row_id, Some(125));
    }

    #[test]
    fn refs_must_point_at_live_snapshots() {
        let table = simple_table(2)
            .into_builder()
            .add_snapshot(snapshot(1, None, 1, 1000))
            .unwrap()
            .build()
            .unwrap();
        let table = table.into_builder().create_tag("v1", 1).unwrap().build().unwrap();
        assert_eq!(table.refs["v1"].snapshot_id, 1);
        assert_eq!(table.refs["v1"].ref_type, RefType::Tag);

        let err = table
            .into_builder()
            .create_branch("audit", 999)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn expiration_keeps_ref_ancestors_and_floor() {
        // Chain 1 <- 2 <- 3 <- 4 <- 5, tag on 3, main on 5.
        let mut table = simple_table(2);
        for id in 1..=5i64 {
            let parent = (id > 1).then(|| id - 1);
            table = table
                .into_builder()
                .add_snapshot(snapshot(id, parent, id, id * 1000))
                .unwrap()
                .build()
                .unwrap();
        }
        let table = table.into_builder().create_tag("v3", 3).unwrap().build().unwrap();

        // Everything is an ancestor of main here, so nothing can expire.
        let config = ExpireSnapshots::default();
        let unchanged = table
            .clone()
            .into_builder()
            .expire_snapshots(&config, 1_000_000)
            .build()
            .unwrap();
        assert_eq!(unchanged.snapshots.len(), 5);

        // Re-point main at 5 with parent chain broken at 4: orphan 1 and 2 by
        // removing the tag, main still keeps 3..=5 alive via parents.
        let table = unchanged.into_builder().remove_ref("v3").unwrap().build().unwrap();
        let expired = table
            .into_builder()
            .expire_snapshots(&config, 1_000_000)
            .build()
            .unwrap();
        // 1 and 2 are still ancestors of 5, so they stay.
        assert_eq!(expired.snapshots.len(), 5);
    }

    #[test]
    fn expiration_removes_orphans_and_their_log_rows() {
        // Two roots: 1 <- 2 (main), 10 is a dead branch root.
        let table = simple_table(2)
            .into_builder()
            .add_snapshot(snapshot(10, None, 1, 500))
            .unwrap()
            .build()
            .unwrap();
        let table = table
            .into_builder()
            .add_snapshot(snapshot(1, None, 2, 1000))
            .unwrap()
            .build()
            .unwrap();
        let table = table
            .into_builder()
            .add_snapshot(snapshot(2, Some(1), 3, 2000))
            .unwrap()
            .build()
            .unwrap();

        let config = ExpireSnapshots::default();
        let expired = table
            .into_builder()
            .expire_snapshots(&config, 10_000)
            .build()
            .unwrap();
        assert!(expired.snapshot_by_id(10).is_none());
        assert!(expired.snapshot_by_id(1).is_some());
        assert!(expired.snapshot_by_id(2).is_some());
        assert!(expired
            .snapshot_log
            .iter()
            .all(|entry| entry.snapshot_id != 10));
        // Metadata log untouched by design.
    }

    #[test]
    fn expiration_honors_age_threshold_and_min_keep() {
        let mut table = simple_table(2);
        for id in 1..=4i64 {
            // Four independent roots so only main's target is referenced.
            table = table
                .into_builder()
                .add_snapshot(snapshot(id, None, id, id * 1000))
                .unwrap()
                .build()
                .unwrap();
        }
        // main -> 4; roots 1..3 unreferenced.
        let age_limited = ExpireSnapshots {
            max_age_ms: Some(1_500),
            min_snapshots_to_keep: 0,
        };
        // now=4000: only snapshots older than 2500 expire, i.e. 1 and 2.
        let result = table
            .clone()
            .into_builder()
            .expire_snapshots(&age_limited, 4_000)
            .build()
            .unwrap();
        assert_eq!(
            result.snapshots.iter().map(|s| s.snapshot_id).collect::<Vec<_>>(),
            vec![3, 4]
        );

        let keep_three = ExpireSnapshots {
            max_age_ms: None,
            min_snapshots_to_keep: 3,
        };
        let result = table
            .into_builder()
            .expire_snapshots(&keep_three, 10_000)
            .build()
            .unwrap();
        // Only the oldest expires; the floor holds the rest.
        assert_eq!(result.snapshots.len(), 3);
        assert!(result.snapshot_by_id(1).is_none());
    }
}
