//! End-to-end table lifecycle: create, commit snapshots, time travel,
//! expire, sweep.

use std::sync::Arc;
use std::time::Duration;

use iceberg_kernel::commit::{commit, load_current, CommitOptions, CommitRequirement};
use iceberg_kernel::maintenance::{expire_snapshots, spawn_sweep, MetadataLogRetention};
use iceberg_kernel::schema::{NestedField, PrimitiveType, Properties, Schema, Type};
use iceberg_kernel::snapshot::{Operation, Snapshot, Summary};
use iceberg_kernel::storage::{InMemoryBackend, StorageBackend};
use iceberg_kernel::table_metadata::{ExpireSnapshots, SortOrder, TableMetadata};
use iceberg_kernel::{Error, IcebergResult, PartitionSpec};

const TABLE: &str = "s3://bucket/warehouse/db/events";
const T0: i64 = 1_600_000_000_000;

fn two_column_table() -> IcebergResult<TableMetadata> {
    let schema = Schema::new(
        0,
        vec![
            NestedField::required(1, "id", Type::primitive(PrimitiveType::Int)),
            NestedField::optional(2, "data", Type::primitive(PrimitiveType::String)),
        ],
    );
    TableMetadata::new(
        2,
        TABLE,
        schema,
        PartitionSpec::unpartitioned(),
        SortOrder::unsorted(),
        Properties::new(),
        T0,
    )
}

fn append_snapshot(id: i64, parent: Option<i64>, seq: i64, ts: i64) -> Snapshot {
    Snapshot {
        snapshot_id: id,
        parent_snapshot_id: parent,
        sequence_number: seq,
        timestamp_ms: ts,
        manifest_list: format!("{TABLE}/metadata/snap-{id}.avro"),
        summary: Summary::new(Operation::Append).with_counter("added-data-files", 1),
        schema_id: Some(0),
        first_row_id: None,
        added_rows: None,
    }
}

fn options() -> CommitOptions {
    CommitOptions {
        max_retries: 2,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn create_then_append_updates_current_state_and_main_ref() {
    let storage = InMemoryBackend::new();

    let created = commit(&storage, TABLE, &[], &options(), |base| {
        assert!(base.is_none());
        two_column_table()
    })
    .await
    .unwrap();
    assert_eq!(created.version, 1);
    assert_eq!(created.metadata.last_sequence_number, 0);
    assert!(created.metadata.snapshots.is_empty());

    let appended = commit(&storage, TABLE, &[], &options(), |base| {
        base.expect("table exists")
            .metadata
            .clone()
            .into_builder()
            .add_snapshot(append_snapshot(3_051, None, 1, T0 + 1_000))?
            .build()
    })
    .await
    .unwrap();

    let metadata = &appended.metadata;
    assert_eq!(appended.version, 2);
    assert_eq!(metadata.current_snapshot_id, Some(3_051));
    assert_eq!(metadata.last_sequence_number, 1);
    assert_eq!(metadata.refs["main"].snapshot_id, 3_051);
    assert_eq!(metadata.snapshot_log.len(), 1);

    // the persisted JSON carries the wire key spellings
    let bytes = storage
        .get("s3://bucket/warehouse/db/events/metadata/v2.metadata.json")
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["format-version"], 2);
    assert_eq!(json["current-snapshot-id"], 3_051);
    assert_eq!(json["last-sequence-number"], 1);
    assert_eq!(json["refs"]["main"]["snapshot-id"], 3_051);
    assert_eq!(json["refs"]["main"]["type"], "branch");
}

#[tokio::test]
async fn reload_round_trips_through_the_version_pointer() {
    let storage = InMemoryBackend::new();
    let created = commit(&storage, TABLE, &[], &options(), |_| two_column_table())
        .await
        .unwrap();

    let base = load_current(&storage, TABLE).await.unwrap().unwrap();
    assert_eq!(base.version, 1);
    assert_eq!(base.metadata_path, created.metadata_path);
    assert_eq!(base.metadata, created.metadata);

    // absent table
    assert!(load_current(&storage, "s3://bucket/none").await.unwrap().is_none());
}

#[tokio::test]
async fn time_travel_picks_the_latest_snapshot_at_or_before_the_timestamp() {
    let storage = InMemoryBackend::new();
    let committed = commit(&storage, TABLE, &[], &options(), |_| {
        two_column_table()?
            .into_builder()
            .add_snapshot(append_snapshot(1, None, 1, T0 + 1_000))?
            .add_snapshot(append_snapshot(2, Some(1), 2, T0 + 2_000))?
            .add_snapshot(append_snapshot(3, Some(2), 3, T0 + 3_000))?
            .build()
    })
    .await
    .unwrap();

    let metadata = &committed.metadata;
    assert!(metadata.snapshot_at_timestamp(T0).is_none());
    assert_eq!(
        metadata.snapshot_at_timestamp(T0 + 2_500).unwrap().snapshot_id,
        2
    );
    assert_eq!(
        metadata.snapshot_at_timestamp(i64::MAX).unwrap().snapshot_id,
        3
    );
}

#[tokio::test]
async fn stale_ref_requirement_conflicts_until_rebased() {
    let storage = InMemoryBackend::new();
    commit(&storage, TABLE, &[], &options(), |_| {
        two_column_table()?
            .into_builder()
            .add_snapshot(append_snapshot(1, None, 1, T0 + 1_000))?
            .build()
    })
    .await
    .unwrap();

    // asserts main at a snapshot it is not at
    let stale = [CommitRequirement::AssertRefSnapshotId {
        ref_name: "main".to_string(),
        snapshot_id: Some(999),
    }];
    let single_shot = CommitOptions {
        max_retries: 0,
        ..options()
    };
    let err = commit(&storage, TABLE, &stale, &single_shot, |base| {
        Ok(base.unwrap().metadata.clone())
    })
    .await
    .unwrap_err();
    assert!(matches!(err, Error::CommitRetryExhausted { attempts: 1, .. }));

    // the accurate assertion passes
    let current = [CommitRequirement::AssertRefSnapshotId {
        ref_name: "main".to_string(),
        snapshot_id: Some(1),
    }];
    commit(&storage, TABLE, &current, &options(), |base| {
        base.unwrap()
            .metadata
            .clone()
            .into_builder()
            .add_snapshot(append_snapshot(2, Some(1), 2, T0 + 2_000))?
            .build()
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn expiration_commit_drops_only_unreachable_snapshots() {
    let storage = InMemoryBackend::new();
    commit(&storage, TABLE, &[], &options(), |_| {
        let builder = two_column_table()?
            .into_builder()
            // dead side branch, then the surviving main line
            .add_snapshot(append_snapshot(10, None, 1, T0 + 1_000))?
            .add_snapshot(append_snapshot(11, None, 2, T0 + 2_000))?
            .add_snapshot(append_snapshot(12, Some(11), 3, T0 + 3_000))?;
        builder.build()
    })
    .await
    .unwrap();

    let committed = expire_snapshots(
        &storage,
        TABLE,
        &ExpireSnapshots {
            max_age_ms: None,
            min_snapshots_to_keep: 0,
        },
        T0 + 10_000,
        &options(),
    )
    .await
    .unwrap();

    let ids: Vec<i64> = committed
        .metadata
        .snapshots
        .iter()
        .map(|s| s.snapshot_id)
        .collect();
    assert_eq!(ids, vec![11, 12]);
    assert_eq!(committed.metadata.refs["main"].snapshot_id, 12);
    committed.metadata.validate().unwrap();
}

#[tokio::test]
async fn post_commit_sweep_deletes_superseded_metadata_files() {
    let storage = Arc::new(InMemoryBackend::new());
    let first = commit(storage.as_ref(), TABLE, &[], &options(), |_| two_column_table())
        .await
        .unwrap();
    let second = commit(storage.as_ref(), TABLE, &[], &options(), |base| {
        // the superseded file comes from the loaded base, so it stays
        // correct even if a conflict retry rebases this closure
        let base = base.unwrap().clone();
        base.metadata
            .into_builder()
            .add_snapshot(append_snapshot(1, None, 1, T0 + 1_000))?
            .add_metadata_log_entry(base.metadata_path, T0)
            .build()
    })
    .await
    .unwrap();

    let report = spawn_sweep(
        Arc::clone(&storage),
        second.metadata.clone(),
        second.metadata_path.clone(),
        MetadataLogRetention {
            keep_newest: 0,
            max_age_ms: 0,
        },
        T0 + 1_000_000,
    )
    .await
    .unwrap();

    assert_eq!(report.deleted, vec![first.metadata_path.clone()]);
    assert!(!storage.exists(&first.metadata_path).await.unwrap());
    assert!(storage.exists(&second.metadata_path).await.unwrap());
}
