//! Best-effort table maintenance: the metadata-log retention sweep and the
//! snapshot-expiration driver.
//!
//! Sweeps never fail the operation that triggered them. Delete errors go to
//! an observer callback (or the log, for the spawned variant) and the sweep
//! carries on.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::commit::{commit, load_current, CommitOptions, Committed};
use crate::storage::StorageBackend;
use crate::table_metadata::{ExpireSnapshots, TableMetadata};
use crate::{Error, IcebergResult};

/// How much of the metadata log a sweep preserves.
#[derive(Debug, Clone)]
pub struct MetadataLogRetention {
    /// The newest entries are always kept, regardless of age.
    pub keep_newest: usize,
    /// Entries beyond the newest `keep_newest` are deleted only once older
    /// than this.
    pub max_age_ms: i64,
}

impl Default for MetadataLogRetention {
    fn default() -> Self {
        Self {
            keep_newest: 100,
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

/// What a sweep did. Failures are listed, never raised.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Deletes superseded metadata files past the retention window.
///
/// The newest `keep_newest` log entries and the currently-referenced file
/// are kept unconditionally; older entries are deleted once their age
/// exceeds the threshold. Each delete failure is passed to `observe` and
/// recorded in the report.
#[instrument(skip_all, fields(entries = metadata.metadata_log.len()))]
pub async fn sweep_metadata_log<S: StorageBackend + ?Sized>(
    storage: &S,
    metadata: &TableMetadata,
    current_metadata_path: &str,
    retention: &MetadataLogRetention,
    now_ms: i64,
    observe: impl Fn(&str, &Error),
) -> SweepReport {
    let mut report = SweepReport::default();
    let log = &metadata.metadata_log;
    let expirable = log.len().saturating_sub(retention.keep_newest);
    for entry in &log[..expirable] {
        if entry.metadata_file == current_metadata_path {
            continue;
        }
        if now_ms - entry.timestamp_ms <= retention.max_age_ms {
            continue;
        }
        match storage.delete(&entry.metadata_file).await {
            Ok(()) => report.deleted.push(entry.metadata_file.clone()),
            Err(err) => {
                observe(&entry.metadata_file, &err);
                report.failed.push(entry.metadata_file.clone());
            }
        }
    }
    debug!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "metadata log sweep finished"
    );
    report
}

/// Fire-and-forget variant of [`sweep_metadata_log`] for use after a
/// successful commit. The caller never awaits it; failures are logged.
pub fn spawn_sweep<S>(
    storage: Arc<S>,
    metadata: TableMetadata,
    current_metadata_path: String,
    retention: MetadataLogRetention,
    now_ms: i64,
) -> tokio::task::JoinHandle<SweepReport>
where
    S: StorageBackend + 'static,
{
    tokio::spawn(async move {
        sweep_metadata_log(
            storage.as_ref(),
            &metadata,
            &current_metadata_path,
            &retention,
            now_ms,
            |path, err| warn!(%path, %err, "failed to delete expired metadata file"),
        )
        .await
    })
}

/// Commits a new metadata version with expired snapshots removed.
///
/// Pairs the builder's expiration algorithm with the commit protocol, so
/// the pruned metadata is published under optimistic concurrency like any
/// other change. When nothing is expirable the current version is returned
/// as-is, with no commit. Fails with [`Error::NotFound`] when the table
/// does not exist.
pub async fn expire_snapshots<S: StorageBackend + ?Sized>(
    storage: &S,
    table_location: &str,
    config: &ExpireSnapshots,
    now_ms: i64,
    options: &CommitOptions,
) -> IcebergResult<Committed> {
    let base = load_current(storage, table_location).await?.ok_or_else(|| {
        Error::not_found(format!("no table at '{table_location}' to expire snapshots on"))
    })?;
    let pruned = base
        .metadata
        .clone()
        .into_builder()
        .expire_snapshots(config, now_ms)
        .build()?;
    if pruned.snapshots.len() == base.metadata.snapshots.len() {
        debug!("no snapshots eligible for expiration, skipping commit");
        return Ok(Committed {
            version: base.version,
            metadata_path: base.metadata_path,
            metadata: base.metadata,
        });
    }
    commit(storage, table_location, &[], options, |base| {
        let base = base.ok_or_else(|| {
            Error::not_found(format!("no table at '{table_location}' to expire snapshots on"))
        })?;
        base.metadata
            .clone()
            .into_builder()
            .expire_snapshots(config, now_ms)
            .build()
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::snapshot::test_fixtures::snapshot;
    use crate::storage::InMemoryBackend;
    use crate::table_metadata::test_fixtures::simple_table;

    const HOUR_MS: i64 = 60 * 60 * 1000;

    async fn seeded_log(storage: &InMemoryBackend, timestamps: &[i64]) -> TableMetadata {
        let mut builder = simple_table(2).into_builder();
        for (i, ts) in timestamps.iter().enumerate() {
            let path = format!("s3://b/tbl/metadata/v{i}.metadata.json");
            storage.put(&path, Bytes::from_static(b"{}")).await.unwrap();
            builder = builder.add_metadata_log_entry(path, *ts);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn sweep_honors_count_age_and_current_file() {
        let storage = InMemoryBackend::new();
        // four entries, oldest first; entry 2 is the current file
        let metadata = seeded_log(&storage, &[0, HOUR_MS, 2 * HOUR_MS, 3 * HOUR_MS]).await;
        let retention = MetadataLogRetention {
            keep_newest: 1,
            max_age_ms: 10 * HOUR_MS,
        };
        let now = 13 * HOUR_MS;

        let report = sweep_metadata_log(
            &storage,
            &metadata,
            "s3://b/tbl/metadata/v2.metadata.json",
            &retention,
            now,
            |_, _| panic!("no failures expected"),
        )
        .await;

        // entry 0 (age 13h) and entry 1 (age 12h) exceed the threshold;
        // entry 2 is current and entry 3 is within keep_newest
        assert_eq!(
            report.deleted,
            vec![
                "s3://b/tbl/metadata/v0.metadata.json",
                "s3://b/tbl/metadata/v1.metadata.json"
            ]
        );
        assert!(report.failed.is_empty());
        assert!(!storage.exists("s3://b/tbl/metadata/v0.metadata.json").await.unwrap());
        assert!(storage.exists("s3://b/tbl/metadata/v2.metadata.json").await.unwrap());
        assert!(storage.exists("s3://b/tbl/metadata/v3.metadata.json").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_skips_entries_younger_than_the_threshold() {
        let storage = InMemoryBackend::new();
        let metadata = seeded_log(&storage, &[0, HOUR_MS]).await;
        let retention = MetadataLogRetention {
            keep_newest: 0,
            max_age_ms: 10 * HOUR_MS,
        };
        // only entry 0 is old enough at now = 10h + 1h
        let report = sweep_metadata_log(&storage, &metadata, "current", &retention, 11 * HOUR_MS, |_, _| {})
            .await;
        assert_eq!(report.deleted, vec!["s3://b/tbl/metadata/v0.metadata.json"]);
        assert!(storage.exists("s3://b/tbl/metadata/v1.metadata.json").await.unwrap());
    }

    #[tokio::test]
    async fn sweep_reports_failures_to_the_observer_and_continues() {
        use async_trait::async_trait;
        use crate::IcebergResult;
        use crate::storage::StorageBackend;

        struct NoDelete(InMemoryBackend);

        #[async_trait]
        impl StorageBackend for NoDelete {
            async fn get(&self, path: &str) -> IcebergResult<Option<Bytes>> {
                self.0.get(path).await
            }
            async fn put(&self, path: &str, data: Bytes) -> IcebergResult<()> {
                self.0.put(path, data).await
            }
            async fn delete(&self, path: &str) -> IcebergResult<()> {
                if path.ends_with("v0.metadata.json") {
                    return Err(Error::storage(path, "delete refused"));
                }
                self.0.delete(path).await
            }
            async fn list(&self, prefix: &str) -> IcebergResult<Vec<String>> {
                self.0.list(prefix).await
            }
        }

        let inner = InMemoryBackend::new();
        let metadata = seeded_log(&inner, &[0, HOUR_MS]).await;
        let storage = NoDelete(inner);
        let retention = MetadataLogRetention {
            keep_newest: 0,
            max_age_ms: 0,
        };
        let observed = Mutex::new(Vec::new());
        let report = sweep_metadata_log(&storage, &metadata, "current", &retention, 20 * HOUR_MS, |path, _| {
            observed.lock().unwrap().push(path.to_string());
        })
        .await;

        assert_eq!(report.failed, vec!["s3://b/tbl/metadata/v0.metadata.json"]);
        assert_eq!(report.deleted, vec!["s3://b/tbl/metadata/v1.metadata.json"]);
        assert_eq!(*observed.lock().unwrap(), vec!["s3://b/tbl/metadata/v0.metadata.json"]);
    }

    #[tokio::test]
    async fn spawned_sweep_runs_detached() {
        let storage = Arc::new(InMemoryBackend::new());
        let metadata = seeded_log(storage.as_ref(), &[0]).await;
        let handle = spawn_sweep(
            Arc::clone(&storage),
            metadata,
            "current".to_string(),
            MetadataLogRetention {
                keep_newest: 0,
                max_age_ms: 0,
            },
            HOUR_MS,
        );
        let report = handle.await.unwrap();
        assert_eq!(report.deleted, vec!["s3://b/tbl/metadata/v0.metadata.json"]);
    }

    fn expire_all() -> ExpireSnapshots {
        ExpireSnapshots {
            max_age_ms: None,
            min_snapshots_to_keep: 0,
        }
    }

    fn commit_options() -> CommitOptions {
        CommitOptions {
            max_retries: 1,
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn expire_snapshots_commits_the_pruned_metadata() {
        let storage = InMemoryBackend::new();
        commit(&storage, "s3://b/tbl", &[], &commit_options(), |_| {
            simple_table(2)
                .into_builder()
                // dead snapshot, then the main line
                .add_snapshot(snapshot(1, None, 1, 1_000))?
                .add_snapshot(snapshot(2, None, 2, 2_000))?
                .build()
        })
        .await
        .unwrap();

        let committed =
            expire_snapshots(&storage, "s3://b/tbl", &expire_all(), 10_000, &commit_options())
                .await
                .unwrap();

        // snapshot 1 is unreachable from main, so a new version drops it
        assert_eq!(committed.version, 2);
        let ids: Vec<i64> = committed.metadata.snapshots.iter().map(|s| s.snapshot_id).collect();
        assert_eq!(ids, vec![2]);

        // a table that never existed is a NotFound, not a conflict
        let err = expire_snapshots(
            &storage,
            "s3://b/none",
            &ExpireSnapshots::default(),
            0,
            &commit_options(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn expire_snapshots_skips_the_commit_when_nothing_expires() {
        let storage = InMemoryBackend::new();
        commit(&storage, "s3://b/tbl", &[], &commit_options(), |_| {
            simple_table(2)
                .into_builder()
                .add_snapshot(snapshot(1, None, 1, 1_000))?
                .add_snapshot(snapshot(2, Some(1), 2, 2_000))?
                .build()
        })
        .await
        .unwrap();

        // both snapshots are on main's ancestor chain; nothing to remove
        let committed =
            expire_snapshots(&storage, "s3://b/tbl", &expire_all(), 10_000, &commit_options())
                .await
                .unwrap();

        assert_eq!(committed.version, 1);
        assert_eq!(committed.metadata.snapshots.len(), 2);
        // no new metadata version was written
        assert!(!storage.exists("s3://b/tbl/metadata/v2.metadata.json").await.unwrap());
        assert_eq!(
            storage.get("s3://b/tbl/metadata/version-hint.text").await.unwrap(),
            Some(bytes::Bytes::from_static(b"1"))
        );
    }
}
