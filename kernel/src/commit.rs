//! The optimistic commit protocol that publishes new metadata versions.
//!
//! Each attempt walks load-version, build-candidate, write-metadata-file,
//! update-version-pointer. Conflicts (another writer won the version this
//! attempt was based on) loop back to load-version with exponential backoff
//! until the retry budget runs out. Correctness under contention rests on
//! the backend's `put_if_absent` for the metadata file; the pointer update
//! is convergence, not the source of truth.

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::path::{metadata_file_path, parse_table_location, version_hint_path, VersionHint};
use crate::storage::StorageBackend;
use crate::table_metadata::TableMetadata;
use crate::{Error, IcebergResult};

/// Retry budget and backoff shape for one commit call.
#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// Conflict retries after the first attempt. Zero means single-shot.
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(2),
        }
    }
}

impl CommitOptions {
    /// The delay before retry number `attempt` (zero-based): the base doubled
    /// per attempt, capped, then scaled by `jitter` in `[0, 1]` to land
    /// symmetrically in `[delay/2, delay*3/2]`. Pure so the shape is
    /// testable; callers sample `jitter` from a live rng.
    pub fn backoff_duration(&self, attempt: u32, jitter: f64) -> Duration {
        let doubled = self
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt));
        let capped = doubled.min(self.backoff_cap);
        capped.mul_f64(0.5 + jitter.clamp(0.0, 1.0))
    }
}

/// An assertion about the table state a commit must be applied on top of.
/// Violations surface as [`Error::CommitConflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitRequirement {
    AssertTableUuid(Uuid),
    AssertCurrentSchemaId(i32),
    AssertDefaultSpecId(i32),
    /// The named ref must point at the given snapshot; `None` asserts the
    /// ref does not exist (including the table itself not existing yet).
    AssertRefSnapshotId {
        ref_name: String,
        snapshot_id: Option<i64>,
    },
}

impl CommitRequirement {
    fn check(&self, base_version: u64, base: Option<&TableMetadata>) -> IcebergResult<()> {
        let fail = |message: String| Err(Error::commit_conflict(base_version, message));
        match self {
            CommitRequirement::AssertTableUuid(expected) => match base {
                Some(m) if m.table_uuid == *expected => Ok(()),
                Some(m) => fail(format!(
                    "requirement failed: table uuid is {}, expected {expected}",
                    m.table_uuid
                )),
                None => fail("requirement failed: table does not exist".to_string()),
            },
            CommitRequirement::AssertCurrentSchemaId(expected) => match base {
                Some(m) if m.current_schema_id == *expected => Ok(()),
                Some(m) => fail(format!(
                    "requirement failed: current schema id is {}, expected {expected}",
                    m.current_schema_id
                )),
                None => fail("requirement failed: table does not exist".to_string()),
            },
            CommitRequirement::AssertDefaultSpecId(expected) => match base {
                Some(m) if m.default_spec_id == *expected => Ok(()),
                Some(m) => fail(format!(
                    "requirement failed: default spec id is {}, expected {expected}",
                    m.default_spec_id
                )),
                None => fail("requirement failed: table does not exist".to_string()),
            },
            CommitRequirement::AssertRefSnapshotId { ref_name, snapshot_id } => {
                let actual = base.and_then(|m| m.ref_by_name(ref_name)).map(|r| r.snapshot_id);
                if actual == *snapshot_id {
                    Ok(())
                } else {
                    fail(format!(
                        "requirement failed: ref '{ref_name}' is at {actual:?}, expected {snapshot_id:?}"
                    ))
                }
            }
        }
    }
}

/// A successfully published metadata version.
#[derive(Debug)]
pub struct Committed {
    pub version: u64,
    pub metadata_path: String,
    pub metadata: TableMetadata,
}

/// The loaded state a commit attempt is based on. Handed to the build
/// closure so it can rebase correctly on every attempt, including recording
/// `metadata_path` as the superseded file in the metadata log.
#[derive(Debug, Clone)]
pub struct CommitBase {
    pub version: u64,
    pub metadata_path: String,
    pub metadata: TableMetadata,
}

/// What `LoadVersion` observed, carried through the attempt so the pointer
/// update can swap against exactly the bytes it read.
#[derive(Debug)]
struct LoadedVersion {
    hint_bytes: Bytes,
    base: CommitBase,
}

/// Reads the current version pointer and the metadata it designates, or
/// `None` for a table location with no pointer yet.
pub async fn load_current<S: StorageBackend + ?Sized>(
    storage: &S,
    table_location: &str,
) -> IcebergResult<Option<CommitBase>> {
    parse_table_location(table_location)?;
    Ok(load_version(storage, table_location)
        .await?
        .map(|loaded| loaded.base))
}

async fn load_version<S: StorageBackend + ?Sized>(
    storage: &S,
    table_location: &str,
) -> IcebergResult<Option<LoadedVersion>> {
    let hint_path = version_hint_path(table_location);
    let Some(hint_bytes) = storage.get(&hint_path).await? else {
        return Ok(None);
    };
    let hint = VersionHint::parse(&hint_bytes)?;
    let version = hint.version()?;
    let metadata_path = hint.metadata_path(table_location);
    let bytes = storage.get(&metadata_path).await?.ok_or_else(|| {
        Error::not_found(format!(
            "version pointer designates '{metadata_path}' but no such file exists"
        ))
    })?;
    let metadata = TableMetadata::from_json_bytes(&bytes)?;
    Ok(Some(LoadedVersion {
        hint_bytes,
        base: CommitBase {
            version,
            metadata_path,
            metadata,
        },
    }))
}

/// Runs one full commit: loads the current version, checks `requirements`,
/// asks `build` for the candidate metadata, and publishes it, retrying
/// conflicts up to the budget in `options`.
///
/// `build` receives the loaded [`CommitBase`] (`None` when the table does
/// not exist yet) and returns the complete next metadata value. It may be
/// called once per attempt, so it must be safe to re-run against a newer
/// base; anything derived from the base, such as a superseded-file entry in
/// the metadata log, must come from the argument, not from state captured
/// before the call.
#[instrument(skip_all, fields(table = table_location))]
pub async fn commit<S, F>(
    storage: &S,
    table_location: &str,
    requirements: &[CommitRequirement],
    options: &CommitOptions,
    mut build: F,
) -> IcebergResult<Committed>
where
    S: StorageBackend + ?Sized,
    F: FnMut(Option<&CommitBase>) -> IcebergResult<TableMetadata>,
{
    parse_table_location(table_location)?;
    let mut attempt = 0;
    loop {
        match try_commit(storage, table_location, requirements, &mut build).await {
            Ok(committed) => {
                debug!(
                    version = committed.version,
                    attempts = attempt + 1,
                    "commit succeeded"
                );
                return Ok(committed);
            }
            Err(err) if err.is_conflict() => {
                if attempt >= options.max_retries {
                    return Err(Error::CommitRetryExhausted {
                        attempts: attempt + 1,
                        last_error: Box::new(err),
                    });
                }
                let jitter = rand::thread_rng().gen_range(0.0..=1.0);
                let delay = options.backoff_duration(attempt, jitter);
                debug!(attempt, ?delay, %err, "commit conflict, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

async fn try_commit<S, F>(
    storage: &S,
    table_location: &str,
    requirements: &[CommitRequirement],
    build: &mut F,
) -> IcebergResult<Committed>
where
    S: StorageBackend + ?Sized,
    F: FnMut(Option<&CommitBase>) -> IcebergResult<TableMetadata>,
{
    // LoadVersion
    let loaded = load_version(storage, table_location).await?;
    let base = loaded.as_ref().map(|l| &l.base);
    let base_version = base.map_or(0, |b| b.version);

    for requirement in requirements {
        requirement.check(base_version, base.map(|b| &b.metadata))?;
    }

    // BuildCandidate
    let candidate = build(base)?;
    candidate.validate()?;
    let json = candidate.to_json_bytes()?;

    // WriteMetadataFile. The trait's default put_if_absent is the documented
    // exists-then-put fallback for backends without the native primitive.
    let next_version = base_version + 1;
    let metadata_path = metadata_file_path(table_location, next_version);
    let created = storage
        .put_if_absent(&metadata_path, Bytes::from(json))
        .await?;
    if !created {
        return Err(Error::commit_conflict(
            base_version,
            format!("metadata file '{metadata_path}' already exists"),
        ));
    }

    // UpdateVersionPointer. The metadata file write above already decided
    // the race; a lost swap here means the pointer moved under us, and the
    // unconditional put converges it onto the file we own.
    let hint_path = version_hint_path(table_location);
    let new_hint = Bytes::from(next_version.to_string());
    let expected = loaded.as_ref().map(|l| &l.hint_bytes);
    let pointer_result = async {
        let swapped = storage
            .compare_and_swap(&hint_path, expected, new_hint.clone())
            .await?;
        if !swapped {
            warn!(version = next_version, "version pointer moved during commit, overwriting");
            storage.put(&hint_path, new_hint).await?;
        }
        Ok::<_, Error>(())
    }
    .await;

    if let Err(err) = pointer_result {
        let cleanup_ok = storage.delete(&metadata_path).await.is_ok();
        if !cleanup_ok {
            warn!(path = %metadata_path, "failed to clean up orphaned metadata file");
        }
        return Err(Error::CommitTransactionFailure {
            written: vec![metadata_path],
            cleanup_ok,
            source: Box::new(err),
        });
    }

    Ok(Committed {
        version: next_version,
        metadata_path,
        metadata: candidate,
    })
}
