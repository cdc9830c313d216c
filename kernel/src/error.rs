//! Defines [`Error`], the crate-wide error type, and the [`IcebergResult`] alias.

/// A common result type for the crate, with [`Error`] as the default error type.
pub type IcebergResult<T, E = Error> = std::result::Result<T, E>;

/// All errors surfaced by the metadata kernel.
///
/// `NotFound` and `Validation` are caller mistakes and are never retried.
/// `CommitConflict` is internal to the commit protocol's retry loop; callers
/// only ever observe `CommitRetryExhausted` once the budget is spent.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A referenced schema, partition spec, sort order, snapshot, or ref id
    /// does not exist in the metadata it was looked up in.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input: an unparseable transform spec, a transform missing
    /// its required argument, a bad UUID, an invariant-violating builder call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Another writer won the race for the version this commit was based on.
    /// Retried internally by the commit protocol.
    #[error("Commit conflict at version {version}: {message}")]
    CommitConflict { version: u64, message: String },

    /// The commit conflicted past the configured retry budget.
    #[error("Commit failed after {attempts} attempts: {last_error}")]
    CommitRetryExhausted {
        attempts: u32,
        #[source]
        last_error: Box<Error>,
    },

    /// A non-conflict failure occurred after one or more files had already
    /// been written. Carries the orphaned paths and whether the best-effort
    /// cleanup removed them.
    #[error("Commit transaction failed ({}): {source}", if *.cleanup_ok { "orphaned files cleaned up" } else { "cleanup incomplete" })]
    CommitTransactionFailure {
        written: Vec<String>,
        cleanup_ok: bool,
        #[source]
        source: Box<Error>,
    },

    /// Malformed Avro bytes: truncated buffer, invalid union branch, bad
    /// container magic, sync-marker mismatch, or a schema/data mismatch.
    #[error("Avro format error: {0}")]
    CodecFormat(String),

    /// An error reported by the storage backend.
    #[error("Storage error for '{path}': {message}")]
    Storage { path: String, message: String },

    /// Failure parsing or producing metadata JSON.
    #[error("Error interacting with JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The table location could not be interpreted as a URL.
    #[error("Invalid table location: {0}")]
    InvalidTableLocation(String),

    /// An unexpected condition the kernel has no more specific kind for.
    #[error("Generic error: {0}")]
    Generic(String),
}

// Convenience constructors keep call sites short (`Error::not_found(...)`)
// and let the payloads change without touching every caller.
impl Error {
    pub fn not_found(msg: impl ToString) -> Self {
        Self::NotFound(msg.to_string())
    }

    pub fn validation(msg: impl ToString) -> Self {
        Self::Validation(msg.to_string())
    }

    pub fn commit_conflict(version: u64, msg: impl ToString) -> Self {
        Self::CommitConflict {
            version,
            message: msg.to_string(),
        }
    }

    pub fn codec(msg: impl ToString) -> Self {
        Self::CodecFormat(msg.to_string())
    }

    pub fn storage(path: impl ToString, msg: impl ToString) -> Self {
        Self::Storage {
            path: path.to_string(),
            message: msg.to_string(),
        }
    }

    pub fn generic(msg: impl ToString) -> Self {
        Self::Generic(msg.to_string())
    }

    /// True only for [`Error::CommitConflict`]; the retry loop keys off this.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::CommitConflict { .. })
    }
}
