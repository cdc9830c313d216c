//! The metadata kernel of an Iceberg-compatible table format.
//!
//! This crate implements the four tightly-coupled pieces a table format's
//! metadata layer is made of:
//!
//! - the versioned, immutable [`TableMetadata`] value and the
//!   [`TableMetadataBuilder`] that produces new versions while enforcing
//!   referential invariants ([`table_metadata`]);
//! - the optimistic commit protocol that publishes those versions under
//!   concurrent writers ([`commit`]), on top of a small capability-flagged
//!   [`storage`] abstraction;
//! - the partition transform engine ([`transform`], [`partition`]) that
//!   derives partition values deterministically enough to interoperate with
//!   other implementations;
//! - the Avro binary codec ([`avro`]) and the typed manifest and
//!   manifest-list readers and writers built on it ([`manifest`],
//!   [`manifest_list`]).
//!
//! Everything outside these concerns (catalog HTTP surfaces, data-file IO,
//! query planning) is a collaborator, reached only through [`storage`].

pub mod avro;
pub mod commit;
pub mod error;
pub mod maintenance;
pub mod manifest;
pub mod manifest_list;
pub mod partition;
pub mod path;
pub mod schema;
pub mod snapshot;
pub mod storage;
pub mod table_metadata;
pub mod transform;
pub mod value;

pub use error::{Error, IcebergResult};

pub use commit::{commit, load_current, CommitBase, CommitOptions, CommitRequirement, Committed};
pub use partition::{PartitionField, PartitionSpec, PartitionSpecBuilder};
pub use schema::{NestedField, PrimitiveType, Properties, Schema, Type};
pub use snapshot::{Operation, RefType, Snapshot, SnapshotReference, Summary, MAIN_BRANCH};
pub use storage::{InMemoryBackend, StorageBackend, StorageCapabilities};
pub use table_metadata::{ExpireSnapshots, TableMetadata, TableMetadataBuilder};
pub use transform::Transform;
pub use value::Literal;
