//! Utilities for the persisted metadata layout:
//! `{table}/metadata/v{N}.metadata.json` files and the
//! `{table}/metadata/version-hint.text` pointer.

use std::str::FromStr;

use url::Url;
use uuid::Uuid;

use crate::{Error, IcebergResult};

pub const METADATA_DIR: &str = "metadata";
pub const VERSION_HINT_FILE: &str = "version-hint.text";
const METADATA_SUFFIX: &str = ".metadata.json";

fn join(table_location: &str, rest: &str) -> String {
    format!("{}/{rest}", table_location.trim_end_matches('/'))
}

/// Validates a table location: an absolute URL (`s3://bucket/db/table`,
/// `file:///warehouse/db/table`, ...) with path segments to hang the
/// `metadata/` directory off.
pub fn parse_table_location(location: &str) -> IcebergResult<Url> {
    let url = Url::parse(location)
        .map_err(|e| Error::InvalidTableLocation(format!("'{location}': {e}")))?;
    if url.cannot_be_a_base() {
        return Err(Error::InvalidTableLocation(format!(
            "'{location}' has no path segments"
        )));
    }
    Ok(url)
}

/// The path this implementation writes version `N` of a table's metadata to.
pub fn metadata_file_path(table_location: &str, version: u64) -> String {
    join(
        table_location,
        &format!("{METADATA_DIR}/v{version}{METADATA_SUFFIX}"),
    )
}

pub fn version_hint_path(table_location: &str) -> String {
    join(table_location, &format!("{METADATA_DIR}/{VERSION_HINT_FILE}"))
}

/// The directory prefix all of a table's metadata files live under.
pub fn metadata_prefix(table_location: &str) -> String {
    join(table_location, METADATA_DIR)
}

/// A recognized metadata file name. Both writer conventions parse:
/// `v{N}.metadata.json` and `{N}-{uuid}.metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMetadataPath {
    pub version: u64,
    pub file_uuid: Option<Uuid>,
}

impl ParsedMetadataPath {
    /// Parses the final segment of `path`. Returns `None` for paths that are
    /// not metadata files at all (hint files, manifests); returns an error
    /// only for names that claim the metadata suffix but are malformed.
    pub fn try_from(path: &str) -> IcebergResult<Option<Self>> {
        let filename = path.rsplit('/').next().unwrap_or(path);
        let Some(stem) = filename.strip_suffix(METADATA_SUFFIX) else {
            return Ok(None);
        };
        if let Some(version) = stem.strip_prefix('v') {
            let version = parse_version(version, path)?;
            return Ok(Some(Self {
                version,
                file_uuid: None,
            }));
        }
        let Some((version, uuid)) = stem.split_once('-') else {
            return Err(Error::validation(format!(
                "unrecognized metadata file name '{filename}'"
            )));
        };
        let version = parse_version(version, path)?;
        let uuid = Uuid::from_str(uuid).map_err(|_| {
            Error::validation(format!("bad uuid in metadata file name '{filename}'"))
        })?;
        Ok(Some(Self {
            version,
            file_uuid: Some(uuid),
        }))
    }
}

fn parse_version(value: &str, path: &str) -> IcebergResult<u64> {
    value
        .parse()
        .map_err(|_| Error::validation(format!("bad version number in metadata path '{path}'")))
}

/// The content of a `version-hint.text` file: either a bare version number
/// or the full path of the current metadata file. Readers accept both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionHint {
    Version(u64),
    MetadataPath(String),
}

impl VersionHint {
    pub fn parse(bytes: &[u8]) -> IcebergResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::validation("version hint is not valid UTF-8"))?
            .trim();
        if text.is_empty() {
            return Err(Error::validation("version hint file is empty"));
        }
        if let Ok(version) = text.parse() {
            return Ok(VersionHint::Version(version));
        }
        Ok(VersionHint::MetadataPath(text.to_string()))
    }

    /// The version this hint designates, extracted from the path form when
    /// necessary.
    pub fn version(&self) -> IcebergResult<u64> {
        match self {
            VersionHint::Version(v) => Ok(*v),
            VersionHint::MetadataPath(path) => ParsedMetadataPath::try_from(path)?
                .map(|parsed| parsed.version)
                .ok_or_else(|| {
                    Error::validation(format!("version hint '{path}' is not a metadata path"))
                }),
        }
    }

    /// The metadata file path this hint resolves to under `table_location`.
    pub fn metadata_path(&self, table_location: &str) -> String {
        match self {
            VersionHint::Version(v) => metadata_file_path(table_location, *v),
            VersionHint::MetadataPath(path) => path.clone(),
        }
    }
}
