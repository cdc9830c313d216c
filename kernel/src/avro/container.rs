//! The Avro object container file format: magic, file metadata, and
//! sync-delimited data blocks.

use rand::RngCore;

use crate::avro::{Decoder, Encoder};
use crate::{Error, IcebergResult};

/// The 4-byte magic opening every container file: `Obj` + format version 1.
pub const AVRO_MAGIC: [u8; 4] = [b'O', b'b', b'j', 1];

/// Length of the random sync marker separating blocks.
pub const SYNC_MARKER_LEN: usize = 16;

/// Writes an Avro object container file with the `null` codec.
///
/// The file metadata always carries `avro.schema` (the JSON schema of the
/// contained records) and `avro.codec`; callers add their own entries
/// (Iceberg stores `schema`, `partition-spec-id`, `format-version`, ... for
/// manifests) before the first block is appended.
#[derive(Debug)]
pub struct ContainerWriter {
    buf: Encoder,
    sync_marker: [u8; SYNC_MARKER_LEN],
    header_written: bool,
    metadata: Vec<(String, Vec<u8>)>,
}

impl ContainerWriter {
    pub fn new(schema_json: &str) -> Self {
        let mut sync_marker = [0u8; SYNC_MARKER_LEN];
        rand::thread_rng().fill_bytes(&mut sync_marker);
        Self {
            buf: Encoder::new(),
            sync_marker,
            header_written: false,
            metadata: vec![
                ("avro.schema".to_string(), schema_json.as_bytes().to_vec()),
                ("avro.codec".to_string(), b"null".to_vec()),
            ],
        }
    }

    /// Adds a caller-supplied file-metadata entry. Must be called before the
    /// first block.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> IcebergResult<()> {
        if self.header_written {
            return Err(Error::generic(
                "container metadata must be added before the first block",
            ));
        }
        self.metadata.push((key.into(), value.into()));
        Ok(())
    }

    fn write_header(&mut self) {
        self.buf.write_fixed(&AVRO_MAGIC);
        let entries = self
            .metadata
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()));
        self.buf.write_map(entries, |e, v| e.write_bytes(v));
        self.buf.write_fixed(&self.sync_marker);
        self.header_written = true;
    }

    /// Appends one data block: `object_count` already-encoded records in
    /// `block_bytes`, followed by the sync marker.
    pub fn append_block(&mut self, object_count: usize, block_bytes: &[u8]) -> IcebergResult<()> {
        if object_count == 0 {
            return Err(Error::generic("container blocks must hold at least one object"));
        }
        if !self.header_written {
            self.write_header();
        }
        self.buf.write_long(object_count as i64);
        self.buf.write_bytes(block_bytes);
        self.buf.write_fixed(&self.sync_marker);
        Ok(())
    }

    /// Finishes the file. A file with no blocks still gets its header, so an
    /// empty manifest list round-trips.
    pub fn into_bytes(mut self) -> Vec<u8> {
        if !self.header_written {
            self.write_header();
        }
        self.buf.into_bytes()
    }
}

/// Reads an Avro object container file produced by [`ContainerWriter`] or
/// any spec-conforming writer using the `null` codec.
#[derive(Debug)]
pub struct ContainerReader<'a> {
    decoder: Decoder<'a>,
    metadata: Vec<(String, Vec<u8>)>,
    sync_marker: [u8; SYNC_MARKER_LEN],
}

impl<'a> ContainerReader<'a> {
    pub fn new(bytes: &'a [u8]) -> IcebergResult<Self> {
        let mut decoder = Decoder::new(bytes);
        let magic = decoder.read_fixed(AVRO_MAGIC.len())?;
        if magic != AVRO_MAGIC {
            return Err(Error::codec("bad container magic; not an Avro file"));
        }
        let metadata = decoder.read_map(|d| d.read_bytes())?;
        let codec = metadata
            .iter()
            .find(|(k, _)| k == "avro.codec")
            .map(|(_, v)| v.as_slice());
        match codec {
            None | Some(b"null") => {}
            Some(other) => {
                return Err(Error::codec(format!(
                    "unsupported avro.codec '{}'",
                    String::from_utf8_lossy(other)
                )))
            }
        }
        let sync_marker: [u8; SYNC_MARKER_LEN] = decoder
            .read_fixed(SYNC_MARKER_LEN)?
            .try_into()
            .expect("read_fixed returned the requested length");
        Ok(Self {
            decoder,
            metadata,
            sync_marker,
        })
    }

    /// The file-metadata value for `key`, if present.
    pub fn metadata(&self, key: &str) -> Option<&[u8]> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// The embedded `avro.schema` JSON.
    pub fn schema_json(&self) -> IcebergResult<&str> {
        let bytes = self
            .metadata("avro.schema")
            .ok_or_else(|| Error::codec("container file missing avro.schema"))?;
        std::str::from_utf8(bytes).map_err(|_| Error::codec("avro.schema is not valid UTF-8"))
    }

    /// True while at least one more block remains.
    pub fn has_more(&self) -> bool {
        !self.decoder.is_at_end()
    }

    /// Reads the next `(object_count, block_bytes)` pair, verifying the
    /// trailing sync marker.
    pub fn next_block(&mut self) -> IcebergResult<(usize, Vec<u8>)> {
        let count = self.decoder.read_long()?;
        let count = usize::try_from(count)
            .map_err(|_| Error::codec(format!("negative object count {count} in block")))?;
        let block = self.decoder.read_bytes()?;
        let sync = self.decoder.read_fixed(SYNC_MARKER_LEN)?;
        if sync != self.sync_marker {
            return Err(Error::codec("sync marker mismatch; container file corrupt"));
        }
        Ok((count, block))
    }
}
