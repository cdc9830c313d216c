//! Typed reading and writing of manifest lists: one Avro container file per
//! snapshot, indexing every manifest that belongs to it.

use serde_json::{json, Value as JsonValue};

use crate::avro::{ContainerReader, ContainerWriter, Decoder, Encoder};
use crate::{Error, IcebergResult};

/// What kind of files a manifest tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestContent {
    Data = 0,
    Deletes = 1,
}

impl ManifestContent {
    fn from_ordinal(v: i32) -> IcebergResult<Self> {
        match v {
            0 => Ok(Self::Data),
            1 => Ok(Self::Deletes),
            other => Err(Error::codec(format!("invalid manifest content {other}"))),
        }
    }
}

/// Aggregated value range of one partition field across a whole manifest.
/// Bounds use the canonical bound byte form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSummary {
    pub contains_null: bool,
    pub contains_nan: Option<bool>,
    pub lower_bound: Option<Vec<u8>>,
    pub upper_bound: Option<Vec<u8>>,
}

/// One manifest-list entry: a manifest file with its spec, sequence numbers,
/// per-status counts, and optional per-partition-field summaries.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestFile {
    pub manifest_path: String,
    pub manifest_length: i64,
    pub partition_spec_id: i32,
    pub content: ManifestContent,
    pub sequence_number: i64,
    pub min_sequence_number: i64,
    pub added_snapshot_id: i64,
    pub added_files_count: i32,
    pub existing_files_count: i32,
    pub deleted_files_count: i32,
    pub added_rows_count: i64,
    pub existing_rows_count: i64,
    pub deleted_rows_count: i64,
    pub partitions: Option<Vec<FieldSummary>>,
    pub key_metadata: Option<Vec<u8>>,
    /// v3: first row id assigned to rows added by this manifest.
    pub first_row_id: Option<i64>,
}

/// The manifest-list Avro schema. Fixed fields plus the optional summary
/// array; field ids follow the Iceberg spec's reserved assignments.
pub(crate) fn manifest_list_schema_json(format_version: u8) -> JsonValue {
    fn optional(inner: JsonValue) -> JsonValue {
        json!(["null", inner])
    }
    let field_summary = json!({
        "type": "record",
        "name": "r508",
        "fields": [
            {"name": "contains_null", "type": "boolean", "field-id": 509},
            {"name": "contains_nan", "type": optional(json!("boolean")), "default": null, "field-id": 518},
            {"name": "lower_bound", "type": optional(json!("bytes")), "default": null, "field-id": 510},
            {"name": "upper_bound", "type": optional(json!("bytes")), "default": null, "field-id": 511},
        ],
    });
    let mut fields = vec![
        json!({"name": "manifest_path", "type": "string", "field-id": 500}),
        json!({"name": "manifest_length", "type": "long", "field-id": 501}),
        json!({"name": "partition_spec_id", "type": "int", "field-id": 502}),
        json!({"name": "content", "type": "int", "field-id": 517}),
        json!({"name": "sequence_number", "type": "long", "field-id": 515}),
        json!({"name": "min_sequence_number", "type": "long", "field-id": 516}),
        json!({"name": "added_snapshot_id", "type": "long", "field-id": 503}),
        json!({"name": "added_files_count", "type": "int", "field-id": 504}),
        json!({"name": "existing_files_count", "type": "int", "field-id": 505}),
        json!({"name": "deleted_files_count", "type": "int", "field-id": 506}),
        json!({"name": "added_rows_count", "type": "long", "field-id": 512}),
        json!({"name": "existing_rows_count", "type": "long", "field-id": 513}),
        json!({"name": "deleted_rows_count", "type": "long", "field-id": 514}),
        json!({"name": "partitions", "type": optional(json!({"type": "array", "items": field_summary, "element-id": 508})), "default": null, "field-id": 507}),
        json!({"name": "key_metadata", "type": optional(json!("bytes")), "default": null, "field-id": 519}),
    ];
    if format_version >= 3 {
        fields.push(json!({"name": "first_row_id", "type": optional(json!("long")), "default": null, "field-id": 520}));
    }
    json!({
        "type": "record",
        "name": "manifest_file",
        "fields": fields,
    })
}

fn encode_manifest_file(enc: &mut Encoder, m: &ManifestFile, format_version: u8) {
    enc.write_string(&m.manifest_path);
    enc.write_long(m.manifest_length);
    enc.write_int(m.partition_spec_id);
    enc.write_int(m.content as i32);
    enc.write_long(m.sequence_number);
    enc.write_long(m.min_sequence_number);
    enc.write_long(m.added_snapshot_id);
    enc.write_int(m.added_files_count);
    enc.write_int(m.existing_files_count);
    enc.write_int(m.deleted_files_count);
    enc.write_long(m.added_rows_count);
    enc.write_long(m.existing_rows_count);
    enc.write_long(m.deleted_rows_count);
    enc.write_optional(m.partitions.as_deref(), |e, summaries| {
        e.write_array(summaries.iter(), |e, summary| {
            e.write_boolean(summary.contains_null);
            e.write_optional(summary.contains_nan, |e, v| e.write_boolean(v));
            e.write_optional(summary.lower_bound.as_deref(), |e, v| e.write_bytes(v));
            e.write_optional(summary.upper_bound.as_deref(), |e, v| e.write_bytes(v));
        });
    });
    enc.write_optional(m.key_metadata.as_deref(), |e, v| e.write_bytes(v));
    if format_version >= 3 {
        enc.write_optional(m.first_row_id, |e, v| e.write_long(v));
    }
}

fn decode_manifest_file(dec: &mut Decoder<'_>, format_version: u8) -> IcebergResult<ManifestFile> {
    let manifest_path = dec.read_string()?;
    let manifest_length = dec.read_long()?;
    let partition_spec_id = dec.read_int()?;
    let content = ManifestContent::from_ordinal(dec.read_int()?)?;
    let sequence_number = dec.read_long()?;
    let min_sequence_number = dec.read_long()?;
    let added_snapshot_id = dec.read_long()?;
    let added_files_count = dec.read_int()?;
    let existing_files_count = dec.read_int()?;
    let deleted_files_count = dec.read_int()?;
    let added_rows_count = dec.read_long()?;
    let existing_rows_count = dec.read_long()?;
    let deleted_rows_count = dec.read_long()?;
    let partitions = dec.read_optional(|d| {
        d.read_array(|d| {
            Ok(FieldSummary {
                contains_null: d.read_boolean()?,
                contains_nan: d.read_optional(|d| d.read_boolean())?,
                lower_bound: d.read_optional(|d| d.read_bytes())?,
                upper_bound: d.read_optional(|d| d.read_bytes())?,
            })
        })
    })?;
    let key_metadata = dec.read_optional(|d| d.read_bytes())?;
    let first_row_id = if format_version >= 3 {
        dec.read_optional(|d| d.read_long())?
    } else {
        None
    };
    Ok(ManifestFile {
        manifest_path,
        manifest_length,
        partition_spec_id,
        content,
        sequence_number,
        min_sequence_number,
        added_snapshot_id,
        added_files_count,
        existing_files_count,
        deleted_files_count,
        added_rows_count,
        existing_rows_count,
        deleted_rows_count,
        partitions,
        key_metadata,
        first_row_id,
    })
}

/// Writes the manifest list of one snapshot.
#[derive(Debug)]
pub struct ManifestListWriter {
    format_version: u8,
    block: Encoder,
    entry_count: usize,
    writer: ContainerWriter,
}

impl ManifestListWriter {
    pub fn new(snapshot_id: i64, parent_snapshot_id: Option<i64>, sequence_number: i64, format_version: u8) -> IcebergResult<Self> {
        let avro_schema = manifest_list_schema_json(format_version);
        let mut writer = ContainerWriter::new(&avro_schema.to_string());
        writer.add_metadata("snapshot-id", snapshot_id.to_string())?;
        writer.add_metadata(
            "parent-snapshot-id",
            parent_snapshot_id.map_or_else(|| "null".to_string(), |id| id.to_string()),
        )?;
        writer.add_metadata("sequence-number", sequence_number.to_string())?;
        writer.add_metadata("format-version", format_version.to_string())?;
        Ok(Self {
            format_version,
            block: Encoder::new(),
            entry_count: 0,
            writer,
        })
    }

    pub fn append(&mut self, manifest: &ManifestFile) {
        encode_manifest_file(&mut self.block, manifest, self.format_version);
        self.entry_count += 1;
    }

    pub fn into_bytes(mut self) -> IcebergResult<Vec<u8>> {
        if self.entry_count > 0 {
            let block = std::mem::take(&mut self.block);
            self.writer.append_block(self.entry_count, &block.into_bytes())?;
        }
        Ok(self.writer.into_bytes())
    }
}

/// Reads a manifest list, yielding its entries in file order.
#[derive(Debug)]
pub struct ManifestListReader {
    manifests: Vec<ManifestFile>,
    snapshot_id: Option<i64>,
}

impl ManifestListReader {
    pub fn parse(bytes: &[u8]) -> IcebergResult<Self> {
        let mut reader = ContainerReader::new(bytes)?;
        let format_version: u8 = reader
            .metadata("format-version")
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(2);
        let snapshot_id = reader
            .metadata("snapshot-id")
            .and_then(|b| std::str::from_utf8(b).ok())
            .and_then(|s| s.parse().ok());

        let mut manifests = Vec::new();
        while reader.has_more() {
            let (count, block) = reader.next_block()?;
            let mut dec = Decoder::new(&block);
            for _ in 0..count {
                manifests.push(decode_manifest_file(&mut dec, format_version)?);
            }
            if !dec.is_at_end() {
                return Err(Error::codec("trailing bytes after last manifest in block"));
            }
        }
        Ok(Self {
            manifests,
            snapshot_id,
        })
    }

    pub fn manifests(&self) -> &[ManifestFile] {
        &self.manifests
    }

    pub fn into_manifests(self) -> Vec<ManifestFile> {
        self.manifests
    }

    pub fn snapshot_id(&self) -> Option<i64> {
        self.snapshot_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Literal;

    fn manifest_file() -> ManifestFile {
        ManifestFile {
            manifest_path: "s3://bucket/metadata/m1.avro".to_string(),
            manifest_length: 6543,
            partition_spec_id: 0,
            content: ManifestContent::Data,
            sequence_number: 1,
            min_sequence_number: 1,
            added_snapshot_id: 9,
            added_files_count: 2,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: 150,
            existing_rows_count: 0,
            deleted_rows_count: 0,
            partitions: Some(vec![FieldSummary {
                contains_null: false,
                contains_nan: Some(false),
                lower_bound: Some(Literal::String("eu".into()).to_bound_bytes()),
                upper_bound: Some(Literal::String("us".into()).to_bound_bytes()),
            }]),
            key_metadata: None,
            first_row_id: None,
        }
    }

    #[test]
    fn manifest_list_round_trips_exactly() {
        let mut writer = ManifestListWriter::new(9, None, 1, 2).unwrap();
        let entry = manifest_file();
        writer.append(&entry);
        let bytes = writer.into_bytes().unwrap();

        let reader = ManifestListReader::parse(&bytes).unwrap();
        assert_eq!(reader.snapshot_id(), Some(9));
        assert_eq!(reader.manifests(), &[entry]);
    }

    #[test]
    fn empty_manifest_list_round_trips() {
        let bytes = ManifestListWriter::new(1, None, 1, 2).unwrap().into_bytes().unwrap();
        let reader = ManifestListReader::parse(&bytes).unwrap();
        assert!(reader.manifests().is_empty());
    }

    #[test]
    fn summaries_with_all_nulls_round_trip() {
        let mut writer = ManifestListWriter::new(2, Some(1), 3, 2).unwrap();
        let mut entry = manifest_file();
        entry.partitions = Some(vec![FieldSummary {
            contains_null: true,
            ..FieldSummary::default()
        }]);
        writer.append(&entry);
        let bytes = writer.into_bytes().unwrap();
        assert_eq!(ManifestListReader::parse(&bytes).unwrap().manifests(), &[entry]);
    }

    #[test]
    fn v3_first_row_id_round_trips() {
        let mut writer = ManifestListWriter::new(2, Some(1), 3, 3).unwrap();
        let mut entry = manifest_file();
        entry.first_row_id = Some(4200);
        writer.append(&entry);
        let bytes = writer.into_bytes().unwrap();
        assert_eq!(
            ManifestListReader::parse(&bytes).unwrap().manifests()[0].first_row_id,
            Some(4200)
        );
    }
}
