//! Typed reading and writing of manifest files: Avro container files whose
//! records are [`ManifestEntry`] values wrapping [`DataFile`]s.
//!
//! Field order is fixed by the Iceberg spec and must never change — other
//! engines decode these files positionally against the embedded schema.
//! Optional fields are `["null", T]` unions with branch 0 for null.

use serde_json::{json, Value as JsonValue};

use crate::avro::{ContainerReader, ContainerWriter, Decoder, Encoder};
use crate::partition::{PartitionData, PartitionField, PartitionSpec};
use crate::schema::{PrimitiveType, Schema, Type};
use crate::value::Literal;
use crate::{Error, IcebergResult};

/// What a tracked file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFileContent {
    Data = 0,
    PositionDeletes = 1,
    EqualityDeletes = 2,
}

impl DataFileContent {
    fn from_ordinal(v: i32) -> IcebergResult<Self> {
        match v {
            0 => Ok(Self::Data),
            1 => Ok(Self::PositionDeletes),
            2 => Ok(Self::EqualityDeletes),
            other => Err(Error::codec(format!("invalid data file content {other}"))),
        }
    }
}

/// Tracking status of an entry within its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestEntryStatus {
    Existing = 0,
    Added = 1,
    Deleted = 2,
}

impl ManifestEntryStatus {
    fn from_ordinal(v: i32) -> IcebergResult<Self> {
        match v {
            0 => Ok(Self::Existing),
            1 => Ok(Self::Added),
            2 => Ok(Self::Deleted),
            other => Err(Error::codec(format!("invalid entry status {other}"))),
        }
    }
}

/// On-disk format of a data file, spelled uppercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum FileFormat {
    Avro,
    Orc,
    Parquet,
}

/// Integer-keyed statistics pairs (`column_sizes`, `value_counts`, ...).
pub type StatsMap<T> = Vec<(i32, T)>;

/// A tracked data or delete file with its partition values and statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub content: DataFileContent,
    pub file_path: String,
    pub file_format: FileFormat,
    pub partition: PartitionData,
    pub record_count: i64,
    pub file_size_in_bytes: i64,
    pub column_sizes: Option<StatsMap<i64>>,
    pub value_counts: Option<StatsMap<i64>>,
    pub null_value_counts: Option<StatsMap<i64>>,
    pub nan_value_counts: Option<StatsMap<i64>>,
    /// Lower bounds per column, in the canonical bound byte form
    /// ([`Literal::to_bound_bytes`]).
    pub lower_bounds: Option<StatsMap<Vec<u8>>>,
    pub upper_bounds: Option<StatsMap<Vec<u8>>>,
    pub key_metadata: Option<Vec<u8>>,
    pub split_offsets: Option<Vec<i64>>,
    pub equality_ids: Option<Vec<i32>>,
    pub sort_order_id: Option<i32>,
    /// v3: first row id assigned to this file's rows.
    pub first_row_id: Option<i64>,
    /// v3 deletion vectors: the data file this delete applies to.
    pub referenced_data_file: Option<String>,
    /// v3 deletion vectors: offset of the vector blob within the file.
    pub content_offset: Option<i64>,
    /// v3 deletion vectors: length of the vector blob.
    pub content_size_in_bytes: Option<i64>,
}

impl DataFile {
    /// A plain data file with no statistics; the common starting point in
    /// tests and simple writers.
    pub fn data(file_path: impl Into<String>, file_format: FileFormat, record_count: i64, file_size_in_bytes: i64) -> Self {
        Self {
            content: DataFileContent::Data,
            file_path: file_path.into(),
            file_format,
            partition: Vec::new(),
            record_count,
            file_size_in_bytes,
            column_sizes: None,
            value_counts: None,
            null_value_counts: None,
            nan_value_counts: None,
            lower_bounds: None,
            upper_bounds: None,
            key_metadata: None,
            split_offsets: None,
            equality_ids: None,
            sort_order_id: None,
            first_row_id: None,
            referenced_data_file: None,
            content_offset: None,
            content_size_in_bytes: None,
        }
    }
}

/// One manifest row: a [`DataFile`] plus tracking status, the committing
/// snapshot, and the commit's sequence numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub status: ManifestEntryStatus,
    pub snapshot_id: Option<i64>,
    pub sequence_number: Option<i64>,
    pub file_sequence_number: Option<i64>,
    pub data_file: DataFile,
}

/// The physical Avro type a partition field encodes as, derived from its
/// transform's result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhysicalType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
}

impl PhysicalType {
    fn of_source(source: &PrimitiveType) -> Self {
        match source {
            PrimitiveType::Boolean => Self::Boolean,
            PrimitiveType::Int | PrimitiveType::Date => Self::Int,
            PrimitiveType::Long
            | PrimitiveType::Time
            | PrimitiveType::Timestamp
            | PrimitiveType::Timestamptz => Self::Long,
            PrimitiveType::Float => Self::Float,
            PrimitiveType::Double => Self::Double,
            PrimitiveType::String | PrimitiveType::Uuid => Self::String,
            PrimitiveType::Binary | PrimitiveType::Fixed(_) | PrimitiveType::Decimal { .. } => {
                Self::Bytes
            }
        }
    }

    fn avro_name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
            Self::Bytes => "bytes",
        }
    }

    fn encode(self, enc: &mut Encoder, value: &Literal) -> IcebergResult<()> {
        match (self, value) {
            (Self::Boolean, Literal::Boolean(v)) => enc.write_boolean(*v),
            (Self::Int, Literal::Int(v)) => enc.write_int(*v),
            (Self::Long, Literal::Long(v)) => enc.write_long(*v),
            (Self::Long, Literal::Int(v)) => enc.write_long(i64::from(*v)),
            (Self::Float, Literal::Float(v)) => enc.write_float(*v),
            (Self::Double, Literal::Double(v)) => enc.write_double(*v),
            (Self::String, Literal::String(v)) => enc.write_string(v),
            (Self::String, Literal::Uuid(v)) => enc.write_string(&v.to_string()),
            (Self::Bytes, Literal::Binary(v)) => enc.write_bytes(v),
            (ty, value) => {
                return Err(Error::codec(format!(
                    "partition value {value:?} does not match its {ty:?} schema type"
                )))
            }
        }
        Ok(())
    }

    fn decode(self, dec: &mut Decoder<'_>) -> IcebergResult<Literal> {
        Ok(match self {
            Self::Boolean => Literal::Boolean(dec.read_boolean()?),
            Self::Int => Literal::Int(dec.read_int()?),
            Self::Long => Literal::Long(dec.read_long()?),
            Self::Float => Literal::Float(dec.read_float()?),
            Self::Double => Literal::Double(dec.read_double()?),
            Self::String => Literal::String(dec.read_string()?),
            Self::Bytes => Literal::Binary(dec.read_bytes()?),
        })
    }
}

/// The partition sub-record's shape: name, field id, and physical type per
/// partition field, in spec order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PartitionType {
    pub(crate) fields: Vec<(PartitionField, PhysicalType)>,
}

impl PartitionType {
    /// Derives the partition record type from a spec and the schema its
    /// source ids refer to. Bucket and temporal transforms yield `int`;
    /// identity, truncate, and void keep the source's physical type.
    pub(crate) fn derive(spec: &PartitionSpec, schema: &Schema) -> IcebergResult<Self> {
        let fields = spec
            .fields
            .iter()
            .map(|field| {
                let source = schema.require_field(field.source_id)?;
                let Type::Primitive(primitive) = &source.field_type else {
                    return Err(Error::validation(format!(
                        "partition source '{}' must be a primitive column",
                        source.name
                    )));
                };
                let physical = if field.transform.preserves_source_type()
                    || field.transform == crate::transform::Transform::Void
                {
                    PhysicalType::of_source(primitive)
                } else {
                    PhysicalType::Int
                };
                Ok((field.clone(), physical))
            })
            .collect::<IcebergResult<_>>()?;
        Ok(Self { fields })
    }

    /// The Avro record schema of the partition sub-record. Every field is a
    /// `["null", T]` union because any transform can produce null.
    fn schema_json(&self) -> JsonValue {
        let fields: Vec<JsonValue> = self
            .fields
            .iter()
            .map(|(field, physical)| {
                json!({
                    "name": field.name,
                    "type": ["null", physical.avro_name()],
                    "default": null,
                    "field-id": field.field_id,
                })
            })
            .collect();
        json!({
            "type": "record",
            "name": "r102",
            "fields": fields,
        })
    }

    fn encode(&self, enc: &mut Encoder, data: &PartitionData) -> IcebergResult<()> {
        if data.len() != self.fields.len() {
            return Err(Error::codec(format!(
                "partition data has {} values but the spec has {} fields",
                data.len(),
                self.fields.len()
            )));
        }
        for ((_, value), (_, physical)) in data.iter().zip(&self.fields) {
            match value {
                None => enc.write_union_branch(0),
                Some(v) => {
                    enc.write_union_branch(1);
                    physical.encode(enc, v)?;
                }
            }
        }
        Ok(())
    }

    fn decode(&self, dec: &mut Decoder<'_>) -> IcebergResult<PartitionData> {
        self.fields
            .iter()
            .map(|(field, physical)| {
                let value = dec.read_optional(|d| physical.decode(d))?;
                Ok((field.name.clone(), value))
            })
            .collect()
    }
}

fn optional_union(inner: JsonValue) -> JsonValue {
    json!(["null", inner])
}

fn long_stats_map(name: &str, id: i32, key_id: i32, value_id: i32) -> JsonValue {
    stats_map(name, id, key_id, value_id, json!("long"))
}

fn bytes_stats_map(name: &str, id: i32, key_id: i32, value_id: i32) -> JsonValue {
    stats_map(name, id, key_id, value_id, json!("bytes"))
}

// Stats maps encode as arrays of key/value records, Iceberg's `k{N}_v{M}`
// convention, so readers without map support still get typed keys.
fn stats_map(name: &str, id: i32, key_id: i32, value_id: i32, value_type: JsonValue) -> JsonValue {
    json!({
        "name": name,
        "type": ["null", {
            "type": "array",
            "items": {
                "type": "record",
                "name": format!("k{key_id}_v{value_id}"),
                "fields": [
                    {"name": "key", "type": "int", "field-id": key_id},
                    {"name": "value", "type": value_type, "field-id": value_id},
                ],
            },
        }],
        "default": null,
        "field-id": id,
    })
}

/// The Avro schema of a complete manifest entry for the given partition type
/// and format version. Field ids follow the Iceberg spec's reserved
/// assignments.
pub(crate) fn manifest_entry_schema_json(partition_type: &PartitionType, format_version: u8) -> JsonValue {
    let mut data_file_fields = vec![
        json!({"name": "content", "type": "int", "field-id": 134}),
        json!({"name": "file_path", "type": "string", "field-id": 100}),
        json!({"name": "file_format", "type": "string", "field-id": 101}),
        json!({"name": "partition", "type": partition_type.schema_json(), "field-id": 102}),
        json!({"name": "record_count", "type": "long", "field-id": 103}),
        json!({"name": "file_size_in_bytes", "type": "long", "field-id": 104}),
        long_stats_map("column_sizes", 108, 117, 118),
        long_stats_map("value_counts", 109, 119, 120),
        long_stats_map("null_value_counts", 110, 121, 122),
        long_stats_map("nan_value_counts", 137, 138, 139),
        bytes_stats_map("lower_bounds", 125, 126, 127),
        bytes_stats_map("upper_bounds", 128, 129, 130),
        json!({"name": "key_metadata", "type": optional_union(json!("bytes")), "default": null, "field-id": 131}),
        json!({"name": "split_offsets", "type": optional_union(json!({"type": "array", "items": "long", "element-id": 133})), "default": null, "field-id": 132}),
        json!({"name": "equality_ids", "type": optional_union(json!({"type": "array", "items": "int", "element-id": 136})), "default": null, "field-id": 135}),
        json!({"name": "sort_order_id", "type": optional_union(json!("int")), "default": null, "field-id": 140}),
    ];
    if format_version >= 3 {
        data_file_fields.extend([
            json!({"name": "first_row_id", "type": optional_union(json!("long")), "default": null, "field-id": 142}),
            json!({"name": "referenced_data_file", "type": optional_union(json!("string")), "default": null, "field-id": 143}),
            json!({"name": "content_offset", "type": optional_union(json!("long")), "default": null, "field-id": 144}),
            json!({"name": "content_size_in_bytes", "type": optional_union(json!("long")), "default": null, "field-id": 145}),
        ]);
    }
    json!({
        "type": "record",
        "name": "manifest_entry",
        "fields": [
            {"name": "status", "type": "int", "field-id": 0},
            {"name": "snapshot_id", "type": optional_union(json!("long")), "default": null, "field-id": 1},
            {"name": "sequence_number", "type": optional_union(json!("long")), "default": null, "field-id": 3},
            {"name": "file_sequence_number", "type": optional_union(json!("long")), "default": null, "field-id": 4},
            {"name": "data_file", "type": {
                "type": "record",
                "name": "r2",
                "fields": data_file_fields,
            }, "field-id": 2},
        ],
    })
}

fn encode_stats_map<T>(
    enc: &mut Encoder,
    map: &Option<StatsMap<T>>,
    mut write: impl FnMut(&mut Encoder, &T),
) {
    match map {
        None => enc.write_union_branch(0),
        Some(entries) => {
            enc.write_union_branch(1);
            enc.write_array(entries.iter(), |e, (key, value)| {
                e.write_int(*key);
                write(e, value);
            });
        }
    }
}

fn decode_stats_map<T>(
    dec: &mut Decoder<'_>,
    mut read: impl FnMut(&mut Decoder<'_>) -> IcebergResult<T>,
) -> IcebergResult<Option<StatsMap<T>>> {
    dec.read_optional(|d| {
        d.read_array(|d| {
            let key = d.read_int()?;
            let value = read(d)?;
            Ok((key, value))
        })
    })
}

fn encode_entry(
    enc: &mut Encoder,
    entry: &ManifestEntry,
    partition_type: &PartitionType,
    format_version: u8,
) -> IcebergResult<()> {
    enc.write_int(entry.status as i32);
    enc.write_optional(entry.snapshot_id, |e, v| e.write_long(v));
    enc.write_optional(entry.sequence_number, |e, v| e.write_long(v));
    enc.write_optional(entry.file_sequence_number, |e, v| e.write_long(v));

    let file = &entry.data_file;
    enc.write_int(file.content as i32);
    enc.write_string(&file.file_path);
    enc.write_string(&file.file_format.to_string());
    partition_type.encode(enc, &file.partition)?;
    enc.write_long(file.record_count);
    enc.write_long(file.file_size_in_bytes);
    encode_stats_map(enc, &file.column_sizes, |e, v| e.write_long(*v));
    encode_stats_map(enc, &file.value_counts, |e, v| e.write_long(*v));
    encode_stats_map(enc, &file.null_value_counts, |e, v| e.write_long(*v));
    encode_stats_map(enc, &file.nan_value_counts, |e, v| e.write_long(*v));
    encode_stats_map(enc, &file.lower_bounds, |e, v| e.write_bytes(v));
    encode_stats_map(enc, &file.upper_bounds, |e, v| e.write_bytes(v));
    enc.write_optional(file.key_metadata.as_deref(), |e, v| e.write_bytes(v));
    enc.write_optional(file.split_offsets.as_deref(), |e, v| {
        e.write_array(v.iter(), |e, offset| e.write_long(*offset))
    });
    enc.write_optional(file.equality_ids.as_deref(), |e, v| {
        e.write_array(v.iter(), |e, id| e.write_int(*id))
    });
    enc.write_optional(file.sort_order_id, |e, v| e.write_int(v));
    if format_version >= 3 {
        enc.write_optional(file.first_row_id, |e, v| e.write_long(v));
        enc.write_optional(file.referenced_data_file.as_deref(), |e, v| e.write_string(v));
        enc.write_optional(file.content_offset, |e, v| e.write_long(v));
        enc.write_optional(file.content_size_in_bytes, |e, v| e.write_long(v));
    }
    Ok(())
}

fn decode_entry(
    dec: &mut Decoder<'_>,
    partition_type: &PartitionType,
    format_version: u8,
) -> IcebergResult<ManifestEntry> {
    let status = ManifestEntryStatus::from_ordinal(dec.read_int()?)?;
    let snapshot_id = dec.read_optional(|d| d.read_long())?;
    let sequence_number = dec.read_optional(|d| d.read_long())?;
    let file_sequence_number = dec.read_optional(|d| d.read_long())?;

    let content = DataFileContent::from_ordinal(dec.read_int()?)?;
    let file_path = dec.read_string()?;
    let format_str = dec.read_string()?;
    let file_format = format_str
        .parse()
        .map_err(|_| Error::codec(format!("unknown file format '{format_str}'")))?;
    let partition = partition_type.decode(dec)?;
    let record_count = dec.read_long()?;
    let file_size_in_bytes = dec.read_long()?;
    let column_sizes = decode_stats_map(dec, |d| d.read_long())?;
    let value_counts = decode_stats_map(dec, |d| d.read_long())?;
    let null_value_counts = decode_stats_map(dec, |d| d.read_long())?;
    let nan_value_counts = decode_stats_map(dec, |d| d.read_long())?;
    let lower_bounds = decode_stats_map(dec, |d| d.read_bytes())?;
    let upper_bounds = decode_stats_map(dec, |d| d.read_bytes())?;
    let key_metadata = dec.read_optional(|d| d.read_bytes())?;
    let split_offsets = dec.read_optional(|d| d.read_array(|d| d.read_long()))?;
    let equality_ids = dec.read_optional(|d| d.read_array(|d| d.read_int()))?;
    let sort_order_id = dec.read_optional(|d| d.read_int())?;
    let (first_row_id, referenced_data_file, content_offset, content_size_in_bytes) =
        if format_version >= 3 {
            (
                dec.read_optional(|d| d.read_long())?,
                dec.read_optional(|d| d.read_string())?,
                dec.read_optional(|d| d.read_long())?,
                dec.read_optional(|d| d.read_long())?,
            )
        } else {
            (None, None, None, None)
        };

    Ok(ManifestEntry {
        status,
        snapshot_id,
        sequence_number,
        file_sequence_number,
        data_file: DataFile {
            content,
            file_path,
            file_format,
            partition,
            record_count,
            file_size_in_bytes,
            column_sizes,
            value_counts,
            null_value_counts,
            nan_value_counts,
            lower_bounds,
            upper_bounds,
            key_metadata,
            split_offsets,
            equality_ids,
            sort_order_id,
            first_row_id,
            referenced_data_file,
            content_offset,
            content_size_in_bytes,
        },
    })
}

/// Writes a manifest file: entries are buffered and flushed as one container
/// block. The container metadata embeds the table schema and the partition
/// spec so the file is self-describing.
#[derive(Debug)]
pub struct ManifestWriter {
    partition_type: PartitionType,
    format_version: u8,
    block: Encoder,
    entry_count: usize,
    writer: ContainerWriter,
}

impl ManifestWriter {
    pub fn new(spec: &PartitionSpec, schema: &Schema, format_version: u8) -> IcebergResult<Self> {
        let partition_type = PartitionType::derive(spec, schema)?;
        let avro_schema = manifest_entry_schema_json(&partition_type, format_version);
        let mut writer = ContainerWriter::new(&avro_schema.to_string());
        writer.add_metadata("schema", serde_json::to_vec(schema)?)?;
        writer.add_metadata("partition-spec", serde_json::to_vec(&spec.fields)?)?;
        writer.add_metadata("partition-spec-id", spec.spec_id.to_string())?;
        writer.add_metadata("format-version", format_version.to_string())?;
        writer.add_metadata("content", "data")?;
        Ok(Self {
            partition_type,
            format_version,
            block: Encoder::new(),
            entry_count: 0,
            writer,
        })
    }

    pub fn append(&mut self, entry: &ManifestEntry) -> IcebergResult<()> {
        encode_entry(&mut self.block, entry, &self.partition_type, self.format_version)?;
        self.entry_count += 1;
        Ok(())
    }

    pub fn into_bytes(mut self) -> IcebergResult<Vec<u8>> {
        if self.entry_count > 0 {
            let block = std::mem::take(&mut self.block);
            self.writer.append_block(self.entry_count, &block.into_bytes())?;
        }
        Ok(self.writer.into_bytes())
    }
}

/// Reads a manifest file written by [`ManifestWriter`] (or another engine),
/// recovering the partition type from the embedded schema and spec.
#[derive(Debug)]
pub struct ManifestReader {
    entries: Vec<ManifestEntry>,
    partition_spec_id: i32,
}

impl ManifestReader {
    pub fn parse(bytes: &[u8]) -> IcebergResult<Self> {
        let mut reader = ContainerReader::new(bytes)?;
        let schema: Schema = serde_json::from_slice(
            reader
                .metadata("schema")
                .ok_or_else(|| Error::codec("manifest missing 'schema' metadata"))?,
        )?;
        let spec_fields: Vec<PartitionField> = serde_json::from_slice(
            reader
                .metadata("partition-spec")
                .ok_or_else(|| Error::codec("manifest missing 'partition-spec' metadata"))?,
        )?;
        let partition_spec_id: i32 = parse_metadata_int(&reader, "partition-spec-id")?;
        let format_version: u8 = parse_metadata_int(&reader, "format-version")?;
        let spec = PartitionSpec {
            spec_id: partition_spec_id,
            fields: spec_fields,
        };
        let partition_type = PartitionType::derive(&spec, &schema)?;

        let mut entries = Vec::new();
        while reader.has_more() {
            let (count, block) = reader.next_block()?;
            let mut dec = Decoder::new(&block);
            for _ in 0..count {
                entries.push(decode_entry(&mut dec, &partition_type, format_version)?);
            }
            if !dec.is_at_end() {
                return Err(Error::codec("trailing bytes after last entry in block"));
            }
        }
        Ok(Self {
            entries,
            partition_spec_id,
        })
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ManifestEntry> {
        self.entries
    }

    pub fn partition_spec_id(&self) -> i32 {
        self.partition_spec_id
    }
}

fn parse_metadata_int<T: std::str::FromStr>(
    reader: &ContainerReader<'_>,
    key: &str,
) -> IcebergResult<T> {
    let bytes = reader
        .metadata(key)
        .ok_or_else(|| Error::codec(format!("manifest missing '{key}' metadata")))?;
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::codec(format!("manifest '{key}' metadata is not an integer")))
}
