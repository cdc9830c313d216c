//! Partition specs and the derivation of partition values and paths.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;
use crate::transform::Transform;
use crate::value::Literal;
use crate::{Error, IcebergResult};

/// Partition field ids are assigned from this reserved constant upward so
/// they can never collide with schema field ids.
pub const PARTITION_FIELD_ID_START: i32 = 1000;

/// The token substituted for a null partition value in Hive-style paths.
pub const NULL_PARTITION_TOKEN: &str = "__HIVE_DEFAULT_PARTITION__";

/// One field of a partition spec: a source schema column, a transform, and a
/// stable field id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    #[serde(rename = "field-id")]
    pub field_id: i32,
    #[serde(rename = "source-id")]
    pub source_id: i32,
    pub name: String,
    pub transform: Transform,
}

/// An id-stamped list of partition fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    #[serde(rename = "spec-id")]
    pub spec_id: i32,
    pub fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The canonical unpartitioned spec.
    pub fn unpartitioned() -> Self {
        Self {
            spec_id: 0,
            fields: Vec::new(),
        }
    }

    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// The largest partition-field id in this spec, or none when
    /// unpartitioned. Feeds `last-partition-id` in the table metadata.
    pub fn max_field_id(&self) -> Option<i32> {
        self.fields.iter().map(|f| f.field_id).max()
    }

    pub fn builder(spec_id: i32) -> PartitionSpecBuilder {
        PartitionSpecBuilder {
            spec_id,
            next_field_id: PARTITION_FIELD_ID_START,
            fields: Vec::new(),
        }
    }
}

/// Builds a [`PartitionSpec`], assigning field ids sequentially from
/// [`PARTITION_FIELD_ID_START`] and generating default names per transform
/// when the caller does not supply one.
#[derive(Debug)]
pub struct PartitionSpecBuilder {
    spec_id: i32,
    next_field_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpecBuilder {
    /// Adds a field with a generated `{column}_{transform}` name.
    pub fn add(mut self, schema: &Schema, source_name: &str, transform: Transform) -> IcebergResult<Self> {
        let name = format!("{source_name}_{}", transform.default_name_suffix());
        self.push(schema, source_name, transform, name)?;
        Ok(self)
    }

    /// Adds a field with an explicit name.
    pub fn add_named(
        mut self,
        schema: &Schema,
        source_name: &str,
        transform: Transform,
        name: impl Into<String>,
    ) -> IcebergResult<Self> {
        self.push(schema, source_name, transform, name.into())?;
        Ok(self)
    }

    fn push(
        &mut self,
        schema: &Schema,
        source_name: &str,
        transform: Transform,
        name: String,
    ) -> IcebergResult<()> {
        let source = schema
            .field_by_name(source_name)
            .ok_or_else(|| Error::not_found(format!("no column '{source_name}' in schema")))?;
        if self.fields.iter().any(|f| f.name == name) {
            return Err(Error::validation(format!(
                "duplicate partition field name '{name}'"
            )));
        }
        let field_id = self.next_field_id;
        self.next_field_id += 1;
        self.fields.push(PartitionField {
            field_id,
            source_id: source.id,
            name,
            transform,
        });
        Ok(())
    }

    pub fn build(self) -> PartitionSpec {
        PartitionSpec {
            spec_id: self.spec_id,
            fields: self.fields,
        }
    }
}

/// Partition values for one data file, keyed by partition-field name in spec
/// field order.
pub type PartitionData = Vec<(String, Option<Literal>)>;

/// Applies each partition field's transform to the named source column of
/// `record`, producing the file's partition values in spec order.
pub fn partition_data(
    record: &HashMap<String, Literal>,
    spec: &PartitionSpec,
    schema: &Schema,
) -> IcebergResult<PartitionData> {
    spec.fields
        .iter()
        .map(|field| {
            let source = schema.require_field(field.source_id)?;
            let value = record.get(&source.name);
            let transformed = field.transform.apply(value)?;
            Ok((field.name.clone(), transformed))
        })
        .collect()
}

/// Renders partition data as Hive-style `name=value` segments joined by `/`,
/// substituting [`NULL_PARTITION_TOKEN`] for nulls.
pub fn partition_path(data: &PartitionData) -> String {
    data.iter()
        .map(|(name, value)| {
            let rendered = match value {
                Some(v) => v.to_path_string(),
                None => NULL_PARTITION_TOKEN.to_string(),
            };
            format!("{name}={rendered}")
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The inverse of [`partition_path`]: splits `name=value` segments and infers
/// numeric vs. string values. The null token maps back to `None`.
pub fn parse_partition_path(path: &str) -> IcebergResult<PartitionData> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    path.split('/')
        .map(|segment| {
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                Error::validation(format!("partition segment '{segment}' is not name=value"))
            })?;
            let value = match value {
                NULL_PARTITION_TOKEN => None,
                other => Some(Literal::from_path_string(other)),
            };
            Ok((name.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{NestedField, PrimitiveType, Type};

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::required(1, "id", Type::primitive(PrimitiveType::Long)),
                NestedField::optional(2, "region", Type::primitive(PrimitiveType::String)),
                NestedField::optional(3, "ts", Type::primitive(PrimitiveType::Timestamp)),
            ],
        )
    }

    #[test]
    fn builder_assigns_reserved_ids_and_default_names() {
        let spec = PartitionSpec::builder(0)
            .add(&schema(), "region", Transform::Identity)
            .unwrap()
            .add(&schema(), "id", Transform::Bucket(16))
            .unwrap()
            .add(&schema(), "ts", Transform::Day)
            .unwrap()
            .build();
        assert_eq!(
            spec.fields.iter().map(|f| f.field_id).collect::<Vec<_>>(),
            vec![1000, 1001, 1002]
        );
        assert_eq!(
            spec.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["region_identity", "id_bucket", "ts_day"]
        );
        assert_eq!(spec.max_field_id(), Some(1002));
    }

    #[test]
    fn builder_rejects_unknown_columns_and_duplicate_names() {
        let err = PartitionSpec::builder(0)
            .add(&schema(), "missing", Transform::Identity)
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let err = PartitionSpec::builder(0)
            .add_named(&schema(), "id", Transform::Bucket(4), "part")
            .unwrap()
            .add_named(&schema(), "region", Transform::Identity, "part")
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn partition_data_applies_transforms_in_spec_order() {
        let spec = PartitionSpec::builder(0)
            .add(&schema(), "region", Transform::Identity)
            .unwrap()
            .add(&schema(), "id", Transform::Bucket(4))
            .unwrap()
            .build();
        let record = HashMap::from([
            ("id".to_string(), Literal::Long(42)),
            ("region".to_string(), Literal::String("eu".into())),
        ]);
        let data = partition_data(&record, &spec, &schema()).unwrap();
        assert_eq!(data[0].0, "region_identity");
        assert_eq!(data[0].1, Some(Literal::String("eu".into())));
        assert_eq!(data[1].0, "id_bucket");
        assert!(matches!(data[1].1, Some(Literal::Int(b)) if (0..4).contains(&b)));
    }

    #[test]
    fn paths_round_trip_including_null_sentinel() {
        let data: PartitionData = vec![
            ("region_identity".to_string(), None),
            ("id_bucket".to_string(), Some(Literal::Long(3))),
            ("name_trunc".to_string(), Some(Literal::String("ab".into()))),
        ];
        let path = partition_path(&data);
        assert_eq!(
            path,
            "region_identity=__HIVE_DEFAULT_PARTITION__/id_bucket=3/name_trunc=ab"
        );
        assert_eq!(parse_partition_path(&path).unwrap(), data);
    }

    #[test]
    fn empty_path_is_unpartitioned() {
        assert_eq!(parse_partition_path("").unwrap(), Vec::new());
        assert_eq!(partition_path(&Vec::new()), "");
    }
}
