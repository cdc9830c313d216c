//! The Iceberg schema model: named, id-addressed fields over a closed type
//! system. Serialization follows the Iceberg table-spec JSON spelling exactly
//! (`schema-id`, `element-id`, `key-id`, ...) — the on-disk form is a wire
//! compatibility requirement, not an internal naming choice.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, IcebergResult};

/// A versioned table schema: an id plus a flat list of top-level fields
/// (each of which may be an arbitrarily nested struct/list/map).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(rename = "schema-id")]
    pub schema_id: i32,
    #[serde(rename = "type", default = "struct_tag")]
    type_tag: String,
    pub fields: Vec<NestedField>,
    #[serde(
        rename = "identifier-field-ids",
        skip_serializing_if = "Option::is_none"
    )]
    pub identifier_field_ids: Option<Vec<i32>>,
}

fn struct_tag() -> String {
    "struct".to_string()
}

impl Schema {
    pub fn new(schema_id: i32, fields: Vec<NestedField>) -> Self {
        Self {
            schema_id,
            type_tag: struct_tag(),
            fields,
            identifier_field_ids: None,
        }
    }

    /// The largest field id assigned anywhere in this schema, considering
    /// struct fields at every depth plus list element ids and map key/value
    /// ids. Feeds `last-column-id` in the table metadata.
    pub fn max_field_id(&self) -> i32 {
        fn walk(ty: &Type, max: &mut i32) {
            match ty {
                Type::Primitive(_) => {}
                Type::Struct(s) => {
                    for f in &s.fields {
                        *max = (*max).max(f.id);
                        walk(&f.field_type, max);
                    }
                }
                Type::List(l) => {
                    *max = (*max).max(l.element_id);
                    walk(&l.element, max);
                }
                Type::Map(m) => {
                    *max = (*max).max(m.key_id).max(m.value_id);
                    walk(&m.key, max);
                    walk(&m.value, max);
                }
            }
        }
        let mut max = 0;
        for f in &self.fields {
            max = max.max(f.id);
            walk(&f.field_type, &mut max);
        }
        max
    }

    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Looks up a source column for a partition field, failing with
    /// [`Error::NotFound`] when the id is not a top-level field.
    pub fn require_field(&self, id: i32) -> IcebergResult<&NestedField> {
        self.field_by_id(id)
            .ok_or_else(|| Error::not_found(format!("no field with id {id} in schema")))
    }
}

/// A single named field with a stable id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedField {
    pub id: i32,
    pub name: String,
    pub required: bool,
    #[serde(rename = "type")]
    pub field_type: Type,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    pub fn required(id: i32, name: impl Into<String>, field_type: Type) -> Self {
        Self {
            id,
            name: name.into(),
            required: true,
            field_type,
            doc: None,
        }
    }

    pub fn optional(id: i32, name: impl Into<String>, field_type: Type) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type,
            doc: None,
        }
    }
}

/// The Iceberg type union. Primitives serialize as bare strings
/// (`"int"`, `"decimal(9, 2)"`); the nested kinds serialize as objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Type {
    Primitive(PrimitiveType),
    Struct(StructType),
    List(Box<ListType>),
    Map(Box<MapType>),
}

impl Type {
    /// Shorthand used throughout tests and spec-building code.
    pub fn primitive(p: PrimitiveType) -> Self {
        Type::Primitive(p)
    }
}

/// Primitive types, spelled as in the Iceberg spec. `fixed[N]` and
/// `decimal(p, s)` carry their parameters inside the string form, so they
/// get a custom serde representation below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    Decimal { precision: u32, scale: u32 },
    Date,
    Time,
    Timestamp,
    Timestamptz,
    String,
    Uuid,
    Fixed(u64),
    Binary,
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({precision}, {scale})")
            }
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Time => write!(f, "time"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::Timestamptz => write!(f, "timestamptz"),
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Uuid => write!(f, "uuid"),
            PrimitiveType::Fixed(len) => write!(f, "fixed[{len}]"),
            PrimitiveType::Binary => write!(f, "binary"),
        }
    }
}

impl std::str::FromStr for PrimitiveType {
    type Err = Error;

    fn from_str(s: &str) -> IcebergResult<Self> {
        let ty = match s {
            "boolean" => PrimitiveType::Boolean,
            "int" => PrimitiveType::Int,
            "long" => PrimitiveType::Long,
            "float" => PrimitiveType::Float,
            "double" => PrimitiveType::Double,
            "date" => PrimitiveType::Date,
            "time" => PrimitiveType::Time,
            "timestamp" => PrimitiveType::Timestamp,
            "timestamptz" => PrimitiveType::Timestamptz,
            "string" => PrimitiveType::String,
            "uuid" => PrimitiveType::Uuid,
            "binary" => PrimitiveType::Binary,
            other => {
                if let Some(len) = other
                    .strip_prefix("fixed[")
                    .and_then(|r| r.strip_suffix(']'))
                {
                    let len = len
                        .parse()
                        .map_err(|_| Error::validation(format!("bad fixed length in '{other}'")))?;
                    PrimitiveType::Fixed(len)
                } else if let Some(args) = other
                    .strip_prefix("decimal(")
                    .and_then(|r| r.strip_suffix(')'))
                {
                    let (p, s) = args.split_once(',').ok_or_else(|| {
                        Error::validation(format!("bad decimal parameters in '{other}'"))
                    })?;
                    let precision = p.trim().parse().map_err(|_| {
                        Error::validation(format!("bad decimal precision in '{other}'"))
                    })?;
                    let scale = s.trim().parse().map_err(|_| {
                        Error::validation(format!("bad decimal scale in '{other}'"))
                    })?;
                    PrimitiveType::Decimal { precision, scale }
                } else {
                    return Err(Error::validation(format!("unknown primitive type '{s}'")));
                }
            }
        };
        Ok(ty)
    }
}

impl Serialize for PrimitiveType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A nested struct type. `type` is always the literal `"struct"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructType {
    #[serde(rename = "type", default = "struct_tag")]
    type_tag: String,
    pub fields: Vec<NestedField>,
}

impl StructType {
    pub fn new(fields: Vec<NestedField>) -> Self {
        Self {
            type_tag: struct_tag(),
            fields,
        }
    }
}

/// A list type; the element carries its own field id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListType {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(rename = "element-id")]
    pub element_id: i32,
    #[serde(rename = "element-required")]
    pub element_required: bool,
    pub element: Type,
}

impl ListType {
    pub fn new(element_id: i32, element: Type, element_required: bool) -> Self {
        Self {
            type_tag: "list".to_string(),
            element_id,
            element_required,
            element,
        }
    }
}

/// A map type; key and value each carry a field id. Keys are always required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapType {
    #[serde(rename = "type")]
    type_tag: String,
    #[serde(rename = "key-id")]
    pub key_id: i32,
    pub key: Type,
    #[serde(rename = "value-id")]
    pub value_id: i32,
    #[serde(rename = "value-required")]
    pub value_required: bool,
    pub value: Type,
}

impl MapType {
    pub fn new(key_id: i32, key: Type, value_id: i32, value: Type, value_required: bool) -> Self {
        Self {
            type_tag: "map".to_string(),
            key_id,
            key,
            value_id,
            value_required,
            value,
        }
    }
}

/// String map used for table and snapshot properties.
pub type Properties = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn two_column_schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::required(1, "id", Type::primitive(PrimitiveType::Int)),
                NestedField::optional(2, "data", Type::primitive(PrimitiveType::String)),
            ],
        )
    }

    #[test]
    fn serializes_with_spec_key_spelling() {
        let json = serde_json::to_value(two_column_schema()).unwrap();
        assert_eq!(json["schema-id"], 0);
        assert_eq!(json["type"], "struct");
        assert_eq!(json["fields"][0]["type"], "int");
        assert_eq!(json["fields"][1]["required"], false);
    }

    #[test]
    fn parses_parameterized_primitives() {
        assert_eq!(
            "decimal(9, 2)".parse::<PrimitiveType>().unwrap(),
            PrimitiveType::Decimal {
                precision: 9,
                scale: 2
            }
        );
        assert_eq!(
            "fixed[16]".parse::<PrimitiveType>().unwrap(),
            PrimitiveType::Fixed(16)
        );
        assert!("varchar".parse::<PrimitiveType>().is_err());
    }

    #[test]
    fn max_field_id_descends_into_nested_types() {
        let schema = Schema::new(
            0,
            vec![
                NestedField::required(1, "id", Type::primitive(PrimitiveType::Long)),
                NestedField::optional(
                    2,
                    "tags",
                    Type::List(Box::new(ListType::new(
                        5,
                        Type::primitive(PrimitiveType::String),
                        false,
                    ))),
                ),
                NestedField::optional(
                    3,
                    "attrs",
                    Type::Map(Box::new(MapType::new(
                        6,
                        Type::primitive(PrimitiveType::String),
                        7,
                        Type::Struct(StructType::new(vec![NestedField::required(
                            9,
                            "inner",
                            Type::primitive(PrimitiveType::Int),
                        )])),
                        false,
                    ))),
                ),
            ],
        );
        assert_eq!(schema.max_field_id(), 9);
    }

    #[test]
    fn round_trips_nested_schema_json() {
        let schema = Schema::new(
            3,
            vec![NestedField::optional(
                1,
                "payload",
                Type::Struct(StructType::new(vec![NestedField::required(
                    2,
                    "ts",
                    Type::primitive(PrimitiveType::Timestamptz),
                )])),
            )],
        );
        let json = serde_json::to_string(&schema).unwrap();
        let back: Schema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, schema);
    }
}
