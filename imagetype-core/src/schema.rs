//! Schema generation from label field descriptors.
//!
//! Two consumers share the same [`FieldSpec`] list:
//! - the BigQuery results table (base image columns + one column per label field)
//! - the Gemini `responseSchema` (an array with one label object per image)

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::label::{FieldKind, FieldSpec, LabelSchema};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unsupported type for field {field}: {kind}")]
    UnsupportedType { field: String, kind: String },
}

/// BigQuery column mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Nullable,
    Repeated,
}

/// One column of a BigQuery table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub mode: FieldMode,
}

impl TableField {
    fn nullable(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            mode: FieldMode::Nullable,
        }
    }
}

/// Columns every results row carries, ahead of the label columns.
pub fn base_fields() -> Vec<TableField> {
    vec![
        TableField::nullable("image_link", "STRING"),
        TableField::nullable("mime_type", "STRING"),
        TableField::nullable("width", "INTEGER"),
        TableField::nullable("height", "INTEGER"),
        TableField::nullable("sha256_hash", "STRING"),
        TableField::nullable("timestamp", "TIMESTAMP"),
    ]
}

/// Build the full results table schema for the given label fields.
///
/// Fails on the first field that cannot be stored as a flat column instead of
/// dropping it.
pub fn table_schema(fields: &[FieldSpec]) -> Result<Vec<TableField>, SchemaError> {
    let mut schema = base_fields();
    for field in fields {
        schema.push(table_field(field)?);
    }
    Ok(schema)
}

pub fn table_schema_for<L: LabelSchema>() -> Result<Vec<TableField>, SchemaError> {
    table_schema(&L::fields())
}

/// Serialize the results table schema as a JSON string.
pub fn table_schema_json<L: LabelSchema>() -> Result<String, SchemaError> {
    let schema = table_schema_for::<L>()?;
    // Plain structs of strings always serialize.
    Ok(serde_json::to_string(&schema).unwrap_or_default())
}

fn table_field(field: &FieldSpec) -> Result<TableField, SchemaError> {
    match &field.kind {
        FieldKind::List(element) => Ok(TableField {
            name: field.name.to_string(),
            field_type: scalar_column_type(field.name, element)?.to_string(),
            mode: FieldMode::Repeated,
        }),
        kind => Ok(TableField::nullable(
            field.name,
            scalar_column_type(field.name, kind)?,
        )),
    }
}

fn scalar_column_type(name: &str, kind: &FieldKind) -> Result<&'static str, SchemaError> {
    match kind {
        FieldKind::String | FieldKind::Enum(_) => Ok("STRING"),
        FieldKind::Integer => Ok("INTEGER"),
        FieldKind::Float => Ok("FLOAT"),
        FieldKind::Boolean => Ok("BOOLEAN"),
        FieldKind::List(_) | FieldKind::Object => Err(unsupported(name, kind)),
    }
}

fn unsupported(name: &str, kind: &FieldKind) -> SchemaError {
    SchemaError::UnsupportedType {
        field: name.to_string(),
        kind: format!("{kind:?}"),
    }
}

/// Gemini structured output schema: an array holding one label object per image.
pub fn response_schema(fields: &[FieldSpec]) -> Result<Value, SchemaError> {
    let mut properties = Map::new();
    for field in fields {
        properties.insert(field.name.to_string(), openapi_type(field.name, &field.kind)?);
    }
    let required: Vec<&str> = fields.iter().map(|f| f.name).collect();

    Ok(json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": properties,
            "required": required,
        }
    }))
}

pub fn response_schema_for<L: LabelSchema>() -> Result<Value, SchemaError> {
    response_schema(&L::fields())
}

fn openapi_type(name: &str, kind: &FieldKind) -> Result<Value, SchemaError> {
    Ok(match kind {
        FieldKind::String => json!({"type": "STRING"}),
        FieldKind::Enum(values) => json!({"type": "STRING", "format": "enum", "enum": values}),
        FieldKind::Integer => json!({"type": "INTEGER"}),
        FieldKind::Float => json!({"type": "NUMBER"}),
        FieldKind::Boolean => json!({"type": "BOOLEAN"}),
        FieldKind::List(element) => match element.as_ref() {
            FieldKind::List(_) | FieldKind::Object => return Err(unsupported(name, kind)),
            scalar => json!({"type": "ARRAY", "items": openapi_type(name, scalar)?}),
        },
        FieldKind::Object => return Err(unsupported(name, kind)),
    })
}
