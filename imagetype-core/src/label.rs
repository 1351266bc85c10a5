//! Classification labels returned by the model for each image.
//!
//! The label is a closed set of categories. Its fields are also described as
//! [`FieldSpec`]s so that the warehouse table schema and the model's structured
//! output schema are derived from a single definition.

use serde::{Deserialize, Serialize};

/// Image type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageType {
    /// Product alone on a plain background
    Silo,
    /// Product alone on a designed or colored background
    StylizedSilo,
    /// Product shown in use or in a real setting
    Lifestyle,
    /// Several products shown together
    Group,
    /// Detail shot of part of the product
    Closeup,
    /// Material, color or texture sample
    Swatch,
    Unknown,
}

impl ImageType {
    pub const ALL: [ImageType; 7] = [
        ImageType::Silo,
        ImageType::StylizedSilo,
        ImageType::Lifestyle,
        ImageType::Group,
        ImageType::Closeup,
        ImageType::Swatch,
        ImageType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Silo => "silo",
            Self::StylizedSilo => "stylized_silo",
            Self::Lifestyle => "lifestyle",
            Self::Group => "group",
            Self::Closeup => "closeup",
            Self::Swatch => "swatch",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of a single label field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Enum(Vec<&'static str>),
    Integer,
    Float,
    Boolean,
    List(Box<FieldKind>),
    /// Nested records. Describable, but not storable as a flat column.
    Object,
}

/// A named label field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

/// Implemented by the structured output type the model fills in per image.
pub trait LabelSchema {
    fn fields() -> Vec<FieldSpec>;
}

/// Structured output for one analyzed image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledImage {
    #[serde(rename = "type")]
    pub image_type: ImageType,
}

impl LabelSchema for LabeledImage {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec {
            name: "type",
            kind: FieldKind::Enum(ImageType::ALL.iter().map(ImageType::as_str).collect()),
        }]
    }
}
