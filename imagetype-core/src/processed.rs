//! Downloaded images and their locally extracted metadata.

use std::io::Cursor;

use image::ImageReader;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::UpstreamError;
use crate::label::LabeledImage;

/// Handle to a file held by the inference provider's file store.
///
/// Created by an upload and released explicitly by the classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Provider resource name (e.g. `files/abc123`), used for deletion.
    pub name: String,
    /// URI passed to the model in multimodal requests.
    pub uri: String,
    pub mime_type: String,
}

/// An image plus its extracted metadata and, eventually, its label.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedImage {
    pub image_link: String,
    #[serde(skip)]
    pub file_ref: Option<FileRef>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub sha256_hash: String,
    pub labeled_image: Option<LabeledImage>,
}

impl ProcessedImage {
    pub fn new(image_link: impl Into<String>, metadata: ImageMetadata, file_ref: FileRef) -> Self {
        Self {
            image_link: image_link.into(),
            file_ref: Some(file_ref),
            mime_type: metadata.mime_type,
            width: metadata.width,
            height: metadata.height,
            sha256_hash: metadata.sha256_hash,
            labeled_image: None,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Metadata computed from the raw image bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageMetadata {
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub sha256_hash: String,
}

impl ImageMetadata {
    /// Hash the bytes and read the pixel dimensions from the image header.
    ///
    /// Only the header is decoded; no pixel buffer is allocated. `mime_type` is
    /// the type reported by the image host, if any.
    pub fn inspect(bytes: &[u8], mime_type: Option<&str>) -> Result<Self, UpstreamError> {
        let sha256_hash = hex::encode(Sha256::digest(bytes));

        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| UpstreamError::decode(format!("unreadable image: {e}")))?;
        let guessed_mime = reader.format().map(|f| f.to_mime_type());
        let (width, height) = reader
            .into_dimensions()
            .map_err(|e| UpstreamError::decode(format!("unrecognized image: {e}")))?;

        let mime_type = mime_type
            .map(|m| m.split(';').next().unwrap_or(m).trim().to_string())
            .filter(|m| !m.is_empty())
            .or_else(|| guessed_mime.map(str::to_string))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        Ok(Self {
            mime_type,
            width,
            height,
            sha256_hash,
        })
    }
}
