use base64::{Engine as _, engine::general_purpose};
use image::{ImageReader, Limits};
use std::io::Cursor;

use crate::config::UploadConfig;
use crate::llm::EncodedImage;

const MEGABYTE: usize = 1024 * 1024;
const DEFAULT_MAX_DIMENSION: u32 = 12_000;
const MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// A file part taken from the multipart body.
///
/// `size` counts every byte received for the part; `bytes` may stop short of it
/// once the part has already exceeded the upload limit.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: usize,
    pub bytes: Vec<u8>,
}

impl UploadedImage {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            size: bytes.len(),
            bytes,
        }
    }

    /// MIME essence of the declared type, lower-cased and without parameters.
    pub fn declared_type(&self) -> Option<String> {
        self.content_type.as_deref().and_then(|value| {
            let essence = value.split(';').next().unwrap_or_default().trim();
            (!essence.is_empty()).then(|| essence.to_ascii_lowercase())
        })
    }

    pub fn encode_base64(&self) -> EncodedImage {
        EncodedImage {
            content_type: self
                .declared_type()
                .unwrap_or_else(|| "image/jpeg".to_string()),
            data: general_purpose::STANDARD.encode(&self.bytes),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Rejection {
    #[error("file is {size} bytes, limit is {max} bytes")]
    TooLarge { size: usize, max: usize },
    #[error("content type {0:?} is not allowed")]
    UnsupportedType(Option<String>),
    #[error("not a decodable image: {0}")]
    Undecodable(String),
}

#[derive(Debug, Clone)]
pub struct ImageValidator {
    max_upload_size: usize,
    allowed_content_types: Vec<String>,
    max_dimension: u32,
}

impl ImageValidator {
    pub fn new(max_upload_size: usize, allowed_content_types: Vec<String>) -> Self {
        Self {
            max_upload_size,
            allowed_content_types: allowed_content_types
                .into_iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
            max_dimension: DEFAULT_MAX_DIMENSION,
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(config.max_upload_size, config.allowed_content_types.clone())
            .with_max_dimension(config.max_image_dimension)
    }

    pub fn with_max_dimension(mut self, max_dimension: u32) -> Self {
        self.max_dimension = max_dimension;
        self
    }

    fn decode_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(MAX_DECODE_ALLOC);
        limits
    }

    pub fn max_upload_size(&self) -> usize {
        self.max_upload_size
    }

    /// Size first, then declared type, then a full decode of the bytes.
    pub fn validate(&self, upload: &UploadedImage) -> Result<(), Rejection> {
        if upload.size > self.max_upload_size {
            return Err(Rejection::TooLarge {
                size: upload.size,
                max: self.max_upload_size,
            });
        }

        let declared = upload.declared_type();
        match &declared {
            Some(content_type) if self.allowed_content_types.contains(content_type) => {}
            _ => return Err(Rejection::UnsupportedType(declared)),
        }

        let mut reader = ImageReader::new(Cursor::new(upload.bytes.as_slice()))
            .with_guessed_format()
            .map_err(|e| Rejection::Undecodable(e.to_string()))?;
        reader.limits(self.decode_limits());
        if reader.format().is_none() {
            return Err(Rejection::Undecodable("unrecognised format".to_string()));
        }
        reader
            .decode()
            .map_err(|e| Rejection::Undecodable(e.to_string()))?;

        Ok(())
    }

    /// Human-readable summary used in bad-input messages, e.g. "JPG, PNG, or BMP under 10MB".
    pub fn requirements(&self) -> String {
        let labels: Vec<String> = self
            .allowed_content_types
            .iter()
            .map(|content_type| type_label(content_type))
            .collect();

        let types = match labels.as_slice() {
            [] => "an image".to_string(),
            [only] => only.clone(),
            [first, second] => format!("{} or {}", first, second),
            [rest @ .., last] => format!("{}, or {}", rest.join(", "), last),
        };

        let limit = if self.max_upload_size % MEGABYTE == 0 {
            format!("{}MB", self.max_upload_size / MEGABYTE)
        } else {
            format!("{} bytes", self.max_upload_size)
        };

        format!("{} under {}", types, limit)
    }
}

fn type_label(content_type: &str) -> String {
    match content_type {
        "image/jpeg" | "image/jpg" => "JPG".to_string(),
        other => other
            .rsplit('/')
            .next()
            .unwrap_or(other)
            .to_ascii_uppercase(),
    }
}
