//! Image resources embedded in a document.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An embedded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResource {
    /// Raw binary data, stored base64-encoded
    #[serde(default, with = "base64_payload", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,

    /// MIME type (e.g., "image/png")
    pub mime_type: String,

    /// Original filename if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Size of the source data in bytes
    #[serde(default)]
    pub byte_len: u64,
}

impl ImageResource {
    /// Create an image resource from encoded bytes, sniffing format and size.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let mime_type = detect_mime_type(&data)
            .ok_or_else(|| Error::Other("Unrecognised image format".into()))?;
        let (width, height) = match mime_type {
            "image/png" => png_dimensions(&data),
            "image/jpeg" => jpeg_dimensions(&data),
            _ => None,
        }
        .ok_or_else(|| Error::Other(format!("Cannot read {} dimensions", mime_type)))?;

        Ok(Self {
            byte_len: data.len() as u64,
            data,
            mime_type: mime_type.to_string(),
            filename: None,
            width,
            height,
        })
    }

    /// Load an image resource from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        let mut resource = Self::from_bytes(data)?;
        resource.filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Ok(resource)
    }

    /// Create a resource with known pixel dimensions and no payload.
    pub fn with_dimensions(mime_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            data: Vec::new(),
            mime_type: mime_type.into(),
            filename: None,
            width,
            height,
            byte_len: 0,
        }
    }

    /// Set filename.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Width divided by height.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Identity used to recognise the same image across runs.
    pub fn signature(&self) -> String {
        format!(
            "{}_{}",
            self.filename.as_deref().unwrap_or("image"),
            self.byte_len
        )
    }
}

mod base64_payload {
    use base64::{engine::general_purpose, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Detect MIME type from data magic bytes.
pub fn detect_mime_type(data: &[u8]) -> Option<&'static str> {
    if data.len() < 8 {
        return None;
    }

    // JPEG: FF D8 FF
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }

    // PNG: 89 50 4E 47 0D 0A 1A 0A
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }

    if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        return Some("image/gif");
    }

    None
}

/// Read width/height from the PNG IHDR chunk.
fn png_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 24 || &data[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes([data[16], data[17], data[18], data[19]]);
    let height = u32::from_be_bytes([data[20], data[21], data[22], data[23]]);
    Some((width, height))
}

/// Walk JPEG segments until a start-of-frame marker.
fn jpeg_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        // Fill bytes
        if marker == 0xFF {
            pos += 1;
            continue;
        }
        let len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        let is_sof = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_sof {
            if pos + 9 > data.len() {
                return None;
            }
            let height = u16::from_be_bytes([data[pos + 5], data[pos + 6]]) as u32;
            let width = u16::from_be_bytes([data[pos + 7], data[pos + 8]]) as u32;
            return Some((width, height));
        }
        pos += 2 + len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut data = vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    #[test]
    fn test_png_dimensions() {
        let res = ImageResource::from_bytes(png_header(350, 210)).unwrap();
        assert_eq!(res.mime_type, "image/png");
        assert_eq!((res.width, res.height), (350, 210));
        assert!((res.aspect_ratio() - 350.0 / 210.0).abs() < 1e-6);
    }

    #[test]
    fn test_jpeg_dimensions() {
        let data = vec![
            0xFF, 0xD8, // SOI
            0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00, // APP0, len 4
            0xFF, 0xC0, 0x00, 0x11, 0x08, 0x00, 0x64, 0x00, 0xC8, // SOF0 100x200
        ];
        let res = ImageResource::from_bytes(data).unwrap();
        assert_eq!(res.mime_type, "image/jpeg");
        assert_eq!((res.width, res.height), (200, 100));
    }

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type(&png_header(1, 1)), Some("image/png"));
        assert_eq!(detect_mime_type(&[0u8; 4]), None);
        assert!(ImageResource::from_bytes(vec![0u8; 16]).is_err());
    }

    #[test]
    fn test_payload_survives_json() {
        let res = ImageResource::from_bytes(png_header(4, 2)).unwrap();
        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"data\":\"iVBORw0KGgo"));

        let back: ImageResource = serde_json::from_str(&json).unwrap();
        assert_eq!(back.data, res.data);
        assert_eq!(back, res);

        let empty = ImageResource::with_dimensions("image/png", 1, 1);
        assert!(!serde_json::to_string(&empty).unwrap().contains("data"));
    }

    #[test]
    fn test_signature() {
        let res = ImageResource::with_dimensions("image/png", 10, 10).with_filename("seal.png");
        assert_eq!(res.signature(), "seal.png_0");
    }
}
