//! Input resolution: uploaded bytes plus the media type they claim to be.
//!
//! The extractor only accepts a fixed allow-list of media types. The type a
//! host reports (browser `File.type`, HTTP `Content-Type`) is used as given;
//! when reading from disk we sniff magic bytes first and fall back to the
//! extension, so a mislabelled `.png` that is really a JPEG still decodes.

use crate::error::IntakeError;
use crate::message::FileRef;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Fallback type for files whose content we could not identify.
pub const UNKNOWN_MEDIA_TYPE: &str = "application/octet-stream";

/// Accepted media types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Pdf,
    Png,
    Jpeg,
    Gif,
}

impl MediaType {
    /// Parse a MIME string. Parameters (`; charset=…`) and case are ignored.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(MediaType::Pdf),
            "image/png" => Some(MediaType::Png),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/gif" => Some(MediaType::Gif),
            _ => None,
        }
    }

    /// Identify content by its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(MediaType::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(MediaType::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(MediaType::Jpeg)
        } else if bytes.starts_with(b"GIF8") {
            Some(MediaType::Gif)
        } else {
            None
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaType::Pdf),
            "png" => Some(MediaType::Png),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "gif" => Some(MediaType::Gif),
            _ => None,
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Png => "image/png",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Gif => "image/gif",
        }
    }

    /// Multi-page documents that must be rasterised before recognition.
    pub fn is_paginated(self) -> bool {
        matches!(self, MediaType::Pdf)
    }

    /// Decoder format for single-image types.
    pub fn image_format(self) -> Option<image::ImageFormat> {
        match self {
            MediaType::Pdf => None,
            MediaType::Png => Some(image::ImageFormat::Png),
            MediaType::Jpeg => Some(image::ImageFormat::Jpeg),
            MediaType::Gif => Some(image::ImageFormat::Gif),
        }
    }
}

/// An uploaded file. Cloning shares the bytes.
#[derive(Debug, Clone)]
pub struct FileBlob {
    pub name: String,
    pub media_type: String,
    pub data: Arc<[u8]>,
}

impl FileBlob {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    /// Read a local file, detecting its media type.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, IntakeError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(IntakeError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let data = std::fs::read(path).map_err(|source| IntakeError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let media_type = detect_media_type(path, &data);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        debug!("Resolved local file {} as {}", path.display(), media_type);

        Ok(Self::new(name, media_type, data))
    }

    /// The allow-listed type of this blob, if any.
    pub fn media(&self) -> Option<MediaType> {
        MediaType::from_mime(&self.media_type)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn file_ref(&self) -> FileRef {
        FileRef {
            name: self.name.clone(),
            media_type: self.media_type.clone(),
            size: self.data.len(),
        }
    }
}

fn detect_media_type(path: &Path, data: &[u8]) -> String {
    MediaType::sniff(data)
        .or_else(|| {
            path.extension()
                .and_then(|e| e.to_str())
                .and_then(MediaType::from_extension)
        })
        .map(|m| m.mime().to_string())
        .unwrap_or_else(|| UNKNOWN_MEDIA_TYPE.to_string())
}

/// Resolve a path given on the command line relative to the working directory.
pub fn resolve_path(input: &str) -> PathBuf {
    let trimmed = input.trim().trim_matches('"');
    PathBuf::from(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mime_parsing_is_lenient() {
        assert_eq!(MediaType::from_mime("image/JPEG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_mime("image/jpg"), Some(MediaType::Jpeg));
        assert_eq!(
            MediaType::from_mime("application/pdf; charset=binary"),
            Some(MediaType::Pdf)
        );
        assert_eq!(MediaType::from_mime("text/plain"), None);
        assert_eq!(MediaType::from_mime(""), None);
    }

    #[test]
    fn sniff_magic_bytes() {
        assert_eq!(MediaType::sniff(b"%PDF-1.7\n"), Some(MediaType::Pdf));
        assert_eq!(MediaType::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(MediaType::Jpeg));
        assert_eq!(MediaType::sniff(b"GIF89a"), Some(MediaType::Gif));
        assert_eq!(MediaType::sniff(b"hello"), None);
    }

    #[test]
    fn only_pdf_is_paginated() {
        assert!(MediaType::Pdf.is_paginated());
        assert!(!MediaType::Png.is_paginated());
        assert!(MediaType::Pdf.image_format().is_none());
    }

    #[test]
    fn from_path_prefers_content_over_extension() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(b"%PDF-1.4 fake").unwrap();
        let blob = FileBlob::from_path(tmp.path()).unwrap();
        assert_eq!(blob.media_type, "application/pdf");
        assert_eq!(blob.len(), 13);
    }

    #[test]
    fn from_path_unknown_content() {
        let mut tmp = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        tmp.write_all(b"plain words").unwrap();
        let blob = FileBlob::from_path(tmp.path()).unwrap();
        assert_eq!(blob.media_type, UNKNOWN_MEDIA_TYPE);
        assert!(blob.media().is_none());
    }

    #[test]
    fn from_path_missing_file() {
        let err = FileBlob::from_path("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, IntakeError::FileNotFound { .. }));
    }
}
