use image::{ImageError, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
    #[error("Unsupported image extension: {0:?}")]
    UnsupportedExtension(String),
    #[error("Image not found: {0}")]
    NotFound(String),
    #[error("Failed to encode image: {0}")]
    Encode(ImageError),
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredImage {
    pub filename: String,
    pub path: PathBuf,
}

/// Flat directory of uploaded images named `<uuid>.<ext>`.
#[derive(Debug, Clone)]
pub struct ImageStore {
    root: PathBuf,
}

impl ImageStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Everything after the last `.`, or the whole name when there is none.
    pub fn extract_file_extension(original_filename: &str) -> &str {
        original_filename
            .rsplit_once('.')
            .map_or(original_filename, |(_, extension)| extension)
    }

    pub fn image_format(extension: &str) -> Result<ImageFormat, StorageError> {
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(StorageError::UnsupportedExtension(extension.to_string()));
        }

        ImageFormat::from_extension(extension)
            .filter(|format| format.writing_enabled())
            .ok_or_else(|| StorageError::UnsupportedExtension(extension.to_string()))
    }

    pub fn generate_filename(extension: &str) -> String {
        format!("{}.{}", Uuid::new_v4(), extension)
    }

    /// Encodes `image` in the format named by `extension`. Failures the
    /// chosen format causes (unsupported color type, size limits) are
    /// reported as an unusable extension.
    pub fn encode(image: &RgbImage, extension: &str) -> Result<Vec<u8>, StorageError> {
        let format = Self::image_format(extension)?;
        let mut buffer = Cursor::new(Vec::new());
        match image.write_to(&mut buffer, format) {
            Ok(()) => Ok(buffer.into_inner()),
            Err(
                ImageError::Unsupported(_)
                | ImageError::Encoding(_)
                | ImageError::Parameter(_)
                | ImageError::Limits(_),
            ) => Err(StorageError::UnsupportedExtension(extension.to_string())),
            Err(e) => Err(StorageError::Encode(e)),
        }
    }

    /// Path of `filename` inside the store, refusing anything that could
    /// escape the directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf, StorageError> {
        validate_filename(filename)?;
        Ok(self.root.join(filename))
    }

    pub async fn save(&self, filename: &str, bytes: &[u8]) -> Result<StoredImage, StorageError> {
        let path = self.resolve(filename)?;
        tokio::fs::write(&path, bytes).await?;
        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());

        Ok(StoredImage {
            filename: filename.to_string(),
            path,
        })
    }
}

pub fn validate_filename(filename: &str) -> Result<(), StorageError> {
    let invalid = filename.is_empty()
        || filename.starts_with('.')
        || filename.contains("..")
        || filename.contains(['/', '\\', '\0', ':'])
        || Path::new(filename).is_absolute();

    if invalid {
        return Err(StorageError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}
