//! Content descriptors.
//!
//! A [`ContentDescriptor`] identifies one unit of content travelling through the
//! pipeline. Descriptors are plain values: stages that rename, re-home or
//! replace content build a new descriptor with the `with_*` methods instead of
//! mutating the one they received.

use std::fmt;
use std::path::{Path, PathBuf};

/// One unit of content and its destination metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentDescriptor {
    /// When consuming, save the content under this file name
    file_name: String,
    /// When consuming, recreate this folder structure below the destination
    relative_folder: String,
    /// Where the bytes can be read from
    locator: PathBuf,
    /// Expected byte length of the content at `locator`
    size: u64,
}

impl ContentDescriptor {
    pub fn new(
        file_name: impl Into<String>,
        relative_folder: impl Into<String>,
        locator: impl Into<PathBuf>,
        size: u64,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            relative_folder: relative_folder.into(),
            locator: locator.into(),
            size,
        }
    }

    /// Build a descriptor for a file on disk, reading its current size.
    ///
    /// `root` is the folder the relative folder is computed against. Files
    /// directly inside `root` get an empty relative folder.
    pub async fn from_path(path: &Path, root: &Path) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let relative_folder = path
            .parent()
            .and_then(|parent| parent.strip_prefix(root).ok())
            .map(|rel| rel.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self::new(file_name, relative_folder, path, metadata.len()))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn relative_folder(&self) -> &str {
        &self.relative_folder
    }

    pub fn locator(&self) -> &Path {
        &self.locator
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Destination path relative to a sink's root: `relative_folder/file_name`.
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.relative_folder).join(&self.file_name)
    }

    pub fn with_file_name(&self, file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            ..self.clone()
        }
    }

    pub fn with_relative_folder(&self, relative_folder: impl Into<String>) -> Self {
        Self {
            relative_folder: relative_folder.into(),
            ..self.clone()
        }
    }

    /// Point the descriptor at different bytes, e.g. a converted temp file.
    pub fn with_content(&self, locator: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            locator: locator.into(),
            size,
            ..self.clone()
        }
    }
}

impl fmt::Display for ContentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {})",
            self.relative_path().display(),
            self.size,
            self.locator.display()
        )
    }
}
