//! Artifacts discovered in a sandbox working directory.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Broad category of an artifact, inferred from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Raster or vector image (png, jpg, svg, ...).
    Image,
    /// Rendered document (pdf, html).
    Document,
    /// Tabular or structured data (csv, json).
    Data,
    /// Anything else matched by the configured extension set.
    Other,
}

impl ArtifactKind {
    /// Infers the kind from a file extension (case-insensitive).
    #[must_use]
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "svg" | "webp" | "bmp" => Self::Image,
            "pdf" | "html" | "htm" => Self::Document,
            "csv" | "json" | "parquet" | "tsv" => Self::Data,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Document => write!(f, "document"),
            Self::Data => write!(f, "data"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// A file produced by executed code.
///
/// Artifacts are never constructed by stages; they are discovered by
/// diffing the working directory around a sandbox run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Kind inferred from the extension.
    pub kind: ArtifactKind,
    /// `<stage>@<run id>` of the execution that produced it.
    pub produced_by: String,
}

impl Artifact {
    /// Creates an artifact for `path`, inferring its kind.
    #[must_use]
    pub fn discovered(path: impl Into<PathBuf>, produced_by: impl Into<String>) -> Self {
        let path = path.into();
        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(ArtifactKind::Other, ArtifactKind::from_extension);
        Self {
            path,
            kind,
            produced_by: produced_by.into(),
        }
    }

    /// Returns the file name component.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }

    /// Returns the path relative to `root`, or the full path if outside it.
    #[must_use]
    pub fn relative_to(&self, root: &Path) -> PathBuf {
        self.path
            .strip_prefix(root)
            .map_or_else(|_| self.path.clone(), Path::to_path_buf)
    }
}
