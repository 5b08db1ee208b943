//! Core data models for the model library

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use crate::error::{LibraryError, Result};
use crate::hash::ContentHash;

/// Model format classification, used for icons and thumbnail support
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Gltf,
    Vrm,
    Pmx,
    Pmd,
    Fbx,
    Obj,
    /// Directory-based model anchored by a JSON marker file
    Json,
    Unknown,
}

impl ModelType {
    /// Marker file names that anchor a multi-file model
    pub const MARKER_FILES: &'static [&'static str] = &["ysm.json", "model.json"];

    /// Infer the model type from a path: marker names first, then extension
    pub fn of(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.to_lowercase())
            .unwrap_or_default();
        if Self::MARKER_FILES.contains(&file_name.as_str()) {
            return ModelType::Json;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        Self::from_extension(&ext)
    }

    /// Infer the model type from a file extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "gltf" | "glb" => ModelType::Gltf,
            "vrm" => ModelType::Vrm,
            "pmx" => ModelType::Pmx,
            "pmd" => ModelType::Pmd,
            "fbx" => ModelType::Fbx,
            "obj" => ModelType::Obj,
            _ => ModelType::Unknown,
        }
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Gltf => "gltf",
            ModelType::Vrm => "vrm",
            ModelType::Pmx => "pmx",
            ModelType::Pmd => "pmd",
            ModelType::Fbx => "fbx",
            ModelType::Obj => "obj",
            ModelType::Json => "json",
            ModelType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A model recorded in the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelItem {
    /// Path relative to the library root, `/`-separated
    pub path: String,
    /// Display name (file name, or directory name for marker models)
    pub name: String,
    /// Last-modified time in milliseconds since the Unix epoch
    pub last_modified: i64,
    /// Content hash of the file, or composite hash for marker models
    pub hash: ContentHash,
    /// Whether the model is in the favorites list
    pub favorite: bool,
}

impl ModelItem {
    pub fn model_type(&self) -> ModelType {
        ModelType::of(Path::new(&self.path))
    }
}

/// An animation recorded in the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnimationItem {
    pub path: String,
    pub name: String,
    pub last_modified: i64,
    pub hash: ContentHash,
}

/// Location of an embedded thumbnail inside its source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailDescriptor {
    /// Absolute byte offset within the file
    pub offset: u64,
    /// Length in bytes
    pub length: u64,
    /// MIME type of the image, when the container declares one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Thumbnail of a model as seen by callers of the library
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelThumbnail {
    None,
    Embed {
        /// Path relative to the library root of the file holding the image
        path: String,
        offset: u64,
        length: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Sort column for model listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelOrder {
    #[default]
    Name,
    LastModified,
}

/// A paged, sorted and optionally filtered model listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelQuery {
    pub offset: usize,
    pub limit: usize,
    /// Case-insensitive substring of the display name
    pub search: Option<String>,
    pub order: ModelOrder,
    pub ascending: bool,
}

impl Default for ModelQuery {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
            search: None,
            order: ModelOrder::Name,
            ascending: true,
        }
    }
}

impl ModelQuery {
    /// Create a query for one page of the listing
    pub fn page(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Default::default()
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_order(mut self, order: ModelOrder, ascending: bool) -> Self {
        self.order = order;
        self.ascending = ascending;
        self
    }
}

/// Statistics of one scan pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    /// Eligible files dispatched to the worker pool
    pub files_visited: u64,
    /// Files whose hash came from the cache
    pub cache_hits: u64,
    /// Files whose full content was hashed
    pub files_hashed: u64,
    /// Marker models hashed over their resource files
    pub marker_hashes: u64,
    /// Model rows inserted or updated
    pub models_upserted: u64,
    /// Animation rows inserted or updated
    pub animations_upserted: u64,
    /// Thumbnails successfully located and recorded
    pub thumbnails_extracted: u64,
    /// Files that failed and were left unrecorded
    pub failed_files: u64,
    /// Rows removed by the sweep
    pub swept: SweepStats,
    /// Total pass duration in milliseconds
    pub duration_ms: u64,
}

impl ScanSummary {
    /// Check if the pass completed without per-file failures
    pub fn is_success(&self) -> bool {
        self.failed_files == 0
    }
}

/// Rows deleted by the mark-and-sweep step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepStats {
    pub models: u64,
    pub animations: u64,
    pub thumbnails: u64,
    pub cache_entries: u64,
}

/// Normalize `path` to a `/`-separated path relative to `root`
pub fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|_| {
        LibraryError::invalid_path(path.to_path_buf(), format!("not inside {:?}", root))
    })?;
    normalize_relative(relative)
        .ok_or_else(|| LibraryError::invalid_path(path.to_path_buf(), "not a valid relative path"))
}

/// Join the normal components of a relative path with `/`.
///
/// `.` components are dropped and `..` pops the previous component; a path
/// that climbs above its start, is absolute, or is not UTF-8 yields `None`.
pub fn normalize_relative(path: &Path) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Milliseconds since the Unix epoch for a file's modification time.
///
/// Fails when the platform reports no mtime or one before the epoch.
pub fn modified_millis(metadata: &std::fs::Metadata, path: &Path) -> Result<i64> {
    let modified = metadata
        .modified()
        .map_err(|e| LibraryError::io_with_path(e, path))?;
    let since_epoch = modified.duration_since(std::time::UNIX_EPOCH).map_err(|_| {
        LibraryError::io_error(
            Some(path.to_path_buf()),
            "modification time is before the Unix epoch",
        )
    })?;
    i64::try_from(since_epoch.as_millis()).map_err(|_| {
        LibraryError::io_error(Some(path.to_path_buf()), "modification time out of range")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::path::PathBuf;

    #[test]
    fn test_modified_millis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pmx");
        std::fs::write(&path, b"x").unwrap();

        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(1_600_000_000, 5_000_000))
            .unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        assert_eq!(modified_millis(&metadata, &path).unwrap(), 1_600_000_000_005);

        filetime::set_file_mtime(&path, filetime::FileTime::from_unix_time(-100, 0)).unwrap();
        let metadata = std::fs::metadata(&path).unwrap();
        let err = modified_millis(&metadata, &path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_model_type_of() {
        assert_eq!(ModelType::of(Path::new("a/b.VRM")), ModelType::Vrm);
        assert_eq!(ModelType::of(Path::new("scene.glb")), ModelType::Gltf);
        assert_eq!(ModelType::of(Path::new("miku.pmx")), ModelType::Pmx);
        assert_eq!(ModelType::of(Path::new("pack/YSM.json")), ModelType::Json);
        assert_eq!(ModelType::of(Path::new("pack/other.json")), ModelType::Unknown);
        assert_eq!(ModelType::of(Path::new("readme.txt")), ModelType::Unknown);
    }

    #[test]
    fn test_relative_path() {
        let root = Path::new("/library");
        assert_eq!(
            relative_path(root, Path::new("/library/sub/a.vrm")).unwrap(),
            "sub/a.vrm"
        );
        assert_eq!(
            relative_path(root, Path::new("/library/./sub/../b.vrm")).unwrap(),
            "b.vrm"
        );
        assert!(relative_path(root, Path::new("/elsewhere/a.vrm")).is_err());
        assert!(relative_path(root, Path::new("/library")).is_err());
    }

    #[test]
    fn test_normalize_rejects_escape() {
        assert_eq!(normalize_relative(Path::new("../a.vrm")), None);
        assert_eq!(normalize_relative(Path::new("a/../../b")), None);
        assert_eq!(normalize_relative(Path::new("a/./b")), Some("a/b".to_string()));
    }

    #[test]
    fn test_model_query_builder() {
        let query = ModelQuery::page(20, 10)
            .with_search("miku")
            .with_order(ModelOrder::LastModified, false);
        assert_eq!(query.offset, 20);
        assert_eq!(query.limit, 10);
        assert_eq!(query.search.as_deref(), Some("miku"));
        assert_eq!(query.order, ModelOrder::LastModified);
        assert!(!query.ascending);
    }

    proptest! {
        #[test]
        fn prop_normalized_paths_have_no_empty_or_dot_segments(
            parts in prop::collection::vec("[a-zA-Z0-9_ -]{1,8}|\\.|\\.\\.", 1..8)
        ) {
            let path: PathBuf = parts.iter().collect();
            if let Some(normalized) = normalize_relative(&path) {
                prop_assert!(!normalized.starts_with('/'));
                for segment in normalized.split('/') {
                    prop_assert!(!segment.is_empty());
                    prop_assert!(segment != "." && segment != "..");
                }
            }
        }

        #[test]
        fn prop_plain_segments_join_with_slash(
            parts in prop::collection::vec("[a-z0-9_]{1,8}", 1..6)
        ) {
            let path: PathBuf = parts.iter().collect();
            prop_assert_eq!(normalize_relative(&path), Some(parts.join("/")));
        }
    }
}
