//! File classification contract used by the scanner
//!
//! The scanner never looks at file formats itself. It asks a
//! [`FileClassifier`] whether a path is worth scanning, what kind of library
//! entry it is, and whether an embedded thumbnail can be located in it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;
use crate::marker::ManifestLoader;
use crate::models::{ModelType, ThumbnailDescriptor};
use crate::thumbnail;

/// Resolves the files making up a multi-file model from its marker file
pub trait MarkerLoader: Send + Sync + std::fmt::Debug {
    /// Files to hash for `marker`, in hashing order. The marker itself comes
    /// first, followed by the resources it references inside `directory`.
    fn marker_files(&self, marker: &Path, directory: &Path) -> Result<Vec<PathBuf>>;
}

/// What a scanned file is
#[derive(Debug, Clone)]
pub enum FileKind {
    /// A single-file model
    Model,
    /// A single-file animation
    Animation,
    /// The marker of a directory-based model
    MarkerModel(Arc<dyn MarkerLoader>),
    /// Not part of the library
    Ignored,
}

/// Classification contract. Implementations must be deterministic for a
/// given path's bytes; only thumbnail extraction may touch the file.
pub trait FileClassifier: Send + Sync {
    /// Whether the scanner should look at this file at all
    fn is_eligible(&self, path: &Path) -> bool;

    /// Classify an eligible file. Failures classify as [`FileKind::Ignored`].
    fn classify(&self, path: &Path) -> FileKind;

    /// Whether the format of this file can carry an embedded thumbnail
    fn can_extract_thumbnail(&self, path: &Path) -> bool;

    /// Locate the embedded thumbnail of `path`, if it has one
    fn extract_thumbnail(&self, path: &Path, base_dir: &Path) -> Result<Option<ThumbnailDescriptor>>;
}

/// Classifier driven by file extensions and well-known marker file names
#[derive(Debug, Clone)]
pub struct ExtensionClassifier {
    model_extensions: HashSet<String>,
    animation_extensions: HashSet<String>,
    thumbnail_extensions: HashSet<String>,
    markers: HashMap<String, Arc<dyn MarkerLoader>>,
}

impl Default for ExtensionClassifier {
    fn default() -> Self {
        let manifest: Arc<dyn MarkerLoader> = Arc::new(ManifestLoader::default());
        Self {
            model_extensions: to_set(&["gltf", "glb", "vrm", "pmx", "pmd", "fbx", "obj"]),
            animation_extensions: to_set(&["vmd", "bvh", "vrma"]),
            thumbnail_extensions: to_set(&["vrm", "glb"]),
            markers: ModelType::MARKER_FILES
                .iter()
                .map(|name| (name.to_string(), Arc::clone(&manifest)))
                .collect(),
        }
    }
}

fn to_set(items: &[&str]) -> HashSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn lowercase_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn lowercase_file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
}

impl ExtensionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn marker_loader(&self, path: &Path) -> Option<&Arc<dyn MarkerLoader>> {
        lowercase_file_name(path).and_then(|name| self.markers.get(&name))
    }
}

impl FileClassifier for ExtensionClassifier {
    fn is_eligible(&self, path: &Path) -> bool {
        let Some(name) = lowercase_file_name(path) else {
            return false;
        };
        if name.starts_with('.') {
            return false;
        }
        !matches!(self.classify(path), FileKind::Ignored)
    }

    fn classify(&self, path: &Path) -> FileKind {
        if let Some(loader) = self.marker_loader(path) {
            return FileKind::MarkerModel(Arc::clone(loader));
        }
        match lowercase_extension(path) {
            Some(ext) if self.model_extensions.contains(&ext) => FileKind::Model,
            Some(ext) if self.animation_extensions.contains(&ext) => FileKind::Animation,
            _ => FileKind::Ignored,
        }
    }

    fn can_extract_thumbnail(&self, path: &Path) -> bool {
        lowercase_extension(path)
            .map(|ext| self.thumbnail_extensions.contains(&ext))
            .unwrap_or(false)
    }

    fn extract_thumbnail(&self, path: &Path, _base_dir: &Path) -> Result<Option<ThumbnailDescriptor>> {
        if !self.can_extract_thumbnail(path) {
            return Ok(None);
        }
        thumbnail::locate_glb_thumbnail(path)
    }
}
