//! JSON manifest marker files
//!
//! A directory-based model ships a manifest (`ysm.json` or `model.json`) that
//! lists the geometry, texture and animation files of the player model. The
//! manifest plus every file it lists make up the model's identity.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::classifier::MarkerLoader;
use crate::error::{LibraryError, Result};
use crate::models::normalize_relative;

/// Manifests larger than this are rejected
const MAX_MANIFEST_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct Manifest {
    files: ManifestFiles,
}

#[derive(Debug, Deserialize)]
struct ManifestFiles {
    player: PlayerFiles,
}

#[derive(Debug, Deserialize)]
struct PlayerFiles {
    #[serde(default)]
    model: BTreeMap<String, String>,
    #[serde(default)]
    texture: Vec<TextureEntry>,
    #[serde(default)]
    animation: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TextureEntry {
    Path(String),
    Pbr { normal: Option<String> },
}

/// Loader for JSON manifest marker files
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader;

impl ManifestLoader {
    fn read_manifest(marker: &Path) -> Result<Manifest> {
        let file = File::open(marker).map_err(|e| LibraryError::io_with_path(e, marker))?;
        let mut content = String::new();
        file.take(MAX_MANIFEST_SIZE)
            .read_to_string(&mut content)
            .map_err(|e| LibraryError::io_with_path(e, marker))?;
        serde_json::from_str(&content)
            .map_err(|e| LibraryError::manifest_error(marker.to_path_buf(), e.to_string()))
    }
}

impl MarkerLoader for ManifestLoader {
    fn marker_files(&self, marker: &Path, directory: &Path) -> Result<Vec<PathBuf>> {
        let manifest = Self::read_manifest(marker)?;
        let player = manifest.files.player;

        let textures = player.texture.into_iter().filter_map(|entry| match entry {
            TextureEntry::Path(path) => Some(path),
            TextureEntry::Pbr { normal } => normal,
        });
        let referenced = player
            .model
            .into_values()
            .chain(textures)
            .chain(player.animation.unwrap_or_default().into_values());

        let mut seen = HashSet::new();
        let mut files = vec![marker.to_path_buf()];
        seen.insert(marker.to_path_buf());
        for name in referenced {
            let relative = normalize_relative(Path::new(&name)).ok_or_else(|| {
                LibraryError::manifest_error(
                    marker.to_path_buf(),
                    format!("resource {:?} is outside the model directory", name),
                )
            })?;
            let path = directory.join(relative);
            if seen.insert(path.clone()) {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_marker_files_in_manifest_order() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ysm.json");
        fs::write(
            &marker,
            r#"{
                "version": 2,
                "files": {
                    "player": {
                        "model": { "main": "main.json", "arm": "arm.json" },
                        "texture": ["skin.png", { "normal": "skin_n.png" }, "skin.png"],
                        "animation": { "main": "main.animation.json" }
                    }
                }
            }"#,
        )
        .unwrap();

        let files = ManifestLoader.marker_files(&marker, dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        // BTreeMap orders model entries by key: "arm" before "main"
        assert_eq!(
            names,
            vec![
                "ysm.json",
                "arm.json",
                "main.json",
                "skin.png",
                "skin_n.png",
                "main.animation.json"
            ]
        );
    }

    #[test]
    fn test_resources_must_stay_inside_directory() {
        let dir = tempdir().unwrap();
        let pack = dir.path().join("pack");
        fs::create_dir(&pack).unwrap();
        let marker = pack.join("ysm.json");
        for resource in ["../../secret.txt", "/etc/passwd", "sub/../../up.png"] {
            let manifest = serde_json::json!({
                "files": { "player": { "model": { "main": resource } } }
            });
            fs::write(&marker, manifest.to_string()).unwrap();
            let err = ManifestLoader.marker_files(&marker, &pack).unwrap_err();
            assert_eq!(err.kind, crate::error::LibraryErrorKind::ManifestError);
        }

        fs::write(
            &marker,
            r#"{"files":{"player":{"model":{"main":"./geo/../main.json"}}}}"#,
        )
        .unwrap();
        let files = ManifestLoader.marker_files(&marker, &pack).unwrap();
        assert_eq!(files, vec![marker.clone(), pack.join("main.json")]);
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("model.json");
        fs::write(&marker, "{ not json").unwrap();
        let err = ManifestLoader.marker_files(&marker, dir.path()).unwrap_err();
        assert_eq!(err.kind, crate::error::LibraryErrorKind::ManifestError);
    }
}
