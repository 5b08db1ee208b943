//! Filesystem watcher for the library directory
//!
//! Watches the library recursively and asks for a scan whenever a change
//! touches something the classifier cares about. The watcher never scans by
//! itself; coalescing is the scheduler's job.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::classifier::FileClassifier;
use crate::error::Result;

/// Called for every relevant change
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Source of change notifications for the library directory
pub trait LibraryWatcher: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self);
    fn is_watching(&self) -> bool;
}

/// [`LibraryWatcher`] backed by the platform's native notification API
pub struct NotifyWatcher {
    root: PathBuf,
    classifier: Arc<dyn FileClassifier>,
    on_change: ChangeCallback,
    watcher: Option<RecommendedWatcher>,
}

impl NotifyWatcher {
    pub fn new(
        root: impl Into<PathBuf>,
        classifier: Arc<dyn FileClassifier>,
        on_change: ChangeCallback,
    ) -> Self {
        Self {
            root: root.into(),
            classifier,
            on_change,
            watcher: None,
        }
    }
}

impl LibraryWatcher for NotifyWatcher {
    fn start(&mut self) -> Result<()> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let root = self.root.clone();
        let classifier = Arc::clone(&self.classifier);
        let on_change = Arc::clone(&self.on_change);

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if is_relevant_event(&event, &root, classifier.as_ref()) {
                    log::debug!("Library change detected: {:?}", event.paths);
                    on_change();
                }
            }
            Err(e) => log::warn!("File watcher error: {}", e),
        })?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        log::info!("Started watching model library at {:?}", self.root);
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(e) = watcher.unwatch(&self.root) {
                log::debug!("Failed to unwatch {:?}: {}", self.root, e);
            }
            log::info!("Stopped watching model library at {:?}", self.root);
        }
    }

    fn is_watching(&self) -> bool {
        self.watcher.is_some()
    }
}

impl Drop for NotifyWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn is_relevant_event(event: &Event, root: &Path, classifier: &dyn FileClassifier) -> bool {
    if !matches!(
        event.kind,
        EventKind::Any | EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| is_relevant_path(path, root, classifier))
}

/// Eligible files matter, and so do directories, since removing or renaming
/// one affects every file below it. Hidden entries, including the store
/// itself, never do.
fn is_relevant_path(path: &Path, root: &Path, classifier: &dyn FileClassifier) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let hidden = relative.components().any(|c| match c {
        Component::Normal(part) => part.to_string_lossy().starts_with('.'),
        _ => false,
    });
    if hidden {
        return false;
    }
    classifier.is_eligible(path) || path.is_dir() || path.extension().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ExtensionClassifier;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_relevant_paths() {
        let classifier = ExtensionClassifier::default();
        let root = Path::new("/library");
        assert!(is_relevant_path(Path::new("/library/a.vrm"), root, &classifier));
        assert!(is_relevant_path(Path::new("/library/pack/ysm.json"), root, &classifier));
        // A removed directory no longer exists to be checked
        assert!(is_relevant_path(Path::new("/library/removed_dir"), root, &classifier));
        assert!(!is_relevant_path(Path::new("/library/.cache.db-wal"), root, &classifier));
        assert!(!is_relevant_path(Path::new("/library/.git/a.vrm"), root, &classifier));
        assert!(!is_relevant_path(Path::new("/library/readme.txt"), root, &classifier));
        assert!(!is_relevant_path(Path::new("/elsewhere/a.vrm"), root, &classifier));
    }

    #[test]
    fn test_start_fails_for_missing_directory() {
        let dir = tempdir().unwrap();
        let mut watcher = NotifyWatcher::new(
            dir.path().join("missing"),
            Arc::new(ExtensionClassifier::default()),
            Arc::new(|| {}),
        );
        assert!(watcher.start().is_err());
        assert!(!watcher.is_watching());
    }

    #[test]
    fn test_new_model_triggers_callback() {
        let dir = tempdir().unwrap();
        let (tx, rx) = mpsc::channel();
        let tx = std::sync::Mutex::new(tx);
        let mut watcher = NotifyWatcher::new(
            dir.path(),
            Arc::new(ExtensionClassifier::default()),
            Arc::new(move || {
                let _ = tx.lock().unwrap().send(());
            }),
        );
        watcher.start().unwrap();
        assert!(watcher.is_watching());

        std::fs::write(dir.path().join("new.vrm"), b"glTF").unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(10)).is_ok());

        watcher.stop();
        assert!(!watcher.is_watching());
    }
}
