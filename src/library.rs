//! The model library facade
//!
//! [`ModelLibrary`] owns the store, the scanner, the scan scheduler and the
//! optional filesystem watcher. Callers only ever talk to it: they query
//! models and animations, toggle favorites, read thumbnails, and ask for
//! scans. Queries run on their own connection and only see committed passes.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::classifier::FileClassifier;
use crate::config::LibraryConfig;
use crate::db::Database;
use crate::error::{LibraryError, Result};
use crate::hash::ContentHash;
use crate::models::{
    normalize_relative, AnimationItem, ModelItem, ModelQuery, ModelThumbnail, ScanSummary,
};
use crate::repository::{
    AnimationRepository, FavoriteRepository, ModelRepository, ThumbnailRepository,
};
use crate::scanner::Scanner;
use crate::scheduler::{ScanFn, ScanScheduler, SchedulerState};
use crate::watcher::{ChangeCallback, LibraryWatcher, NotifyWatcher};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Something observers of the library should re-query after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryUpdate {
    /// A scan pass finished, successfully or not
    ScanCompleted(DateTime<Utc>),
    FavoritesChanged(DateTime<Utc>),
}

impl LibraryUpdate {
    pub fn time(&self) -> DateTime<Utc> {
        match self {
            LibraryUpdate::ScanCompleted(t) | LibraryUpdate::FavoritesChanged(t) => *t,
        }
    }
}

#[derive(Default)]
struct UpdateState {
    last_scan: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    subscribers: Vec<Sender<LibraryUpdate>>,
}

#[derive(Default)]
struct UpdateSignal {
    state: Mutex<UpdateState>,
}

impl UpdateSignal {
    fn publish(&self, update: LibraryUpdate) {
        let mut state = lock(&self.state);
        if let LibraryUpdate::ScanCompleted(t) = update {
            state.last_scan = Some(t);
        }
        state.last_update = Some(update.time());
        state.subscribers.retain(|tx| tx.send(update).is_ok());
    }
}

/// Runs one pass at a time, whoever asks for it
struct PassRunner {
    scanner: Scanner,
    db: Arc<Database>,
    pass_lock: Mutex<()>,
    updates: Arc<UpdateSignal>,
}

impl PassRunner {
    fn run(&self) -> Result<ScanSummary> {
        let _pass = lock(&self.pass_lock);
        let result = self.scanner.scan(&self.db);
        self.updates.publish(LibraryUpdate::ScanCompleted(Utc::now()));
        result
    }
}

/// An indexed library of models and animations
pub struct ModelLibrary {
    config: LibraryConfig,
    db: Arc<Database>,
    runner: Arc<PassRunner>,
    scheduler: Arc<ScanScheduler>,
    watcher: Mutex<Box<dyn LibraryWatcher>>,
    updates: Arc<UpdateSignal>,
    closed: AtomicBool,
}

impl ModelLibrary {
    /// Open the library described by `config`.
    ///
    /// Creates the library directory (seeding the configured default content
    /// when it did not exist), opens or recovers the store, starts the
    /// scheduler and, if configured, the watcher and an initial scan.
    pub fn open(config: LibraryConfig, classifier: Arc<dyn FileClassifier>) -> Result<Self> {
        let library_dir = config.library_dir.clone();
        let existed = library_dir.exists();
        std::fs::create_dir_all(&library_dir)
            .map_err(|e| LibraryError::io_with_path(e, &library_dir))?;
        if !existed {
            seed_default_content(&config);
        }

        let db = Arc::new(Database::open_or_recover(
            &config.database_path(),
            &config.backup_database_path(),
            config.busy_timeout(),
        )?);
        let updates = Arc::new(UpdateSignal::default());
        let runner = Arc::new(PassRunner {
            scanner: Scanner::new(config.clone(), Arc::clone(&classifier))?,
            db: Arc::clone(&db),
            pass_lock: Mutex::new(()),
            updates: Arc::clone(&updates),
        });
        let scan: ScanFn = {
            let runner = Arc::clone(&runner);
            Box::new(move || runner.run().map(drop))
        };
        let scheduler = Arc::new(ScanScheduler::start(config.debounce(), scan)?);

        let on_change: ChangeCallback = {
            let scheduler = Arc::clone(&scheduler);
            Arc::new(move || scheduler.request(false))
        };
        let watcher = NotifyWatcher::new(&library_dir, classifier, on_change);

        let library = Self {
            config,
            db,
            runner,
            scheduler,
            watcher: Mutex::new(Box::new(watcher)),
            updates,
            closed: AtomicBool::new(false),
        };
        if library.config.watch {
            if let Err(e) = library.start_watching() {
                log::warn!("Failed to start watching {:?}: {}", library_dir, e);
            }
        }
        if library.config.scan_on_open {
            library.schedule_scan(true);
        }
        Ok(library)
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    /// Number of models whose name contains `search`
    pub fn total_models(&self, search: Option<&str>) -> Result<u64> {
        self.db.read(|conn| ModelRepository::new(conn).count(search))
    }

    /// One page of models, favorites first
    pub fn models(&self, query: &ModelQuery) -> Result<Vec<ModelItem>> {
        self.db.read(|conn| ModelRepository::new(conn).find_range(query))
    }

    pub fn model_by_path(&self, path: &str) -> Result<Option<ModelItem>> {
        self.db.read(|conn| ModelRepository::new(conn).find_by_path(path))
    }

    pub fn model_by_hash(&self, hash: &ContentHash) -> Result<Option<ModelItem>> {
        self.db.read(|conn| ModelRepository::new(conn).find_by_hash(hash))
    }

    pub fn animations(&self) -> Result<Vec<AnimationItem>> {
        self.db.read(|conn| AnimationRepository::new(conn).find_all())
    }

    /// Where the thumbnail of `model` lives, if one was extracted
    pub fn model_thumbnail(&self, model: &ModelItem) -> Result<ModelThumbnail> {
        let found = self
            .db
            .read(|conn| ThumbnailRepository::new(conn).find(&model.hash))?;
        Ok(match found {
            Some(thumbnail) => ModelThumbnail::Embed {
                path: model.path.clone(),
                offset: thumbnail.offset,
                length: thumbnail.length,
                mime_type: thumbnail.mime_type,
            },
            None => ModelThumbnail::None,
        })
    }

    /// Raw bytes of an embedded thumbnail. No decoding happens here.
    pub fn read_thumbnail(&self, thumbnail: &ModelThumbnail) -> Result<Option<Vec<u8>>> {
        let ModelThumbnail::Embed {
            path,
            offset,
            length,
            ..
        } = thumbnail
        else {
            return Ok(None);
        };
        let relative = normalize_relative(Path::new(path)).ok_or_else(|| {
            LibraryError::invalid_path(path.into(), "thumbnail path escapes the library")
        })?;
        let full_path = self.config.library_dir.join(relative);
        let mut file = File::open(&full_path).map_err(|e| LibraryError::io_with_path(e, &full_path))?;
        file.seek(SeekFrom::Start(*offset))
            .map_err(|e| LibraryError::io_with_path(e, &full_path))?;
        let mut bytes = Vec::new();
        file.take(*length)
            .read_to_end(&mut bytes)
            .map_err(|e| LibraryError::io_with_path(e, &full_path))?;
        if bytes.len() as u64 != *length {
            return Err(LibraryError::io_error(
                Some(full_path),
                "thumbnail range exceeds file length",
            ));
        }
        Ok(Some(bytes))
    }

    /// Add or remove a favorite
    pub fn set_favorite(&self, path: &str, favorite: bool) -> Result<()> {
        let now = Utc::now();
        let changed = self.db.write(|conn| {
            FavoriteRepository::new(conn).set_favorite(path, favorite, now.timestamp_millis())
        })?;
        if changed {
            log::debug!("Favorite {} set to {}", path, favorite);
            self.updates.publish(LibraryUpdate::FavoritesChanged(now));
        }
        Ok(())
    }

    /// Favorited models, most recently favorited first
    pub fn favorite_models(&self) -> Result<Vec<ModelItem>> {
        self.db.read(|conn| FavoriteRepository::new(conn).find_all())
    }

    pub fn total_favorite_models(&self) -> Result<u64> {
        self.db.read(|conn| FavoriteRepository::new(conn).count())
    }

    /// Position of `path` in [`favorite_models`](Self::favorite_models)
    pub fn favorite_index(&self, path: &str) -> Result<Option<u64>> {
        self.db
            .read(|conn| FavoriteRepository::new(conn).rank_index(path))
    }

    /// Ask the scheduler for a pass
    pub fn schedule_scan(&self, immediate: bool) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.scheduler.request(immediate);
    }

    /// Run a pass on the calling thread, after any pass already in flight
    pub fn scan_now(&self) -> Result<ScanSummary> {
        self.runner.run()
    }

    pub fn scan_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    /// Passes completed by the scheduler so far
    pub fn completed_scans(&self) -> u64 {
        self.scheduler.completed_passes()
    }

    /// Block until the scheduler has completed more than `after` passes
    pub fn wait_for_scan(&self, after: u64, timeout: Duration) -> bool {
        self.scheduler.wait_for_pass(after, timeout)
    }

    pub fn start_watching(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        lock(&self.watcher).start()
    }

    pub fn stop_watching(&self) {
        lock(&self.watcher).stop();
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watcher).is_watching()
    }

    /// Completion time of the most recent pass
    pub fn last_scan_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.updates.state).last_scan
    }

    /// Time of the most recent pass or favorite change
    pub fn last_update_time(&self) -> Option<DateTime<Utc>> {
        lock(&self.updates.state).last_update
    }

    /// Receive every later [`LibraryUpdate`]
    pub fn subscribe_updates(&self) -> Receiver<LibraryUpdate> {
        let (tx, rx) = mpsc::channel();
        lock(&self.updates.state).subscribers.push(tx);
        rx
    }

    /// Stop watching and scheduling. A pass in flight finishes first.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watching();
        self.scheduler.stop();
        log::info!("Closed model library {:?}", self.config.library_dir);
    }
}

impl Drop for ModelLibrary {
    fn drop(&mut self) {
        self.close();
    }
}

/// Extract bundled files into a freshly created library directory
fn seed_default_content(config: &LibraryConfig) {
    for content in &config.default_content {
        let Some(relative) = normalize_relative(Path::new(&content.name)) else {
            log::warn!("Skipping default content with invalid name {:?}", content.name);
            continue;
        };
        let target = config.library_dir.join(relative);
        let written = target
            .parent()
            .map_or(Ok(()), std::fs::create_dir_all)
            .and_then(|_| std::fs::write(&target, &content.bytes));
        match written {
            Ok(()) => log::info!("Extracted default content {:?}", target),
            Err(e) => log::warn!("Failed to extract default content {:?}: {}", target, e),
        }
    }
}
