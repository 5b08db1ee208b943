//! Scanner module - one incremental pass over the library directory
//!
//! The directory is walked synchronously, in file-name order, on the calling
//! thread. Every eligible file is handed to a bounded rayon pool where its
//! hash is resolved and its record written. The pass waits for every worker,
//! sweeps whatever it did not observe, and commits as a single transaction.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

use crate::classifier::{FileClassifier, FileKind, MarkerLoader};
use crate::config::LibraryConfig;
use crate::db::{Database, ScanTransaction};
use crate::error::{LibraryError, LibraryErrorKind, Result};
use crate::hash::{self, ContentHash};
use crate::models::{modified_millis, normalize_relative, relative_path, ScanSummary};
use crate::progress::{ProgressReporter, DEFAULT_PROGRESS_INTERVAL_MS};
use crate::repository::{
    AnimationRepository, CacheRepository, ModelRepository, ThumbnailRepository,
};
use crate::session::ScanSession;

/// How the hash of one file is obtained, resolved once per file
#[derive(Debug)]
enum HashStrategy {
    /// Path and mtime match the cache
    CacheHit(ContentHash),
    /// Digest over the marker and every resource it references
    MarkerComposite(Arc<dyn MarkerLoader>),
    /// Stream the whole file
    FullFile,
}

/// Running counters of a pass, shared by the walker and the workers
#[derive(Debug, Default)]
struct Counters {
    files_visited: AtomicU64,
    cache_hits: AtomicU64,
    files_hashed: AtomicU64,
    marker_hashes: AtomicU64,
    models_upserted: AtomicU64,
    animations_upserted: AtomicU64,
    thumbnails_extracted: AtomicU64,
    failed_files: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Scanner bound to one library directory and classifier
pub struct Scanner {
    config: LibraryConfig,
    classifier: Arc<dyn FileClassifier>,
    progress: ProgressReporter,
    pool: rayon::ThreadPool,
}

impl Scanner {
    pub fn new(config: LibraryConfig, classifier: Arc<dyn FileClassifier>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_concurrency())
            .thread_name(|i| format!("scan-worker-{}", i))
            .build()
            .map_err(|e| LibraryError::new(LibraryErrorKind::Unknown, None, e.to_string()))?;
        let progress = ProgressReporter::new(config.progress, DEFAULT_PROGRESS_INTERVAL_MS);
        Ok(Self {
            config,
            classifier,
            progress,
            pool,
        })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn classifier(&self) -> &Arc<dyn FileClassifier> {
        &self.classifier
    }

    /// Run one full pass against `db`.
    ///
    /// Per-file failures are logged and counted in the summary. Any error
    /// returned here means the pass was rolled back as a whole.
    pub fn scan(&self, db: &Database) -> Result<ScanSummary> {
        let start = Instant::now();
        let root = &self.config.library_dir;
        if !root.is_dir() {
            return Err(LibraryError::not_found(root.clone()));
        }
        log::info!("Scanning library {:?}", root);
        self.progress.report_start(&self.config);

        let tx = db.begin_scan()?;
        let session = ScanSession::new();
        let pass = Pass {
            root,
            config: &self.config,
            classifier: self.classifier.as_ref(),
            progress: &self.progress,
            tx: &tx,
            session: &session,
            counters: Counters::default(),
        };

        self.pool.scope(|scope| {
            let pass = &pass;
            let walker = WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|entry| {
                    entry.depth() == 0
                        || !entry.file_type().is_dir()
                        || !self
                            .config
                            .should_ignore_dir(&entry.file_name().to_string_lossy())
                });

            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        pass.fail(&LibraryError::from(e));
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.into_path();
                if let Some(kind) = pass.admit(&path) {
                    bump(&pass.counters.files_visited);
                    pass.report_progress(&path, &start);
                    scope.spawn(move |_| {
                        if let Err(e) = pass.process_file(&path, kind) {
                            pass.fail(&e);
                        }
                    });
                }
            }
        });

        let Pass { counters, .. } = pass;
        let swept = session.close(&tx)?;
        tx.commit()?;

        let summary = ScanSummary {
            files_visited: load(&counters.files_visited),
            cache_hits: load(&counters.cache_hits),
            files_hashed: load(&counters.files_hashed),
            marker_hashes: load(&counters.marker_hashes),
            models_upserted: load(&counters.models_upserted),
            animations_upserted: load(&counters.animations_upserted),
            thumbnails_extracted: load(&counters.thumbnails_extracted),
            failed_files: load(&counters.failed_files),
            swept,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        log::info!(
            "Scan finished in {}ms: {} files, {} cache hits, {} hashed, {} failed",
            summary.duration_ms,
            summary.files_visited,
            summary.cache_hits,
            summary.files_hashed,
            summary.failed_files
        );
        self.progress.report_done(&summary);
        Ok(summary)
    }
}

/// State of the pass in flight, borrowed by every worker
struct Pass<'a> {
    root: &'a Path,
    config: &'a LibraryConfig,
    classifier: &'a dyn FileClassifier,
    progress: &'a ProgressReporter,
    tx: &'a ScanTransaction<'a>,
    session: &'a ScanSession,
    counters: Counters,
}

impl Pass<'_> {
    fn fail(&self, error: &LibraryError) {
        log::warn!("Skipping file: {}", error);
        bump(&self.counters.failed_files);
        self.progress.report_error(error);
    }

    fn report_progress(&self, path: &Path, start: &Instant) {
        let dir = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        self.progress.report_progress(
            load(&self.counters.files_visited),
            load(&self.counters.files_hashed),
            load(&self.counters.cache_hits),
            &dir,
            start.elapsed().as_millis() as u64,
        );
    }

    /// Classify a walked file on the walking thread.
    ///
    /// Marker directories are claimed here, in walk order, so the marker that
    /// wins a directory holding several of them is always the same.
    fn admit(&self, path: &Path) -> Option<FileKind> {
        if !self.classifier.is_eligible(path) {
            return None;
        }
        let kind = self.classifier.classify(path);
        match &kind {
            FileKind::Ignored => None,
            FileKind::MarkerModel(_) => {
                let dir = match self.marker_dir(path) {
                    Ok(dir) => dir,
                    Err(e) => {
                        self.fail(&e);
                        return None;
                    }
                };
                if self.session.claim_marker_dir(&dir) {
                    Some(kind)
                } else {
                    log::debug!("Directory {} already has a marker, skipping {:?}", dir, path);
                    None
                }
            }
            _ => Some(kind),
        }
    }

    /// Relative path of the directory holding a marker file
    fn marker_dir(&self, marker: &Path) -> Result<String> {
        let parent = marker.parent().unwrap_or(self.root);
        relative_path(self.root, parent)
    }

    fn process_file(&self, path: &Path, kind: FileKind) -> Result<()> {
        let metadata = std::fs::metadata(path).map_err(|e| LibraryError::io_with_path(e, path))?;
        let last_modified = modified_millis(&metadata, path)?;
        let rel_path = relative_path(self.root, path)?;
        log::trace!("Processing {}", rel_path);

        let strategy = self.resolve_strategy(&rel_path, last_modified, &kind)?;
        log::debug!("{}: {:?}", rel_path, strategy);
        let hash = self.compute_hash(path, &rel_path, last_modified, strategy)?;
        self.session.mark_file_hash(hash);

        match kind {
            FileKind::MarkerModel(_) => {
                self.record_marker_model(path, &rel_path, last_modified, hash)
            }
            FileKind::Model => self.record_model(path, &rel_path, last_modified, hash),
            FileKind::Animation => {
                self.tx.with(|conn| {
                    AnimationRepository::new(conn).upsert(
                        &rel_path,
                        &file_name(path),
                        last_modified,
                        &hash,
                    )
                })?;
                self.session.mark_animation(&rel_path);
                bump(&self.counters.animations_upserted);
                Ok(())
            }
            FileKind::Ignored => Ok(()),
        }
    }

    fn resolve_strategy(
        &self,
        rel_path: &str,
        last_modified: i64,
        kind: &FileKind,
    ) -> Result<HashStrategy> {
        let cached = self
            .tx
            .with(|conn| CacheRepository::new(conn).find_hash(rel_path, last_modified))?;
        Ok(match (cached, kind) {
            (Some(hash), _) => HashStrategy::CacheHit(hash),
            (None, FileKind::MarkerModel(loader)) => HashStrategy::MarkerComposite(Arc::clone(loader)),
            (None, _) => HashStrategy::FullFile,
        })
    }

    fn compute_hash(
        &self,
        path: &Path,
        rel_path: &str,
        last_modified: i64,
        strategy: HashStrategy,
    ) -> Result<ContentHash> {
        let hash = match strategy {
            HashStrategy::CacheHit(hash) => {
                bump(&self.counters.cache_hits);
                return Ok(hash);
            }
            HashStrategy::MarkerComposite(loader) => {
                let hash = self.hash_marker(path, loader.as_ref())?;
                bump(&self.counters.marker_hashes);
                hash
            }
            HashStrategy::FullFile => {
                let hash = hash::hash_file(path, self.config.hash_chunk_size)?;
                bump(&self.counters.files_hashed);
                hash
            }
        };
        self.tx
            .with(|conn| CacheRepository::new(conn).upsert_hash(rel_path, last_modified, &hash))?;
        Ok(hash)
    }

    /// One digest over the marker and its resources, in loader order
    fn hash_marker(&self, marker: &Path, loader: &dyn MarkerLoader) -> Result<ContentHash> {
        let directory = marker.parent().unwrap_or(self.root);
        let files = loader.marker_files(marker, directory)?;
        let entries: Vec<(String, PathBuf)> = files
            .into_iter()
            .map(|file| -> Result<(String, PathBuf)> {
                let name = file
                    .strip_prefix(directory)
                    .ok()
                    .and_then(normalize_relative)
                    .ok_or_else(|| {
                        LibraryError::invalid_path(
                            file.clone(),
                            "marker resource outside its directory",
                        )
                    })?;
                Ok((name, file))
            })
            .collect::<Result<_>>()?;
        hash::hash_composite(&entries, self.config.hash_chunk_size)
    }

    /// The record is keyed by the marker's own path and named after its directory
    fn record_marker_model(
        &self,
        marker: &Path,
        rel_path: &str,
        last_modified: i64,
        hash: ContentHash,
    ) -> Result<()> {
        let dir = self.marker_dir(marker)?;
        let unchanged = self
            .tx
            .with(|conn| ModelRepository::new(conn).exists(rel_path, &hash))?;
        if !unchanged {
            let name = marker
                .parent()
                .map(file_name)
                .unwrap_or_else(|| dir.clone());
            self.tx.with(|conn| {
                ModelRepository::new(conn).upsert(rel_path, &name, last_modified, &hash)
            })?;
            bump(&self.counters.models_upserted);
        }
        self.session.mark_model(rel_path);
        self.session.mark_marker_dir(&dir);
        // Marker models have no embedded thumbnail
        self.session.mark_thumbnail(hash);
        Ok(())
    }

    fn record_model(
        &self,
        path: &Path,
        rel_path: &str,
        last_modified: i64,
        hash: ContentHash,
    ) -> Result<()> {
        let unchanged = self
            .tx
            .with(|conn| ModelRepository::new(conn).exists(rel_path, &hash))?;
        if unchanged {
            self.session.mark_model(rel_path);
            self.session.mark_thumbnail(hash);
            return Ok(());
        }

        self.tx.with(|conn| {
            ModelRepository::new(conn).upsert(rel_path, &file_name(path), last_modified, &hash)
        })?;
        self.session.mark_model(rel_path);
        bump(&self.counters.models_upserted);

        if self.classifier.can_extract_thumbnail(path) {
            let recorded = self
                .tx
                .with(|conn| ThumbnailRepository::new(conn).exists(&hash))?;
            if !recorded && self.session.claim_thumbnail(hash) {
                self.extract_thumbnail(path, &hash)?;
            }
        }
        self.session.mark_thumbnail(hash);
        Ok(())
    }

    /// A file without a locatable thumbnail is still a valid model
    fn extract_thumbnail(&self, path: &Path, hash: &ContentHash) -> Result<()> {
        match self.classifier.extract_thumbnail(path, self.root) {
            Ok(Some(thumbnail)) => {
                self.tx
                    .with(|conn| ThumbnailRepository::new(conn).insert(hash, &thumbnail))?;
                bump(&self.counters.thumbnails_extracted);
            }
            Ok(None) => log::trace!("No thumbnail in {:?}", path),
            Err(e) => log::warn!("Failed to extract thumbnail from {:?}: {}", path, e),
        }
        Ok(())
    }
}
