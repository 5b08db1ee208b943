//! Incremental indexer for a directory of 3D models and animations
//!
//! This library keeps a SQLite index of the models and animations found
//! under a library directory in sync with the filesystem. Unchanged files
//! are recognized by path and modification time and never re-hashed; the
//! directory is walked with walkdir and files are hashed in parallel with
//! rayon.

pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod hash;
pub mod library;
pub mod marker;
pub mod models;
pub mod progress;
pub mod repository;
pub mod scanner;
pub mod scheduler;
pub mod session;
pub mod thumbnail;
pub mod watcher;

pub use classifier::{ExtensionClassifier, FileClassifier, FileKind, MarkerLoader};
pub use config::{DefaultContent, LibraryConfig, LibraryConfigBuilder};
pub use db::{Database, ScanTransaction};
pub use error::{LibraryError, LibraryErrorKind, Result};
pub use hash::ContentHash;
pub use library::{LibraryUpdate, ModelLibrary};
pub use marker::ManifestLoader;
pub use models::{
    AnimationItem, ModelItem, ModelOrder, ModelQuery, ModelThumbnail, ModelType, ScanSummary,
    SweepStats, ThumbnailDescriptor,
};
pub use progress::{DoneMessage, ErrorProgressMessage, ProgressMessage, ProgressReporter, StartMessage};
pub use scanner::Scanner;
pub use scheduler::{ScanScheduler, SchedulerState};
pub use watcher::{LibraryWatcher, NotifyWatcher};
