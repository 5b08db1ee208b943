//! Per-pass ledger of everything the scanner observed
//!
//! Workers only ever add to the ledger. Once every worker has joined, the
//! ledger is consumed by [`ScanSession::close`], which deletes every record
//! the pass did not observe.

use dashmap::DashSet;

use crate::db::ScanTransaction;
use crate::error::Result;
use crate::hash::ContentHash;
use crate::models::SweepStats;
use crate::repository::{
    AnimationRepository, CacheRepository, ModelRepository, ThumbnailRepository,
};

#[derive(Debug, Default)]
pub struct ScanSession {
    model_paths: DashSet<String>,
    animation_paths: DashSet<String>,
    /// Claimed on the walking thread, before the marker is hashed
    claimed_marker_dirs: DashSet<String>,
    /// Marker directories whose model was recorded this pass
    marker_dirs: DashSet<String>,
    file_hashes: DashSet<ContentHash>,
    thumbnail_hashes: DashSet<ContentHash>,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_model(&self, path: &str) {
        self.model_paths.insert(path.to_string());
    }

    pub fn mark_animation(&self, path: &str) {
        self.animation_paths.insert(path.to_string());
    }

    pub fn mark_file_hash(&self, hash: ContentHash) {
        self.file_hashes.insert(hash);
    }

    pub fn mark_thumbnail(&self, hash: ContentHash) {
        self.thumbnail_hashes.insert(hash);
    }

    /// Claim a marker directory. Only the first claim in a pass succeeds.
    pub fn claim_marker_dir(&self, dir: &str) -> bool {
        self.claimed_marker_dirs.insert(dir.to_string())
    }

    /// Record that the marker model of `dir` was recorded successfully
    pub fn mark_marker_dir(&self, dir: &str) {
        self.marker_dirs.insert(dir.to_string());
    }

    /// Claim the thumbnail attempt for `hash`. Only the first claim in a pass
    /// succeeds, so each hash is extracted at most once.
    pub fn claim_thumbnail(&self, hash: ContentHash) -> bool {
        self.thumbnail_hashes.insert(hash)
    }

    /// Sweep every record not observed during the pass
    pub fn close(self, tx: &ScanTransaction<'_>) -> Result<SweepStats> {
        let Self {
            model_paths,
            animation_paths,
            marker_dirs,
            file_hashes,
            thumbnail_hashes,
            ..
        } = self;

        // A claimed marker that failed is absent from both sets
        let kept_models: Vec<String> = model_paths.into_iter().chain(marker_dirs).collect();
        let kept_animations: Vec<String> = animation_paths.into_iter().collect();
        let kept_thumbnails: Vec<ContentHash> = thumbnail_hashes.into_iter().collect();
        let kept_hashes: Vec<ContentHash> = file_hashes.into_iter().collect();

        let models = tx.with(|conn| {
            ModelRepository::new(conn).retain_paths(kept_models.iter().map(String::as_str))
        })?;
        let animations = tx.with(|conn| {
            AnimationRepository::new(conn).retain_paths(kept_animations.iter().map(String::as_str))
        })?;
        let thumbnails =
            tx.with(|conn| ThumbnailRepository::new(conn).retain_hashes(kept_thumbnails.iter()))?;
        let cache_entries =
            tx.with(|conn| CacheRepository::new(conn).retain_hashes(kept_hashes.iter()))?;

        let stats = SweepStats {
            models: models as u64,
            animations: animations as u64,
            thumbnails: thumbnails as u64,
            cache_entries: cache_entries as u64,
        };
        log::debug!("Sweep removed {:?}", stats);
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::ThumbnailDescriptor;
    use crate::repository::test_support::hash;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_claims_succeed_once() {
        let session = ScanSession::new();
        assert!(session.claim_marker_dir("pack"));
        assert!(!session.claim_marker_dir("pack"));

        assert!(session.claim_thumbnail(hash(1)));
        assert!(!session.claim_thumbnail(hash(1)));
        session.mark_thumbnail(hash(2));
        assert!(!session.claim_thumbnail(hash(2)));
    }

    #[test]
    fn test_close_sweeps_unobserved_rows() {
        let dir = tempdir().unwrap();
        let db = Database::open(&dir.path().join("t.db"), Duration::from_millis(500)).unwrap();

        let tx = db.begin_scan().unwrap();
        tx.with(|conn| {
            let models = ModelRepository::new(conn);
            models.upsert("a.vrm", "a.vrm", 1, &hash(1))?;
            models.upsert("old.vrm", "old.vrm", 1, &hash(2))?;
            models.upsert("pack", "pack", 1, &hash(3))?;
            models.upsert("broken", "broken", 1, &hash(5))?;
            AnimationRepository::new(conn).upsert("gone.vmd", "gone.vmd", 1, &hash(4))?;
            let thumbs = ThumbnailRepository::new(conn);
            let desc = ThumbnailDescriptor {
                offset: 0,
                length: 1,
                mime_type: None,
            };
            thumbs.insert(&hash(1), &desc)?;
            thumbs.insert(&hash(2), &desc)?;
            let cache = CacheRepository::new(conn);
            cache.upsert_hash("a.vrm", 1, &hash(1))?;
            cache.upsert_hash("old.vrm", 1, &hash(2))?;
            Ok(())
        })
        .unwrap();
        tx.commit().unwrap();

        let session = ScanSession::new();
        session.mark_model("a.vrm");
        session.mark_marker_dir("pack");
        // Claimed but never recorded
        session.claim_marker_dir("broken");
        session.mark_file_hash(hash(1));
        session.mark_thumbnail(hash(1));

        let tx = db.begin_scan().unwrap();
        let stats = session.close(&tx).unwrap();
        tx.commit().unwrap();

        assert_eq!(
            stats,
            SweepStats {
                models: 2,
                animations: 1,
                thumbnails: 1,
                cache_entries: 1,
            }
        );
        let remaining = db
            .read(|conn| {
                ModelRepository::new(conn)
                    .find_range(&crate::models::ModelQuery::page(0, 10))
            })
            .unwrap();
        let paths: Vec<_> = remaining.iter().map(|m| m.path.as_str()).collect();
        assert_eq!(paths, vec!["a.vrm", "pack"]);
    }
}
