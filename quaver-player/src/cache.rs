//! Size-bounded audio cache with a sqlite index
//!
//! Layout: one flat directory of audio files named by content key, plus
//! a sqlite database indexing them. Two ordering rules keep the pair
//! consistent across crashes:
//!
//! - on insert, bytes become durable (temp file + rename) **before** the
//!   index row exists, so an index row always points at a real file
//! - on delete, the index row goes **before** the file, so a crash can
//!   strand an orphan file but never a dangling row
//!
//! Orphans in either direction are swept at open. The total byte count
//! is tracked exactly in memory; eviction runs at insert time and
//! removes least-recently-accessed entries until the total fits the
//! budget again.

use crate::error::{Error, Result};
use quaver_common::model::Quality;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Access-time updates are buffered and written out in one statement
/// once this many are pending.
const HIT_FLUSH_THRESHOLD: usize = 10;

/// Compute the content key for a track + quality pair.
///
/// The key doubles as the cache file stem, so it must be filesystem-safe
/// regardless of what the catalog uses for track ids.
pub fn content_key(track_id: &str, quality: Quality) -> String {
    let mut hasher = Sha256::new();
    hasher.update(track_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(quality.as_str().as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Cache files are named `<64-hex-key>.<ext>`; anything else in the
/// directory is not a cache entry.
fn content_key_from_file_name(name: &str) -> Option<String> {
    let stem = name.split('.').next()?;
    if stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(stem.to_string())
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
}

struct CacheInner {
    /// Exact total of indexed file sizes
    total_bytes: u64,
    entries: usize,
    /// content_key -> last access, flushed in batches
    pending_hits: HashMap<String, chrono::DateTime<chrono::Utc>>,
}

/// The cache. Structural mutation (insert, evict, hit flush) is
/// serialized behind one async mutex; `get` takes it only long enough
/// to record the hit.
pub struct AudioCache {
    db: SqlitePool,
    dir: PathBuf,
    budget_bytes: u64,
    inner: Mutex<CacheInner>,
}

impl AudioCache {
    /// Open the cache at `dir`, creating the directory, the index
    /// database, and sweeping any crash leftovers.
    pub async fn open(dir: &Path, budget_bytes: u64) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let options = SqliteConnectOptions::new()
            .filename(dir.join("cache_index.db"))
            .create_if_missing(true);
        let db = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                content_key   TEXT PRIMARY KEY,
                track_id      TEXT NOT NULL,
                quality       TEXT NOT NULL,
                file_name     TEXT NOT NULL,
                size_bytes    INTEGER NOT NULL,
                created_at    TEXT NOT NULL,
                last_accessed TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        let cache = Self {
            db,
            dir: dir.to_path_buf(),
            budget_bytes,
            inner: Mutex::new(CacheInner {
                total_bytes: 0,
                entries: 0,
                pending_hits: HashMap::new(),
            }),
        };
        cache.recover().await?;

        {
            let inner = cache.inner.lock().await;
            info!(
                entries = inner.entries,
                total_bytes = inner.total_bytes,
                budget_bytes,
                "audio cache opened"
            );
        }
        Ok(cache)
    }

    /// Reconcile the index with the filesystem after an unclean exit:
    /// drop rows whose file vanished, delete files the index does not
    /// know (interrupted inserts), and rebuild the byte total. An empty
    /// index with content-named files on disk means the database was
    /// lost; those files are re-adopted instead of discarded.
    async fn recover(&self) -> Result<()> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT content_key, file_name, size_bytes FROM cache_entries")
                .fetch_all(&self.db)
                .await?;
        let rebuild = rows.is_empty();

        let mut indexed: HashMap<String, u64> = HashMap::new();
        let mut total: u64 = 0;
        for (key, file_name, size) in rows {
            let path = self.dir.join(&file_name);
            match tokio::fs::metadata(&path).await {
                Ok(meta) => {
                    // Trust the filesystem over the row for sizes
                    let actual = meta.len();
                    if actual != size as u64 {
                        sqlx::query(
                            "UPDATE cache_entries SET size_bytes = ? WHERE content_key = ?",
                        )
                        .bind(actual as i64)
                        .bind(&key)
                        .execute(&self.db)
                        .await?;
                    }
                    total += actual;
                    indexed.insert(file_name, actual);
                }
                Err(_) => {
                    warn!(key = %key, "index row without file, dropping");
                    sqlx::query("DELETE FROM cache_entries WHERE content_key = ?")
                        .bind(&key)
                        .execute(&self.db)
                        .await?;
                }
            }
        }

        // Files not in the index: interrupted inserts or temp leftovers,
        // unless the whole index was lost, in which case content-named
        // files are re-adopted with their mtime as last access.
        let mut dir_entries = tokio::fs::read_dir(&self.dir).await?;
        let mut orphans = 0usize;
        let mut adopted = 0usize;
        while let Some(entry) = dir_entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name == "cache_index.db" || name.starts_with("cache_index.db-") {
                continue;
            }
            if indexed.contains_key(&name) {
                continue;
            }
            if rebuild {
                if let Some(key) = content_key_from_file_name(&name) {
                    let meta = tokio::fs::metadata(entry.path()).await?;
                    let accessed: chrono::DateTime<chrono::Utc> = meta
                        .modified()
                        .map(chrono::DateTime::from)
                        .unwrap_or_else(|_| chrono::Utc::now());
                    sqlx::query(
                        r#"
                        INSERT INTO cache_entries
                            (content_key, track_id, quality, file_name, size_bytes,
                             created_at, last_accessed)
                        VALUES (?, '', '', ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&key)
                    .bind(&name)
                    .bind(meta.len() as i64)
                    .bind(accessed.to_rfc3339())
                    .bind(accessed.to_rfc3339())
                    .execute(&self.db)
                    .await?;
                    total += meta.len();
                    indexed.insert(name, meta.len());
                    adopted += 1;
                    continue;
                }
            }
            let _ = tokio::fs::remove_file(entry.path()).await;
            orphans += 1;
        }
        if orphans > 0 {
            debug!(orphans, "removed unindexed cache files");
        }
        if adopted > 0 {
            info!(adopted, "rebuilt cache index from directory scan");
        }

        let mut inner = self.inner.lock().await;
        inner.total_bytes = total;
        inner.entries = indexed.len();
        Ok(())
    }

    /// Look up a cached file. A hit records the access time (batched).
    pub async fn get(&self, track_id: &str, quality: Quality) -> Result<Option<PathBuf>> {
        let key = content_key(track_id, quality);
        let row: Option<(String,)> =
            sqlx::query_as("SELECT file_name FROM cache_entries WHERE content_key = ?")
                .bind(&key)
                .fetch_optional(&self.db)
                .await?;

        let Some((file_name,)) = row else {
            return Ok(None);
        };
        let path = self.dir.join(&file_name);
        if !path.exists() {
            // File lost out from under us; heal the index
            warn!(key = %key, "cache file missing, dropping index row");
            self.forget(&key).await?;
            return Ok(None);
        }

        let flush = {
            let mut inner = self.inner.lock().await;
            inner.pending_hits.insert(key, chrono::Utc::now());
            inner.pending_hits.len() >= HIT_FLUSH_THRESHOLD
        };
        if flush {
            self.flush_hits().await?;
        }
        Ok(Some(path))
    }

    /// Insert bytes under the given track + quality. Returns the final
    /// file path. Oversized-for-budget entries are refused rather than
    /// evicting the whole cache for a file that cannot fit.
    pub async fn put_bytes(
        &self,
        track_id: &str,
        quality: Quality,
        extension: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes)
            .await
            .map_err(|e| Error::CacheWrite(format!("temp write failed: {}", e)))?;
        self.commit_file(track_id, quality, extension, temp).await
    }

    /// Adopt a fully written temp file (produced by the downloader in
    /// this cache's directory) as a cache entry. The rename makes the
    /// bytes durable under their final name before the index row exists.
    pub async fn commit_file(
        &self,
        track_id: &str,
        quality: Quality,
        extension: &str,
        temp_path: PathBuf,
    ) -> Result<PathBuf> {
        let size = tokio::fs::metadata(&temp_path)
            .await
            .map_err(|e| Error::CacheWrite(format!("temp stat failed: {}", e)))?
            .len();

        if size > self.budget_bytes {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(Error::CacheWrite(format!(
                "entry of {} bytes exceeds cache budget of {}",
                size, self.budget_bytes
            )));
        }

        let key = content_key(track_id, quality);
        let file_name = format!("{}.{}", key, extension);
        let final_path = self.dir.join(&file_name);

        let mut inner = self.inner.lock().await;

        // Replacing an existing entry for the same key
        let existing: Option<(String, i64)> =
            sqlx::query_as("SELECT file_name, size_bytes FROM cache_entries WHERE content_key = ?")
                .bind(&key)
                .fetch_optional(&self.db)
                .await?;
        if let Some((old_name, old_size)) = existing {
            sqlx::query("DELETE FROM cache_entries WHERE content_key = ?")
                .bind(&key)
                .execute(&self.db)
                .await?;
            let _ = tokio::fs::remove_file(self.dir.join(&old_name)).await;
            inner.total_bytes = inner.total_bytes.saturating_sub(old_size as u64);
            inner.entries = inner.entries.saturating_sub(1);
        }

        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| Error::CacheWrite(format!("rename into cache failed: {}", e)))?;

        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO cache_entries
                (content_key, track_id, quality, file_name, size_bytes, created_at, last_accessed)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key)
        .bind(track_id)
        .bind(quality.as_str())
        .bind(&file_name)
        .bind(size as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;

        inner.total_bytes += size;
        inner.entries += 1;
        debug!(key = %key, size, total = inner.total_bytes, "cache insert");

        if inner.total_bytes > self.budget_bytes {
            self.evict_locked(&mut inner).await?;
        }
        Ok(final_path)
    }

    /// Evict least-recently-accessed entries until the total fits the
    /// budget. Caller holds the structural lock. The freshly inserted
    /// entry can itself be evicted if everything older is not enough.
    async fn evict_locked(&self, inner: &mut CacheInner) -> Result<()> {
        let candidates: Vec<(String, String, i64)> = sqlx::query_as(
            "SELECT content_key, file_name, size_bytes FROM cache_entries \
             ORDER BY last_accessed ASC, rowid ASC",
        )
        .fetch_all(&self.db)
        .await?;

        let mut victims: Vec<(String, String, i64)> = Vec::new();
        let mut projected = inner.total_bytes;
        for row in candidates {
            if projected <= self.budget_bytes {
                break;
            }
            projected = projected.saturating_sub(row.2 as u64);
            victims.push(row);
        }

        if victims.is_empty() {
            return Ok(());
        }

        // Index rows first, then files
        let placeholders = vec!["?"; victims.len()].join(",");
        let sql = format!(
            "DELETE FROM cache_entries WHERE content_key IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for (key, _, _) in &victims {
            query = query.bind(key);
        }
        query.execute(&self.db).await?;

        for (key, file_name, size) in &victims {
            let _ = tokio::fs::remove_file(self.dir.join(file_name)).await;
            inner.total_bytes = inner.total_bytes.saturating_sub(*size as u64);
            inner.entries = inner.entries.saturating_sub(1);
            inner.pending_hits.remove(key);
            debug!(key = %key, size, "cache evict");
        }
        Ok(())
    }

    /// Drop one entry: index row first, then the file. Holds the
    /// structural lock for the whole mutation so a concurrent eviction
    /// cannot delete the same row and double-subtract its size.
    async fn forget(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT file_name, size_bytes FROM cache_entries WHERE content_key = ?")
                .bind(key)
                .fetch_optional(&self.db)
                .await?;
        let Some((file_name, size)) = row else {
            return Ok(());
        };
        sqlx::query("DELETE FROM cache_entries WHERE content_key = ?")
            .bind(key)
            .execute(&self.db)
            .await?;
        let _ = tokio::fs::remove_file(self.dir.join(&file_name)).await;

        inner.total_bytes = inner.total_bytes.saturating_sub(size as u64);
        inner.entries = inner.entries.saturating_sub(1);
        inner.pending_hits.remove(key);
        Ok(())
    }

    /// Remove one track's cached audio, if present.
    pub async fn remove(&self, track_id: &str, quality: Quality) -> Result<()> {
        self.forget(&content_key(track_id, quality)).await
    }

    /// Drop every entry: all index rows in one statement, then the
    /// files. The structural lock is held throughout, like any other
    /// mutation of the index/counter pair.
    pub async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT file_name FROM cache_entries")
                .fetch_all(&self.db)
                .await?;
        sqlx::query("DELETE FROM cache_entries").execute(&self.db).await?;
        for (file_name,) in rows {
            let _ = tokio::fs::remove_file(self.dir.join(&file_name)).await;
        }

        inner.total_bytes = 0;
        inner.entries = 0;
        inner.pending_hits.clear();
        info!("audio cache cleared");
        Ok(())
    }

    /// Write out buffered access times. Called when the batch fills and
    /// at shutdown.
    pub async fn flush_hits(&self) -> Result<()> {
        let pending = {
            let mut inner = self.inner.lock().await;
            std::mem::take(&mut inner.pending_hits)
        };
        for (key, when) in pending {
            sqlx::query("UPDATE cache_entries SET last_accessed = ? WHERE content_key = ?")
                .bind(when.to_rfc3339())
                .bind(&key)
                .execute(&self.db)
                .await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            entries: inner.entries,
            total_bytes: inner.total_bytes,
            budget_bytes: self.budget_bytes,
        }
    }

    /// Directory for downloader temp files, so the final rename never
    /// crosses a filesystem boundary.
    pub fn temp_path(&self) -> PathBuf {
        self.dir.join(format!(".{}.part", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn open_cache(dir: &Path, budget: u64) -> AudioCache {
        AudioCache::open(dir, budget).await.unwrap()
    }

    #[test]
    fn test_content_key_stable_and_distinct() {
        let a = content_key("track-1", Quality::High);
        let b = content_key("track-1", Quality::High);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(a, content_key("track-1", Quality::Low));
        assert_ne!(a, content_key("track-2", Quality::High));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1024).await;

        let path = cache
            .put_bytes("t1", Quality::High, "opus", b"hello audio")
            .await
            .unwrap();
        assert!(path.exists());

        let hit = cache.get("t1", Quality::High).await.unwrap();
        assert_eq!(hit, Some(path));
        assert!(cache.get("t2", Quality::High).await.unwrap().is_none());

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 11);
    }

    #[tokio::test]
    async fn test_eviction_is_lru_and_exact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 100).await;

        // A is older (inserted first), 60 bytes; B is 50 bytes.
        let a_path = cache
            .put_bytes("a", Quality::High, "opus", &[0u8; 60])
            .await
            .unwrap();
        // Distinct last_accessed timestamps
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let b_path = cache
            .put_bytes("b", Quality::High, "opus", &[0u8; 50])
            .await
            .unwrap();

        // 110 > 100: A must be evicted, B kept
        assert!(!a_path.exists());
        assert!(b_path.exists());
        assert!(cache.get("a", Quality::High).await.unwrap().is_none());
        assert!(cache.get("b", Quality::High).await.unwrap().is_some());

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 50);
    }

    #[tokio::test]
    async fn test_recent_access_protects_from_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 100).await;

        cache
            .put_bytes("a", Quality::High, "opus", &[0u8; 40])
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache
            .put_bytes("b", Quality::High, "opus", &[0u8; 40])
            .await
            .unwrap();

        // Touch A so B becomes the least recently accessed
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache.get("a", Quality::High).await.unwrap();
        cache.flush_hits().await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        cache
            .put_bytes("c", Quality::High, "opus", &[0u8; 40])
            .await
            .unwrap();

        assert!(cache.get("a", Quality::High).await.unwrap().is_some());
        assert!(cache.get("b", Quality::High).await.unwrap().is_none());
        assert!(cache.get("c", Quality::High).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_entry_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 10).await;

        let result = cache
            .put_bytes("big", Quality::High, "opus", &[0u8; 100])
            .await;
        assert!(matches!(result, Err(Error::CacheWrite(_))));
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_replace_same_key_does_not_double_count() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1000).await;

        cache
            .put_bytes("t", Quality::High, "opus", &[0u8; 30])
            .await
            .unwrap();
        cache
            .put_bytes("t", Quality::High, "opus", &[0u8; 70])
            .await
            .unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 70);
    }

    #[tokio::test]
    async fn test_concurrent_heals_subtract_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(open_cache(dir.path(), 1000).await);

        cache
            .put_bytes("gone", Quality::High, "opus", &[0u8; 30])
            .await
            .unwrap();
        let kept = cache
            .put_bytes("kept", Quality::High, "opus", &[0u8; 50])
            .await
            .unwrap();
        let lost = cache.get("gone", Quality::High).await.unwrap().unwrap();
        std::fs::remove_file(&lost).unwrap();

        // Both lookups race to heal the same dangling row; whichever
        // wins, the 30 bytes come off the total exactly once.
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache.get("gone", Quality::High).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap().is_none());
        }

        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 50);
        assert!(kept.exists());
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1000).await;

        let a = cache
            .put_bytes("a", Quality::High, "opus", &[0u8; 10])
            .await
            .unwrap();
        let b = cache
            .put_bytes("b", Quality::High, "opus", &[0u8; 20])
            .await
            .unwrap();

        cache.remove("a", Quality::High).await.unwrap();
        assert!(!a.exists());
        assert!(cache.get("a", Quality::High).await.unwrap().is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 20);

        // Removing an absent entry is not an error
        cache.remove("a", Quality::High).await.unwrap();

        cache.clear().await.unwrap();
        assert!(!b.exists());
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_recovery_sweeps_orphan_files_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = open_cache(dir.path(), 1000).await;
            let kept = cache
                .put_bytes("keep", Quality::High, "opus", &[0u8; 10])
                .await
                .unwrap();
            let lost = cache
                .put_bytes("lost", Quality::High, "opus", &[0u8; 20])
                .await
                .unwrap();
            assert!(kept.exists());
            // Simulate an unclean delete: file gone, row still present
            std::fs::remove_file(&lost).unwrap();
            // Simulate an interrupted insert: file with no row
            std::fs::write(dir.path().join("deadbeef.opus"), [0u8; 30]).unwrap();
        }

        let cache = open_cache(dir.path(), 1000).await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 10);
        assert!(cache.get("keep", Quality::High).await.unwrap().is_some());
        assert!(cache.get("lost", Quality::High).await.unwrap().is_none());
        assert!(!dir.path().join("deadbeef.opus").exists());
    }

    #[tokio::test]
    async fn test_lost_index_rebuilt_from_directory_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (path, key) = {
            let cache = open_cache(dir.path(), 1000).await;
            let path = cache
                .put_bytes("t", Quality::High, "opus", &[0u8; 25])
                .await
                .unwrap();
            (path, content_key("t", Quality::High))
        };
        // Simulate a lost index database
        std::fs::remove_file(dir.path().join("cache_index.db")).unwrap();

        let cache = open_cache(dir.path(), 1000).await;
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 25);
        assert!(path.exists());
        // Rebuilt rows are keyed by the file name stem, so lookups work
        let row: Option<(String,)> =
            sqlx::query_as("SELECT content_key FROM cache_entries")
                .fetch_optional(&cache.db)
                .await
                .unwrap();
        assert_eq!(row.unwrap().0, key);
    }

    #[tokio::test]
    async fn test_missing_file_heals_on_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open_cache(dir.path(), 1000).await;
        let path = cache
            .put_bytes("t", Quality::High, "opus", &[0u8; 10])
            .await
            .unwrap();
        std::fs::remove_file(&path).unwrap();

        assert!(cache.get("t", Quality::High).await.unwrap().is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.total_bytes, 0);
    }
}
