//! Filesystem watcher (spec.md §4.C, §5). A single `tokio::spawn`ed task on a
//! `tokio::time::interval` loop, grounded on the origin crates' polling idiom
//! for long-lived background tasks. Content hashing and mime sniffing have no
//! teacher equivalent; enriched from `putao520-agentic-warden`'s dependency
//! set (`sha2`, `walkdir`, `mime_guess`), which reaches for the same stack
//! for file-ingestion pipelines.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::StorageError;
use crate::model::{new_id, now_ts, Blob, FileState, IngestBlobPayload, Job, JobStatus, Source, SourceType};
use crate::storage::Storage;

const IGNORED_DIR_NAMES: &[&str] = &["node_modules", ".git", ".cache", "__pycache__"];
const HASH_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub watch_path: PathBuf,
    pub poll_interval: Duration,
    pub max_file_mb: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { watch_path: PathBuf::from("."), poll_interval: Duration::from_secs(2), max_file_mb: 20 }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WatcherCounts {
    pub files_seen: u64,
    pub jobs_enqueued: u64,
    pub scans_completed: u64,
}

pub struct Watcher {
    storage: Storage,
    config: WatcherConfig,
    scanning: AtomicBool,
    counts: std::sync::Mutex<WatcherCounts>,
}

impl Watcher {
    pub fn new(storage: Storage, config: WatcherConfig) -> Self {
        Self { storage, config, scanning: AtomicBool::new(false), counts: std::sync::Mutex::new(WatcherCounts::default()) }
    }

    pub fn counts(&self) -> WatcherCounts {
        *self.counts.lock().unwrap()
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Spawns the polling loop. A slow scan's next tick is skipped rather
    /// than queued, so two scans never overlap on the same root.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.scan_once().await {
                    tracing::warn!(error = %e, "watcher scan failed");
                }
            }
        })
    }

    pub async fn scan_once(&self) -> Result<(), StorageError> {
        if self.scanning.swap(true, Ordering::SeqCst) {
            tracing::debug!("skipping watcher tick: previous scan still running");
            return Ok(());
        }
        let result = self.scan_inner().await;
        self.scanning.store(false, Ordering::SeqCst);
        result
    }

    async fn scan_inner(&self) -> Result<(), StorageError> {
        if !self.config.watch_path.is_dir() {
            return Ok(());
        }
        let source = self
            .storage
            .insert_source(Source {
                source_id: new_id(),
                source_type: SourceType::Filesystem,
                uri: format!("file://{}", self.config.watch_path.display()),
                created_ts: now_ts(),
            })
            .await?;

        for entry in walkdir::WalkDir::new(&self.config.watch_path)
            .into_iter()
            .filter_entry(|e| !is_ignored(e.path()))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            self.handle_file(entry.path(), &source.source_id).await?;
        }
        self.counts.lock().unwrap().scans_completed += 1;
        Ok(())
    }

    async fn handle_file(&self, path: &Path, source_id: &str) -> Result<(), StorageError> {
        let path_str = path.to_string_lossy().to_string();
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(_) => return Ok(()),
        };
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        let size_bytes = metadata.len() as i64;

        self.counts.lock().unwrap().files_seen += 1;

        if let Some(existing) = self.storage.get_file_state(&path_str).await? {
            if existing.mtime_ns == mtime_ns && existing.size_bytes == size_bytes {
                return Ok(());
            }
        }

        let sha256 = match hash_file(path).await {
            Ok(h) => h,
            Err(_) => return Ok(()),
        };
        let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
        let blob = self
            .storage
            .insert_blob(Blob {
                blob_id: new_id(),
                sha256: sha256.clone(),
                path: path_str.clone(),
                mime: mime.clone(),
                size_bytes,
                source_id: source_id.to_string(),
                created_ts: now_ts(),
            })
            .await?;
        self.storage
            .upsert_file_state(FileState { path: path_str, mtime_ns, size_bytes, sha256: sha256.clone(), last_seen_ts: now_ts() })
            .await?;

        let trace_id = new_id();
        let payload = IngestBlobPayload { blob_id: blob.blob_id, sha256, mime, size_bytes, trace_id: trace_id.clone() };
        let now = now_ts();
        self.storage
            .enqueue_job(Job {
                job_id: new_id(),
                job_type: "ingest_blob".to_string(),
                status: JobStatus::Queued,
                attempts: 0,
                next_run_ts: now,
                payload: serde_json::to_value(payload).map_err(StorageError::from)?,
                error_text: None,
                trace_id: Some(trace_id),
                created_ts: now,
                updated_ts: now,
            })
            .await?;
        self.counts.lock().unwrap().jobs_enqueued += 1;
        Ok(())
    }
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.') || IGNORED_DIR_NAMES.contains(&n))
        .unwrap_or(false)
}

async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_bytes_at_two_paths_produce_two_blobs_same_sha() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello echo garden").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"hello echo garden").unwrap();

        let storage = Storage::open_in_memory().await.unwrap();
        let watcher = Watcher::new(storage.clone(), WatcherConfig { watch_path: dir.path().to_path_buf(), ..Default::default() });
        watcher.scan_once().await.unwrap();
        watcher.scan_once().await.unwrap();

        let counts = watcher.counts();
        assert_eq!(counts.jobs_enqueued, 2, "second scan must not re-enqueue unchanged files");

        let jobs = storage.list_jobs_by_status(JobStatus::Queued, 10).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_file_is_not_rescanned() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"content").unwrap();

        let storage = Storage::open_in_memory().await.unwrap();
        let watcher = Watcher::new(storage.clone(), WatcherConfig { watch_path: dir.path().to_path_buf(), ..Default::default() });
        watcher.scan_once().await.unwrap();
        watcher.scan_once().await.unwrap();

        assert_eq!(watcher.counts().jobs_enqueued, 1);
    }
}
