//! Job worker pool (spec.md §4.C, §5). Thin wrapper over the
//! [`crate::storage`] job repository plus the N-worker polling loop that
//! leases a job, hands it to the [`crate::orchestrator::Orchestrator`], and
//! completes/fails it with backoff.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::model::{Job, JobStatus};
use crate::orchestrator::Orchestrator;
use crate::storage::Storage;

pub const DEFAULT_WORKER_COUNT: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub worker_count: usize,
    pub max_attempts: i64,
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { worker_count: DEFAULT_WORKER_COUNT, max_attempts: DEFAULT_MAX_ATTEMPTS, poll_interval: Duration::from_millis(250) }
    }
}

/// Passthrough API used by the HTTP capture endpoints to enqueue work
/// directly, without going through the watcher.
pub struct JobQueue {
    storage: Storage,
}

impl JobQueue {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub async fn enqueue(&self, job: Job) -> Result<Job, StorageError> {
        self.storage.enqueue_job(job).await
    }

    pub async fn get(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        self.storage.get_job(job_id).await
    }

    pub async fn list_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StorageError> {
        self.storage.list_jobs_by_status(status, limit).await
    }
}

/// Spawns `config.worker_count` polling loops. Each worker leases at most one
/// job at a time through the atomic `lease_next_job` call, so two workers
/// never process the same row (spec.md §5 "workers never share mutable state
/// other than the database").
pub fn spawn_workers(storage: Storage, orchestrator: Arc<Orchestrator>, config: QueueConfig) -> Vec<tokio::task::JoinHandle<()>> {
    (0..config.worker_count)
        .map(|worker_id| {
            let storage = storage.clone();
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, storage, orchestrator, config).await;
            })
        })
        .collect()
}

async fn worker_loop(worker_id: usize, storage: Storage, orchestrator: Arc<Orchestrator>, config: QueueConfig) {
    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        ticker.tick().await;
        if let Err(e) = run_one(&storage, &orchestrator, config.max_attempts).await {
            tracing::warn!(worker_id, error = %e, "job worker iteration failed");
        }
    }
}

async fn run_one(storage: &Storage, orchestrator: &Orchestrator, max_attempts: i64) -> Result<(), StorageError> {
    let now = crate::model::now_ts();
    let Some(job) = storage.lease_next_job(now).await? else {
        return Ok(());
    };
    match job.job_type.as_str() {
        "ingest_blob" => match orchestrator.process_ingest_job(&job).await {
            Ok(memory_id) => {
                tracing::debug!(job_id = %job.job_id, memory_id, "ingest job completed");
                storage.complete_job(&job.job_id, crate::model::now_ts()).await?;
            }
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, error = %e, "ingest job failed");
                storage.fail_job(&job.job_id, &e.to_string(), crate::model::now_ts(), max_attempts).await?;
            }
        },
        other => {
            tracing::warn!(job_id = %job.job_id, job_type = other, "unroutable job type");
            storage
                .fail_job(&job.job_id, &format!("unroutable job type: {other}"), crate::model::now_ts(), max_attempts)
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Blob, IngestBlobPayload, Source, SourceType};
    use crate::tools::{ToolConfig, ToolRegistryLocked};
    use crate::vector_index::VectorIndex;
    use serde_json::json;

    #[tokio::test]
    async fn run_one_completes_a_leasable_ingest_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"hello EchoGarden").unwrap();

        let storage = Storage::open_in_memory().await.unwrap();
        let source = storage
            .insert_source(Source { source_id: "s1".into(), source_type: SourceType::Filesystem, uri: "file:///w".into(), created_ts: 0 })
            .await
            .unwrap();
        let blob = storage
            .insert_blob(Blob {
                blob_id: "b1".into(),
                sha256: "x".into(),
                path: path.to_string_lossy().to_string(),
                mime: "text/plain".into(),
                size_bytes: 10,
                source_id: source.source_id,
                created_ts: 0,
            })
            .await
            .unwrap();
        storage
            .enqueue_job(crate::model::Job {
                job_id: "j1".into(),
                job_type: "ingest_blob".into(),
                status: JobStatus::Queued,
                attempts: 0,
                next_run_ts: 0,
                payload: json!(IngestBlobPayload { blob_id: blob.blob_id, sha256: "x".into(), mime: "text/plain".into(), size_bytes: 10, trace_id: "t1".into() }),
                error_text: None,
                trace_id: Some("t1".into()),
                created_ts: 0,
                updated_ts: 0,
            })
            .await
            .unwrap();

        let vector_index = Arc::new(VectorIndex::new());
        let registry = crate::tools::build_default_registry(storage.clone(), ToolConfig::default(), vector_index.clone());
        let orchestrator = Orchestrator::new(storage.clone(), ToolRegistryLocked::new(registry), vector_index, 20);

        run_one(&storage, &orchestrator, 5).await.unwrap();

        let done = storage.list_jobs_by_status(JobStatus::Done, 10).await.unwrap();
        assert_eq!(done.len(), 1);
    }
}
