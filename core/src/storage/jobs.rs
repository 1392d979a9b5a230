//! Job queue repository (spec.md §4.C). Lease semantics live here; the
//! polling loop and backoff schedule live in [`crate::queue`].

use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::error::StorageError;
use crate::model::{Job, JobStatus};

use super::Storage;

fn job_status_str(s: JobStatus) -> &'static str {
    match s {
        JobStatus::Queued => "queued",
        JobStatus::Running => "running",
        JobStatus::Done => "done",
        JobStatus::Error => "error",
        JobStatus::Dead => "dead",
    }
}

fn job_status_from_str(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "done" => JobStatus::Done,
        "error" => JobStatus::Error,
        "dead" => JobStatus::Dead,
        _ => JobStatus::Queued,
    }
}

impl Storage {
    pub async fn enqueue_job(&self, job: Job) -> Result<Job, StorageError> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO job
                    (job_id, type, status, attempts, next_run_ts, payload, error_text, trace_id, created_ts, updated_ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    job.job_id,
                    job.job_type,
                    job_status_str(job.status),
                    job.attempts,
                    job.next_run_ts,
                    serde_json::to_string(&job.payload)?,
                    job.error_text,
                    job.trace_id,
                    job.created_ts,
                    job.updated_ts
                ],
            )?;
            Ok(job)
        })
        .await
    }

    /// Leases the oldest due `queued` or `error` job by flipping it to `running`
    /// in the same transaction it was selected in, so two concurrent workers
    /// never lease the same row (spec.md §5 "at-least-once delivery, no
    /// double-lease").
    pub async fn lease_next_job(&self, now_ts: i64) -> Result<Option<Job>, StorageError> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let job_id: Option<String> = tx
                .query_row(
                    "SELECT job_id FROM job WHERE status IN ('queued', 'error') AND next_run_ts <= ?1
                     ORDER BY next_run_ts LIMIT 1",
                    params![now_ts],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(job_id) = job_id else {
                tx.commit()?;
                return Ok(None);
            };
            tx.execute(
                "UPDATE job SET status = 'running', updated_ts = ?1 WHERE job_id = ?2",
                params![now_ts, job_id],
            )?;
            let job = tx.query_row(
                "SELECT job_id, type, status, attempts, next_run_ts, payload, error_text, trace_id, created_ts, updated_ts
                 FROM job WHERE job_id = ?1",
                params![job_id],
                row_to_job,
            )?;
            tx.commit()?;
            Ok(Some(job))
        })
        .await
    }

    pub async fn complete_job(&self, job_id: &str, now_ts: i64) -> Result<(), StorageError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE job SET status = 'done', updated_ts = ?1 WHERE job_id = ?2",
                params![now_ts, job_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Records a failed attempt. Reschedules with exponential backoff
    /// (`min(60s * 2^attempts, 1h)`, computed from the pre-increment attempt
    /// count per spec.md §4.C) and leaves the job `error` so the next lease
    /// picks it back up, unless `attempts` has reached `max_attempts`, in
    /// which case the job is dead-lettered.
    pub async fn fail_job(
        &self,
        job_id: &str,
        error_text: &str,
        now_ts: i64,
        max_attempts: i64,
    ) -> Result<JobStatus, StorageError> {
        let job_id = job_id.to_string();
        let error_text = error_text.to_string();
        self.with_conn(move |conn| {
            let attempts: i64 = conn.query_row(
                "SELECT attempts FROM job WHERE job_id = ?1",
                params![job_id],
                |r| r.get(0),
            )?;
            let backoff_s = (60i64.saturating_mul(1i64 << attempts.min(10))).min(3600);
            let next_run_ts = now_ts + backoff_s * 1000;
            let attempts = attempts + 1;
            let status = if attempts >= max_attempts { JobStatus::Dead } else { JobStatus::Error };
            conn.execute(
                "UPDATE job SET status = ?1, attempts = ?2, next_run_ts = ?3, error_text = ?4, updated_ts = ?5
                 WHERE job_id = ?6",
                params![job_status_str(status), attempts, next_run_ts, error_text, now_ts, job_id],
            )?;
            Ok(status)
        })
        .await
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, StorageError> {
        let job_id = job_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT job_id, type, status, attempts, next_run_ts, payload, error_text, trace_id, created_ts, updated_ts
                     FROM job WHERE job_id = ?1",
                    params![job_id],
                    row_to_job,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    pub async fn list_jobs_by_status(&self, status: JobStatus, limit: i64) -> Result<Vec<Job>, StorageError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT job_id, type, status, attempts, next_run_ts, payload, error_text, trace_id, created_ts, updated_ts
                 FROM job WHERE status = ?1 ORDER BY created_ts LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![job_status_str(status), limit], row_to_job)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

fn row_to_job(r: &rusqlite::Row) -> rusqlite::Result<Job> {
    let payload: String = r.get(5)?;
    Ok(Job {
        job_id: r.get(0)?,
        job_type: r.get(1)?,
        status: job_status_from_str(&r.get::<_, String>(2)?),
        attempts: r.get(3)?,
        next_run_ts: r.get(4)?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        error_text: r.get(6)?,
        trace_id: r.get(7)?,
        created_ts: r.get(8)?,
        updated_ts: r.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job(id: &str, next_run_ts: i64) -> Job {
        Job {
            job_id: id.to_string(),
            job_type: "ingest_blob".to_string(),
            status: JobStatus::Queued,
            attempts: 0,
            next_run_ts,
            payload: json!({"blob_id": "b1"}),
            error_text: None,
            trace_id: None,
            created_ts: 0,
            updated_ts: 0,
        }
    }

    #[tokio::test]
    async fn lease_next_job_picks_oldest_due_and_flips_running() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.enqueue_job(sample_job("j1", 100)).await.unwrap();
        storage.enqueue_job(sample_job("j2", 50)).await.unwrap();
        let leased = storage.lease_next_job(1000).await.unwrap().unwrap();
        assert_eq!(leased.job_id, "j2");
        assert_eq!(leased.status, JobStatus::Running);
    }

    #[tokio::test]
    async fn lease_next_job_skips_not_yet_due() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.enqueue_job(sample_job("j1", 5000)).await.unwrap();
        let leased = storage.lease_next_job(1000).await.unwrap();
        assert!(leased.is_none());
    }

    #[tokio::test]
    async fn fail_job_dead_letters_after_max_attempts() {
        let storage = Storage::open_in_memory().await.unwrap();
        storage.enqueue_job(sample_job("j1", 0)).await.unwrap();
        storage.lease_next_job(0).await.unwrap();
        let mut status = JobStatus::Queued;
        for _ in 0..5 {
            status = storage.fail_job("j1", "boom", 0, 3).await.unwrap();
        }
        assert_eq!(status, JobStatus::Dead);
    }
}
