//! Job-scoped, append-only sample log backed by SQLite.
//!
//! Inserts are batched: a transaction is opened on the first insert of a
//! batch and committed after every `commit_every` inserts, on
//! [`SampleLog::flush`], on [`SampleLog::close`] and on drop. An abrupt
//! crash can therefore lose up to `commit_every - 1` of the most recent
//! samples; everything before the last commit survives.
//!
//! The log has exactly one writer, its owner. Samples of a job are stored
//! and read back in insertion order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use cobot_types::{current_timestamp_ms, Job, JobId, Sample};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};

use crate::error::StoreError;

pub mod export;
mod schema;

pub use export::write_csv;

/// Inserts per durable commit.
pub const DEFAULT_COMMIT_EVERY: usize = 10;

/// Samples replayed when a job is selected.
pub const DEFAULT_REPLAY_LIMIT: usize = 600;

/// SQLite-backed sample log.
pub struct SampleLog {
    conn: Connection,
    db_path: Option<PathBuf>,
    commit_every: usize,
    pending: usize,
}

impl SampleLog {
    /// Open (or create) a file-backed log with the default commit batch.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with(path, DEFAULT_COMMIT_EVERY)
    }

    /// Open (or create) a file-backed log committing every `commit_every`
    /// inserts.
    pub fn open_with(path: &Path, commit_every: usize) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;",
        )?;

        let log = Self {
            conn,
            db_path: Some(path.to_path_buf()),
            commit_every: commit_every.max(1),
            pending: 0,
        };
        log.run_migrations()?;
        debug!("Opened sample log at {}", path.display());
        Ok(log)
    }

    /// Create an in-memory log for tests.
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA journal_mode=MEMORY; PRAGMA foreign_keys=ON;")?;

        let log = Self {
            conn,
            db_path: None,
            commit_every: DEFAULT_COMMIT_EVERY,
            pending: 0,
        };
        log.run_migrations()?;
        Ok(log)
    }

    fn run_migrations(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(schema::SCHEMA)?;
        Ok(())
    }

    /// Path of the database file, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Inserts written but not yet committed.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Create a job named `name` (trimmed), started now.
    pub fn create_job(&mut self, name: &str) -> Result<Job, StoreError> {
        self.create_job_at(name, current_timestamp_ms())
    }

    /// Create a job with an explicit start time.
    ///
    /// Pending samples are committed first so the job row is never part of
    /// an open sample batch.
    pub fn create_job_at(&mut self, name: &str, started_at_ms: u64) -> Result<Job, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyJobName);
        }

        self.flush()?;
        self.conn.execute(
            "INSERT INTO jobs (name, started_at) VALUES (?1, ?2)",
            params![name, format_timestamp(started_at_ms)?],
        )?;

        let job = Job {
            id: JobId(self.conn.last_insert_rowid()),
            name: name.to_string(),
            started_at_ms,
        };
        debug!("Created job {} ({})", job.id, job.name);
        Ok(job)
    }

    /// All jobs, newest first.
    pub fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, started_at FROM jobs ORDER BY started_at DESC, id DESC")?;
        let rows = stmt.query_map([], job_row)?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, name, started_at) = row?;
            match parse_timestamp(&started_at) {
                Ok(started_at_ms) => jobs.push(Job {
                    id: JobId(id),
                    name,
                    started_at_ms,
                }),
                Err(err) => warn!("Skipping job {}: {}", id, err),
            }
        }
        Ok(jobs)
    }

    /// The most recently started job, if any.
    pub fn latest_job(&self) -> Result<Option<Job>, StoreError> {
        Ok(self.list_jobs()?.into_iter().next())
    }

    /// Look up a single job.
    pub fn job(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, started_at FROM jobs WHERE id = ?1",
                params![id.0],
                job_row,
            )
            .optional()?;

        row.map(|(id, name, started_at)| {
            Ok(Job {
                id: JobId(id),
                name,
                started_at_ms: parse_timestamp(&started_at)?,
            })
        })
        .transpose()
    }

    /// Append a sample stamped now.
    pub fn append_sample(
        &mut self,
        job_id: JobId,
        accepted: i64,
        rejected: i64,
        total: i64,
        rate: f64,
    ) -> Result<Sample, StoreError> {
        self.append(Sample {
            job_id,
            timestamp_ms: current_timestamp_ms(),
            accepted,
            rejected,
            total,
            rate,
        })
    }

    /// Append a fully-formed sample.
    ///
    /// Commits once `commit_every` inserts are pending. A failed insert is
    /// returned to the caller; if it opened the batch, the batch is rolled
    /// back.
    pub fn append(&mut self, sample: Sample) -> Result<Sample, StoreError> {
        let ts = format_timestamp(sample.timestamp_ms)?;

        if self.pending == 0 {
            self.conn.execute_batch("BEGIN")?;
        }

        let inserted = self.conn.execute(
            "INSERT INTO samples (job_id, ts, accepted, rejected, total, rate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                sample.job_id.0,
                ts,
                sample.accepted,
                sample.rejected,
                sample.total,
                sample.rate
            ],
        );
        if let Err(err) = inserted {
            if self.pending == 0 {
                self.rollback();
            }
            return Err(err.into());
        }

        self.pending += 1;
        if self.pending >= self.commit_every {
            self.flush()?;
        }
        Ok(sample)
    }

    /// Commit any pending inserts.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        if self.pending == 0 {
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        debug!("Committed {} samples", self.pending);
        self.pending = 0;
        Ok(())
    }

    fn rollback(&mut self) {
        if let Err(err) = self.conn.execute_batch("ROLLBACK") {
            warn!("Sample log rollback failed: {}", err);
        }
    }

    /// Up to `limit` most recent samples of a job, oldest first.
    pub fn load_recent(&self, job_id: JobId, limit: usize) -> Result<Vec<Sample>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut samples = self.query_samples(
            "SELECT job_id, ts, accepted, rejected, total, rate
             FROM samples WHERE job_id = ?1
             ORDER BY ts DESC, id DESC LIMIT ?2",
            params![job_id.0, limit],
        )?;
        samples.reverse();
        Ok(samples)
    }

    /// Full history of a job, oldest first.
    pub fn export(&self, job_id: JobId) -> Result<Vec<Sample>, StoreError> {
        self.query_samples(
            "SELECT job_id, ts, accepted, rejected, total, rate
             FROM samples WHERE job_id = ?1
             ORDER BY ts ASC, id ASC",
            params![job_id.0],
        )
    }

    fn query_samples(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Sample>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, sample_row)?;

        let mut samples = Vec::new();
        for row in rows {
            let row = row?;
            match parse_timestamp(&row.ts) {
                Ok(timestamp_ms) => samples.push(Sample {
                    job_id: JobId(row.job_id),
                    timestamp_ms,
                    accepted: row.accepted.unwrap_or(0),
                    rejected: row.rejected.unwrap_or(0),
                    total: row.total.unwrap_or(0),
                    rate: row.rate.unwrap_or(0.0),
                }),
                Err(err) => warn!("Skipping sample of job {}: {}", row.job_id, err),
            }
        }
        Ok(samples)
    }

    /// Commit pending inserts and close the log.
    pub fn close(mut self) -> Result<(), StoreError> {
        self.flush()
    }
}

impl Drop for SampleLog {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            warn!("Failed to commit {} pending samples: {}", self.pending, err);
        }
    }
}

type JobRow = (i64, String, String);

fn job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

struct SampleRow {
    job_id: i64,
    ts: String,
    accepted: Option<i64>,
    rejected: Option<i64>,
    total: Option<i64>,
    rate: Option<f64>,
}

fn sample_row(row: &Row<'_>) -> rusqlite::Result<SampleRow> {
    Ok(SampleRow {
        job_id: row.get(0)?,
        ts: row.get(1)?,
        accepted: row.get(2)?,
        rejected: row.get(3)?,
        total: row.get(4)?,
        rate: row.get(5)?,
    })
}

/// RFC 3339 in UTC with millisecond precision, e.g. `2024-03-01T08:15:00.250Z`.
///
/// Fixed width, so text order matches time order.
pub fn format_timestamp(timestamp_ms: u64) -> Result<String, StoreError> {
    let millis = i64::try_from(timestamp_ms)
        .map_err(|_| StoreError::InvalidTimestamp(timestamp_ms.to_string()))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| StoreError::InvalidTimestamp(timestamp_ms.to_string()))
}

/// Parse a stored timestamp back into Unix milliseconds.
///
/// Naive timestamps without an offset are read as UTC.
pub fn parse_timestamp(text: &str) -> Result<u64, StoreError> {
    let parsed = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc())
        })
        .map_err(|_| StoreError::InvalidTimestamp(text.to_string()))?;

    u64::try_from(parsed.timestamp_millis())
        .map_err(|_| StoreError::InvalidTimestamp(text.to_string()))
}
