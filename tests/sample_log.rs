//! Durability of the sample log as seen from a second connection.

use std::path::Path;

use cobot_logger::store::{write_csv, SampleLog};
use cobot_logger::StoreError;
use rusqlite::Connection;
use tempfile::TempDir;

/// Count committed samples through an independent connection.
fn committed_samples(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn tenth_insert_commits_durably() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let mut log = SampleLog::open(&path).unwrap();
    let job = log.create_job("Line2_ValveCaps").unwrap();

    for n in 0..9 {
        log.append_sample(job.id, n, 0, n, 0.0).unwrap();
    }
    assert_eq!(committed_samples(&path), 0);

    log.append_sample(job.id, 9, 0, 9, 0.0).unwrap();
    assert_eq!(committed_samples(&path), 10);
    assert_eq!(log.pending(), 0);
}

#[test]
fn close_flushes_partial_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let mut log = SampleLog::open(&path).unwrap();
    let job = log.create_job("Line2_ValveCaps").unwrap();

    for n in 0..3 {
        log.append_sample(job.id, n, 0, n, 0.0).unwrap();
    }
    assert_eq!(committed_samples(&path), 0);

    log.close().unwrap();
    assert_eq!(committed_samples(&path), 3);

    let reopened = SampleLog::open(&path).unwrap();
    let samples = reopened.load_recent(job.id, 600).unwrap();
    assert_eq!(samples.iter().map(|s| s.total).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[test]
fn abrupt_exit_loses_at_most_the_open_batch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let mut log = SampleLog::open(&path).unwrap();
    let job = log.create_job("Line2_ValveCaps").unwrap();

    for n in 0..23 {
        log.append_sample(job.id, n, 0, n, 0.0).unwrap();
    }
    // Skip the orderly shutdown entirely.
    std::mem::forget(log);

    assert_eq!(committed_samples(&path), 20);
}

#[test]
fn jobs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("cobot_logger.db");
    {
        let mut log = SampleLog::open(&path).unwrap();
        log.create_job_at("morning", 1_700_000_000_000).unwrap();
        log.create_job_at("evening", 1_700_000_900_000).unwrap();
    }

    let log = SampleLog::open(&path).unwrap();
    let jobs = log.list_jobs().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].name, "evening");
    assert_eq!(jobs[0].started_at_ms, 1_700_000_900_000);
}

#[test]
fn empty_name_creates_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let mut log = SampleLog::open(&path).unwrap();

    assert!(matches!(log.create_job(""), Err(StoreError::EmptyJobName)));
    assert!(matches!(log.create_job(" \t "), Err(StoreError::EmptyJobName)));
    assert!(log.list_jobs().unwrap().is_empty());
}

#[test]
fn export_writes_full_history() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("cobot_logger.db");
    let mut log = SampleLog::open(&path).unwrap();
    let job = log.create_job("Line2_ValveCaps").unwrap();
    for n in 0..700 {
        log.append_sample(job.id, n, 0, n, 1.5).unwrap();
    }

    // Replay is bounded, export is not.
    assert_eq!(log.load_recent(job.id, 600).unwrap().len(), 600);
    let samples = log.export(job.id).unwrap();
    assert_eq!(samples.len(), 700);

    let out = dir.path().join("job_export.csv");
    write_csv(std::fs::File::create(&out).unwrap(), &samples).unwrap();
    let text = std::fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("timestamp,accepted,rejected,total,rate_per_hour")
    );
    assert_eq!(lines.count(), 700);
    assert!(text.lines().nth(1).unwrap().ends_with(",0,0,0,1.5"));
}
