//! Jobs and the samples logged under them.

use core::fmt;

/// Identifier of a persisted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct JobId(pub i64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named production run. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Job {
    pub id: JobId,
    pub name: String,
    /// Unix timestamp in milliseconds when the job was created.
    pub started_at_ms: u64,
}

/// One logged data point of a job.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sample {
    pub job_id: JobId,
    /// Unix timestamp in milliseconds when the sample was written.
    pub timestamp_ms: u64,
    pub accepted: i64,
    pub rejected: i64,
    pub total: i64,
    /// Parts per hour at the time of the sample.
    pub rate: f64,
}
