//! CSV export of a job's samples.
//!
//! Every field is a number or an RFC 3339 timestamp, so no quoting is
//! ever needed.

use std::io::Write;

use cobot_types::Sample;

use super::format_timestamp;
use crate::error::StoreError;

pub const CSV_HEADER: &str = "timestamp,accepted,rejected,total,rate_per_hour";

/// Write `samples` as CSV, header first, in the order given.
pub fn write_csv<W: Write>(mut writer: W, samples: &[Sample]) -> Result<(), StoreError> {
    writeln!(writer, "{}", CSV_HEADER)?;
    for sample in samples {
        writeln!(
            writer,
            "{},{},{},{},{}",
            format_timestamp(sample.timestamp_ms)?,
            sample.accepted,
            sample.rejected,
            sample.total,
            sample.rate
        )?;
    }
    writer.flush()?;
    Ok(())
}
