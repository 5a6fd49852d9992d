//! Range validation for import knobs.
//!
//! These bounds guard the HTTP surface; an out-of-range knob is a client
//! error, never a silent clamp.

use thiserror::Error;

pub const BATCH_SIZE_MIN: usize = 100;
pub const BATCH_SIZE_MAX: usize = 10_000;

pub const PROGRESS_EVERY_MS_MIN: u64 = 200;
pub const PROGRESS_EVERY_MS_MAX: u64 = 30_000;

pub const TOTAL_ROWS_MIN: i64 = 1;
pub const TOTAL_ROWS_MAX: i64 = 50_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{field} must be between {min} and {max}")]
pub struct RangeError {
    pub field: &'static str,
    pub min: i64,
    pub max: i64,
}

pub fn validate_batch_size(value: usize) -> Result<(), RangeError> {
    if !(BATCH_SIZE_MIN..=BATCH_SIZE_MAX).contains(&value) {
        return Err(RangeError {
            field: "batchSize",
            min: BATCH_SIZE_MIN as i64,
            max: BATCH_SIZE_MAX as i64,
        });
    }
    Ok(())
}

pub fn validate_progress_every_ms(value: u64) -> Result<(), RangeError> {
    if !(PROGRESS_EVERY_MS_MIN..=PROGRESS_EVERY_MS_MAX).contains(&value) {
        return Err(RangeError {
            field: "progressUpdateEveryMs",
            min: PROGRESS_EVERY_MS_MIN as i64,
            max: PROGRESS_EVERY_MS_MAX as i64,
        });
    }
    Ok(())
}

pub fn validate_total_rows(value: i64) -> Result<(), RangeError> {
    if !(TOTAL_ROWS_MIN..=TOTAL_ROWS_MAX).contains(&value) {
        return Err(RangeError {
            field: "totalRows",
            min: TOTAL_ROWS_MIN,
            max: TOTAL_ROWS_MAX,
        });
    }
    Ok(())
}
