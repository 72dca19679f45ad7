//! Shared validation helpers.

use std::time::Duration;

use validator::ValidationError;

/// Minimum slot size: one 64-byte header plus payload room.
pub const MIN_ENTRY_SIZE: usize = 128;

/// Slot sizes must keep every header cache-line aligned.
pub fn validate_entry_size(entry_size: usize) -> Result<(), String> {
    if entry_size < MIN_ENTRY_SIZE {
        return Err(format!(
            "entry_size {} is below the {} byte minimum",
            entry_size, MIN_ENTRY_SIZE
        ));
    }
    if entry_size % 64 != 0 {
        return Err(format!("entry_size {} is not a multiple of 64", entry_size));
    }
    Ok(())
}

/// Virtual time is a `u64` nanosecond counter.
pub fn validate_virtual_time(value: &Duration) -> Result<(), ValidationError> {
    if u64::try_from(value.as_nanos()).is_err() {
        return Err(ValidationError::new("exceeds_virtual_time_range"));
    }
    Ok(())
}

/// Heartbeat and poll intervals: a zero interval would reschedule forever at
/// the same instant.
pub fn validate_interval(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("interval_must_be_positive"));
    }
    validate_virtual_time(value)
}

/// Nanoseconds of a validated duration.
pub(crate) fn as_ns(value: Duration) -> u64 {
    u64::try_from(value.as_nanos()).unwrap_or(u64::MAX)
}
