//! Datestamp parsing for OAI records and file listings.

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

/// Accepted full-timestamp format.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Accepted date-only format.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A datestamp did not match any accepted format.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unrecognized datestamp format: {value}")]
pub struct DatestampError {
    /// The offending input.
    pub value: String,
}

/// Parses a datestamp in `YYYY-MM-DDTHH:MM:SSZ` or `YYYY-MM-DD` form.
///
/// # Errors
///
/// Returns [`DatestampError`] for any other shape. During a dataset
/// harvest this is fatal and aborts the run.
pub fn parse_datestamp(value: &str) -> Result<NaiveDateTime, DatestampError> {
    if let Ok(parsed) = NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT) {
        return Ok(parsed);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, DATE_FORMAT)
        && let Some(parsed) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(parsed);
    }
    Err(DatestampError {
        value: value.to_string(),
    })
}

/// Parses an optional datestamp; empty or absent values are `None`.
///
/// # Errors
///
/// Returns [`DatestampError`] when a present, non-empty value has an
/// unrecognized shape.
pub fn parse_optional_datestamp(
    value: Option<&str>,
) -> Result<Option<NaiveDateTime>, DatestampError> {
    match value {
        None => Ok(None),
        Some(v) if v.trim().is_empty() => Ok(None),
        Some(v) => parse_datestamp(v).map(Some),
    }
}
