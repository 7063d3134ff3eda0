use chrono::NaiveDateTime;

use crate::error::SegmentError;

/// Format of the timestamp segment in a camera filename.
pub const SEGMENT_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

const SEGMENT_TIME_LEN: usize = 14;

/// Parse the recording start time out of a segment stem such as
/// `00_20240101120000_a`. The second `_` segment must be exactly
/// `YYYYMMDDHHMMSS`; anything else is rejected rather than guessed.
pub fn parse_segment_time(stem: &str) -> Result<NaiveDateTime, SegmentError> {
    let segment = stem
        .split('_')
        .nth(1)
        .ok_or_else(|| SegmentError::MissingTimestamp {
            stem: stem.to_string(),
        })?;

    let len = segment.chars().count();
    if len != SEGMENT_TIME_LEN {
        return Err(SegmentError::BadTimestampLength {
            stem: stem.to_string(),
            segment: segment.to_string(),
            len,
        });
    }

    // chrono accepts a leading sign on %Y, so check digits first
    let invalid = || SegmentError::InvalidTimestamp {
        stem: stem.to_string(),
        segment: segment.to_string(),
    };
    if !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    NaiveDateTime::parse_from_str(segment, SEGMENT_TIME_FORMAT).map_err(|_| invalid())
}

/// Device/channel identifier: the first `_` segment of the stem.
pub fn segment_prefix(stem: &str) -> Result<&str, SegmentError> {
    match stem.split('_').next() {
        Some(prefix) if !prefix.is_empty() => Ok(prefix),
        _ => Err(SegmentError::MissingPrefix {
            stem: stem.to_string(),
        }),
    }
}
