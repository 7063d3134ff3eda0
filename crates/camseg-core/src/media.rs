use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::SegmentError;
use crate::timestamp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    /// Full path as discovered in the input directory
    pub path: PathBuf,
    /// File name without extension
    pub stem: String,
    /// Device/channel identifier (first `_` segment)
    pub prefix: String,
    /// Recording start time parsed from the stem
    pub timestamp: NaiveDateTime,
}

impl VideoFile {
    /// Build a record from a path, parsing prefix and timestamp out of its stem.
    pub fn from_path(path: &Path) -> Result<Self, SegmentError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let timestamp = timestamp::parse_segment_time(&stem)?;
        let prefix = timestamp::segment_prefix(&stem)?.to_string();

        Ok(Self {
            path: path.to_path_buf(),
            stem,
            prefix,
            timestamp,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}
