use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::media::VideoFile;

/// Calendar period that one merged output covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeBy {
    Day,
    Month,
}

impl MergeBy {
    /// Bucket key for a timestamp: the date itself, or the first of its month.
    pub fn bucket_key(self, timestamp: NaiveDateTime) -> NaiveDate {
        let date = timestamp.date();
        match self {
            MergeBy::Day => date,
            // day 1 exists in every month
            MergeBy::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

impl FromStr for MergeBy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(MergeBy::Day),
            "month" => Ok(MergeBy::Month),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for MergeBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeBy::Day => write!(f, "day"),
            MergeBy::Month => write!(f, "month"),
        }
    }
}

/// Files sharing one device prefix, in the order they were given.
#[derive(Debug)]
pub struct PrefixGroup<'a> {
    pub prefix: &'a str,
    pub files: Vec<&'a VideoFile>,
}

/// Files of one prefix that fall into the same day or month.
#[derive(Debug)]
pub struct TimeBucket<'a> {
    pub key: NaiveDate,
    pub files: Vec<&'a VideoFile>,
}

/// Partition files by prefix. Input must already be time-sorted; groups come
/// out in order of first occurrence and keep the relative order of members.
pub fn group_by_prefix(files: &[VideoFile]) -> Vec<PrefixGroup<'_>> {
    let mut groups: Vec<PrefixGroup<'_>> = Vec::new();

    for file in files {
        match groups.iter_mut().find(|g| g.prefix == file.prefix) {
            Some(group) => group.files.push(file),
            None => groups.push(PrefixGroup {
                prefix: &file.prefix,
                files: vec![file],
            }),
        }
    }

    groups
}

/// Partition files into day or month buckets, preserving input order.
pub fn bucket_by_time<'a>(files: &[&'a VideoFile], merge_by: MergeBy) -> Vec<TimeBucket<'a>> {
    let mut buckets: Vec<TimeBucket<'a>> = Vec::new();

    for &file in files {
        let key = merge_by.bucket_key(file.timestamp);
        match buckets.iter_mut().find(|b| b.key == key) {
            Some(bucket) => bucket.files.push(file),
            None => buckets.push(TimeBucket {
                key,
                files: vec![file],
            }),
        }
    }

    buckets
}
