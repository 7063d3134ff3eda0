use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::format::{Item, StrftimeItems};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::dispose::Disposition;
use crate::error::ConfigError;
use crate::group::MergeBy;
use crate::output;

fn default_name_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_merge_by() -> String {
    "day".to_string()
}

fn default_rename_suffix() -> String {
    "old".to_string()
}

fn default_input_extension() -> String {
    "mp4".to_string()
}

fn default_output_extension() -> String {
    "mkv".to_string()
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_merge_timeout_secs() -> u64 {
    3600
}

fn default_exclude_recent_days() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    /// strftime format for the output file stem, applied to the bucket date
    #[serde(default = "default_name_format")]
    pub name_format: String,
    /// "day" or "month"
    #[serde(default = "default_merge_by")]
    pub merge_by: String,
    #[serde(default)]
    pub delete_source: bool,
    #[serde(default)]
    pub rename_source: bool,
    #[serde(default = "default_rename_suffix")]
    pub rename_suffix: String,
    #[serde(default = "default_input_extension")]
    pub input_extension: String,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_merge_timeout_secs")]
    pub merge_timeout_secs: u64,
    /// Number of most recent days (today included) whose files are left alone
    #[serde(default = "default_exclude_recent_days")]
    pub exclude_recent_days: u32,
    #[serde(default = "default_true")]
    pub preserve_mtime: bool,
}

impl ProcessOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            name_format: default_name_format(),
            merge_by: default_merge_by(),
            delete_source: false,
            rename_source: false,
            rename_suffix: default_rename_suffix(),
            input_extension: default_input_extension(),
            output_extension: default_output_extension(),
            ffmpeg: default_ffmpeg(),
            merge_timeout_secs: default_merge_timeout_secs(),
            exclude_recent_days: default_exclude_recent_days(),
            preserve_mtime: true,
        }
    }

    /// Load options from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open config file {}", path.display()))?;
        let options = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse config file {}", path.display()))?;
        Ok(options)
    }

    /// Check every setting up front so a bad configuration fails before any
    /// file is read, merged or removed.
    pub fn validate(&self) -> Result<MergePlan, ConfigError> {
        let merge_by: MergeBy = self.merge_by.parse()?;

        let disposition = match (self.delete_source, self.rename_source) {
            (true, true) => return Err(ConfigError::ConflictingDisposition),
            (true, false) => Disposition::Delete,
            (false, true) => {
                check_token("rename_suffix", &self.rename_suffix)?;
                // a renamed source must no longer match the scan filter
                if self.rename_suffix.eq_ignore_ascii_case(&self.input_extension) {
                    return Err(ConfigError::InvalidValue {
                        field: "rename_suffix",
                        value: self.rename_suffix.clone(),
                    });
                }
                Disposition::Rename {
                    suffix: self.rename_suffix.clone(),
                }
            }
            (false, false) => Disposition::Keep,
        };

        check_token("input_extension", &self.input_extension)?;
        check_token("output_extension", &self.output_extension)?;
        validate_name_format(&self.name_format, merge_by)?;

        if self.merge_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "merge_timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.exclude_recent_days == 0 {
            return Err(ConfigError::InvalidValue {
                field: "exclude_recent_days",
                value: "0".to_string(),
            });
        }

        Ok(MergePlan {
            merge_by,
            disposition,
            name_format: self.name_format.clone(),
            input_extension: self.input_extension.to_ascii_lowercase(),
            output_extension: self.output_extension.clone(),
            merge_timeout: Duration::from_secs(self.merge_timeout_secs),
            exclude_recent_days: self.exclude_recent_days,
            preserve_mtime: self.preserve_mtime,
        })
    }
}

/// Validated, typed form of [`ProcessOptions`].
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub merge_by: MergeBy,
    pub disposition: Disposition,
    pub name_format: String,
    /// Lowercased, without the dot
    pub input_extension: String,
    pub output_extension: String,
    pub merge_timeout: Duration,
    pub exclude_recent_days: u32,
    pub preserve_mtime: bool,
}

impl MergePlan {
    /// True when `date` lies inside the window of recent days ending at `today`,
    /// i.e. the recording may still be in progress.
    pub fn is_recent(&self, date: NaiveDate, today: NaiveDate) -> bool {
        let span = Days::new(u64::from(self.exclude_recent_days.saturating_sub(1)));
        let first = today.checked_sub_days(span).unwrap_or(NaiveDate::MIN);
        first <= date && date <= today
    }
}

/// Extensions and suffixes become part of file names: no dots, no separators.
fn check_token(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let bad = value.is_empty()
        || value
            .chars()
            .any(|c| c == '.' || c == '/' || c == '\\' || c.is_whitespace());
    if bad {
        return Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Reject formats chrono cannot render, formats that produce unusable file
/// names, and (in day mode) formats that map two days of a month to one name.
pub fn validate_name_format(format: &str, merge_by: MergeBy) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidNameFormat {
        format: format.to_string(),
        reason: reason.to_string(),
    };

    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(invalid("unsupported strftime specifier"));
    }

    // one full 31-day month; a repeat here means two buckets share a name
    let mut seen: Vec<String> = Vec::with_capacity(31);
    for day in 1..=31 {
        let Some(date) = NaiveDate::from_ymd_opt(2000, 1, day) else {
            continue;
        };
        let Some(stem) = output::render_stem(date, format) else {
            return Err(invalid("cannot be rendered for a plain date"));
        };
        if stem.trim().is_empty() {
            return Err(invalid("renders an empty file name"));
        }
        if stem.contains('/') || stem.contains('\\') || stem == "." || stem == ".." {
            return Err(invalid("renders a path instead of a file name"));
        }
        if merge_by == MergeBy::Day && seen.contains(&stem) {
            return Err(ConfigError::AmbiguousNameFormat {
                format: format.to_string(),
            });
        }
        seen.push(stem);
    }

    Ok(())
}
