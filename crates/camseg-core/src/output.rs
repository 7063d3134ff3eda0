use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{Datelike, NaiveDate, NaiveTime};

/// Render the output stem for a bucket. The bucket date at midnight is the
/// representative time, never a member file's timestamp.
///
/// Returns `None` when the format needs data a plain date cannot supply
/// (`%z` and friends); chrono would otherwise panic while rendering.
pub fn render_stem(key: NaiveDate, format: &str) -> Option<String> {
    let mut stem = String::new();
    write!(stem, "{}", key.and_time(NaiveTime::MIN).format(format)).ok()?;
    Some(stem)
}

/// Output directory for a prefix and bucket: `<root>/<prefix>/<YYYY>/<MM>`.
pub fn bucket_dir(output_root: &Path, prefix: &str, key: NaiveDate) -> PathBuf {
    output_root
        .join(prefix)
        .join(format!("{:04}", key.year()))
        .join(format!("{:02}", key.month()))
}

/// Derive the merged file path for a bucket and create its parent
/// directories. Calling this repeatedly for the same bucket yields the same
/// path and succeeds when the directories already exist.
pub fn resolve_output_path(
    output_root: &Path,
    prefix: &str,
    key: NaiveDate,
    name_format: &str,
    extension: &str,
) -> anyhow::Result<PathBuf> {
    let stem = render_stem(key, name_format)
        .with_context(|| format!("name format {name_format:?} cannot be rendered for {key}"))?;

    let dir = bucket_dir(output_root, prefix, key);
    fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create output directory {}", dir.display()))?;

    Ok(dir.join(format!("{stem}.{extension}")))
}
