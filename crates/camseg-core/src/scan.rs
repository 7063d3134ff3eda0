use std::fs;
use std::path::Path;

use anyhow::Context;

use crate::media::VideoFile;

/// List the segment files directly inside `input_dir` whose extension matches
/// `extension` (case-insensitive). Subdirectories are not descended into.
///
/// Every matching file must carry a parseable `<prefix>_<YYYYMMDDHHMMSS>`
/// name; the first one that does not aborts the scan, since a misread
/// timestamp would put the file in the wrong output.
pub fn scan_segments(input_dir: &Path, extension: &str) -> anyhow::Result<Vec<VideoFile>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("cannot read input directory {}", input_dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("cannot list {}", input_dir.display()))?;
        let path = entry.path();
        if !path.is_file() || !has_extension(&path, extension) {
            continue;
        }

        let file = VideoFile::from_path(&path)
            .with_context(|| format!("malformed segment file {}", path.display()))?;
        files.push(file);
    }

    Ok(files)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

/// Sort by recording time; equal timestamps fall back to the path so the
/// order never depends on directory listing order.
pub fn sort_by_time(files: &mut [VideoFile]) {
    files.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
}
