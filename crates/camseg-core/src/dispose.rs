use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::DispositionError;
use crate::media::VideoFile;

/// What happens to the sources of a bucket once its merged output exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Leave sources untouched
    Keep,
    Delete,
    /// Append `.<suffix>` to the full file name, e.g. `a.mp4` -> `a.mp4.old`
    Rename { suffix: String },
}

#[derive(Debug, Default)]
pub struct DispositionSummary {
    pub disposed: u64,
    pub errors: Vec<DispositionError>,
}

/// Path a source file is moved to when marked as processed.
pub fn renamed_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

/// Like `fs::rename`, but fails instead of replacing an existing target.
fn rename_no_clobber(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} already exists", to.display()),
        ));
    }
    fs::rename(from, to)
}

/// Delete or rename every source of a merged bucket. A failure on one file is
/// logged and collected; the remaining files are still processed.
pub fn dispose_sources(files: &[&VideoFile], disposition: &Disposition) -> DispositionSummary {
    let mut summary = DispositionSummary::default();

    for file in files {
        let result = match disposition {
            Disposition::Keep => return summary,
            Disposition::Delete => fs::remove_file(&file.path)
                .map(|_| info!(path = %file.path.display(), "deleted source"))
                .map_err(|source| DispositionError {
                    path: file.path.clone(),
                    action: "delete",
                    source,
                }),
            Disposition::Rename { suffix } => {
                let target = renamed_path(&file.path, suffix);
                rename_no_clobber(&file.path, &target)
                    .map(|_| {
                        info!(from = %file.path.display(), to = %target.display(), "renamed source")
                    })
                    .map_err(|source| DispositionError {
                        path: file.path.clone(),
                        action: "rename",
                        source,
                    })
            }
        };

        match result {
            Ok(()) => summary.disposed += 1,
            Err(e) => {
                warn!("{e}");
                summary.errors.push(e);
            }
        }
    }

    summary
}
