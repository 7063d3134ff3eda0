use std::path::PathBuf;
use std::time::Duration;

/// A segment filename that does not follow `<prefix>_<YYYYMMDDHHMMSS>[_...]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("cannot parse timestamp from {stem:?}: no second '_' segment")]
    MissingTimestamp { stem: String },

    #[error("cannot parse timestamp from {stem:?}: {segment:?} is {len} characters, expected 14")]
    BadTimestampLength { stem: String, segment: String, len: usize },

    #[error("cannot parse timestamp from {stem:?}: {segment:?} is not a valid YYYYMMDDHHMMSS date")]
    InvalidTimestamp { stem: String, segment: String },

    #[error("cannot group {stem:?}: empty device prefix")]
    MissingPrefix { stem: String },
}

/// Rejected configuration, reported before any file is touched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid merge mode {0:?}: expected \"day\" or \"month\"")]
    InvalidMode(String),

    #[error("delete_source and rename_source are mutually exclusive")]
    ConflictingDisposition,

    #[error("invalid name format {format:?}: {reason}")]
    InvalidNameFormat { format: String, reason: String },

    #[error("name format {format:?} does not tell the days of a month apart; day buckets would share one output name")]
    AmbiguousNameFormat { format: String },

    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}

/// Why a single bucket could not be merged.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("no input segments")]
    NoInputs,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("concat tool exited with {}: {diagnostics}", describe_exit(.exit_code))]
    ToolFailed {
        exit_code: Option<i32>,
        diagnostics: String,
    },

    #[error("concat tool did not finish within {0:?}")]
    Timeout(Duration),

    #[error("tool reported success but wrote nothing to {}", .0.display())]
    NoOutput(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {c}"),
        None => "no exit code (killed by signal)".to_string(),
    }
}

impl MergeError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MergeError::Io {
            context: context.into(),
            source,
        }
    }
}

/// A source file that could not be deleted or renamed after its bucket merged.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action} {}: {source}", .path.display())]
pub struct DispositionError {
    pub path: PathBuf,
    pub action: &'static str,
    #[source]
    pub source: std::io::Error,
}
