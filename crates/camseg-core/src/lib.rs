pub mod dispose;
pub mod error;
pub mod group;
pub mod media;
pub mod merge;
pub mod options;
pub mod output;
pub mod scan;
pub mod timestamp;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::{Local, NaiveDate, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

pub use error::{ConfigError, DispositionError, MergeError, SegmentError};
pub use group::MergeBy;
pub use media::VideoFile;
pub use merge::{ConcatBackend, ConcatReport, FfmpegBackend, MergeOutcome};
pub use options::{MergePlan, ProcessOptions};

/// A bucket whose merge failed; its sources were left untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketFailure {
    pub prefix: String,
    pub bucket: NaiveDate,
    pub output: Option<PathBuf>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    /// Matching segment files in the input directory
    pub files_found: u64,
    /// Files left alone because they may still be recording
    pub files_excluded_recent: u64,
    pub prefixes: u64,
    pub buckets: u64,
    pub merged: u64,
    /// Buckets whose output already existed
    pub skipped_existing: u64,
    pub sources_disposed: u64,
    #[serde(default)]
    pub failures: Vec<BucketFailure>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Control options for a run.
#[derive(Debug, Clone, Default)]
pub struct ProcessControl {
    /// Date treated as "today" for the recent-file exclusion. Defaults to the
    /// local date when the run starts.
    pub today: Option<NaiveDate>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }
}

/// Type alias for progress callback: `(stage, current, total, message)`
pub type ProgressCallback<'a> = dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback<'a>,
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback<'a>) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            // a poisoned lock only means another reporter panicked; keep reporting
            let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Merge the input directory using ffmpeg, with today's local date.
pub fn process(
    options: &ProcessOptions,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let plan = options.validate().context("invalid configuration")?;
    let backend = FfmpegBackend::new(options.ffmpeg.clone(), plan.merge_timeout);
    process_with_control(options, &ProcessControl::default(), &backend, progress_callback)
}

/// Run the full pipeline: validate, scan, exclude recent files, sort, then
/// for each prefix and each time bucket resolve the output, merge and dispose
/// of the sources.
///
/// Configuration and filename errors abort the run. A failed merge only
/// affects its own bucket and is recorded in [`ProcessResult::failures`].
pub fn process_with_control(
    options: &ProcessOptions,
    control: &ProcessControl,
    backend: &dyn ConcatBackend,
    progress_callback: &ProgressCallback<'_>,
) -> anyhow::Result<ProcessResult> {
    let tp = ThrottledProgress::new(progress_callback);
    let plan = options.validate().context("invalid configuration")?;
    let today = control.today.unwrap_or_else(|| Local::now().date_naive());

    std::fs::create_dir_all(&options.output)
        .with_context(|| format!("cannot create output directory {}", options.output.display()))?;

    // Stage 1: discover and order
    let mut files = scan::scan_segments(&options.input, &plan.input_extension)?;
    let files_found = files.len() as u64;
    files.retain(|f| !plan.is_recent(f.date(), today));
    let files_excluded_recent = files_found - files.len() as u64;
    info!(
        found = files_found,
        excluded_recent = files_excluded_recent,
        "scanned {}",
        options.input.display()
    );
    scan::sort_by_time(&mut files);

    let mut result = ProcessResult {
        files_found,
        files_excluded_recent,
        ..Default::default()
    };

    if files.is_empty() {
        info!("no finished segments to merge");
        return Ok(result);
    }

    // Stage 2: group
    let groups = group::group_by_prefix(&files);
    let jobs: Vec<(&str, group::TimeBucket<'_>)> = groups
        .iter()
        .flat_map(|g| {
            group::bucket_by_time(&g.files, plan.merge_by)
                .into_iter()
                .map(move |b| (g.prefix, b))
        })
        .collect();
    result.prefixes = groups.len() as u64;
    result.buckets = jobs.len() as u64;

    // Stage 3: merge and dispose, one bucket at a time
    let total = jobs.len() as u64;
    for (i, (prefix, bucket)) in jobs.iter().enumerate() {
        let label = format!("{prefix} {}", bucket.key);
        tp.report("merge", i as u64, total, &label);

        let output = match output::resolve_output_path(
            &options.output,
            prefix,
            bucket.key,
            &plan.name_format,
            &plan.output_extension,
        ) {
            Ok(path) => path,
            Err(e) => {
                error!(prefix = %prefix, bucket = %bucket.key, "cannot prepare output: {e:#}");
                result.failures.push(BucketFailure {
                    prefix: prefix.to_string(),
                    bucket: bucket.key,
                    output: None,
                    error: format!("{e:#}"),
                });
                continue;
            }
        };

        let inputs: Vec<&std::path::Path> = bucket.files.iter().map(|f| f.path.as_path()).collect();
        match merge::merge_segments(backend, &inputs, &output) {
            Ok(MergeOutcome::Merged) => {
                result.merged += 1;
                if plan.preserve_mtime {
                    if let Err(e) = set_mtime(&output, bucket.files[0].timestamp) {
                        warn!(output = %output.display(), "cannot set mtime: {e:#}");
                        result.warnings.push(format!("{}: cannot set mtime: {e:#}", output.display()));
                    }
                }
            }
            Ok(MergeOutcome::AlreadyExists) => result.skipped_existing += 1,
            Err(e) => {
                error!(prefix = %prefix, bucket = %bucket.key, output = %output.display(), "merge failed: {e}");
                result.failures.push(BucketFailure {
                    prefix: prefix.to_string(),
                    bucket: bucket.key,
                    output: Some(output),
                    error: e.to_string(),
                });
                continue;
            }
        }

        let summary = dispose::dispose_sources(&bucket.files, &plan.disposition);
        result.sources_disposed += summary.disposed;
        result
            .warnings
            .extend(summary.errors.iter().map(|e| e.to_string()));
    }
    tp.report("merge", total, total, "done");

    info!(
        merged = result.merged,
        skipped = result.skipped_existing,
        failed = result.failures.len(),
        "finished"
    );
    Ok(result)
}

/// Stamp the merged file with the recording start of its first segment.
fn set_mtime(path: &std::path::Path, start: chrono::NaiveDateTime) -> anyhow::Result<()> {
    // NaiveDateTime is camera-local time
    let local = Local
        .from_local_datetime(&start)
        .earliest()
        .with_context(|| format!("{start} does not exist in the local time zone"))?;
    let ft = filetime::FileTime::from_unix_time(local.timestamp(), 0);
    filetime::set_file_mtime(path, ft)?;
    Ok(())
}
