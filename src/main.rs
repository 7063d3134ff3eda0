mod logging;

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use camseg_core::ProcessOptions;

#[derive(Parser)]
#[command(name = "camseg", version, about = "Merge camera recording segments into daily or monthly files")]
struct Cli {
    /// Directory holding <prefix>_<YYYYMMDDHHMMSS>*.mp4 segments
    input: Option<PathBuf>,

    /// Output root; files land in <output>/<prefix>/<YYYY>/<MM>/
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file with options; flags given on the command line take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Merge period: "day" or "month"
    #[arg(long)]
    merge_by: Option<String>,

    /// strftime format for output names, applied to the bucket date
    #[arg(long)]
    name_format: Option<String>,

    /// Extension of source segments (case-insensitive)
    #[arg(long)]
    input_ext: Option<String>,

    /// Container extension of merged files
    #[arg(long)]
    output_ext: Option<String>,

    /// Delete source segments after their bucket is merged
    #[arg(long, conflicts_with = "rename_source")]
    delete_source: bool,

    /// Rename source segments to <name>.<suffix> after their bucket is merged
    #[arg(long)]
    rename_source: bool,

    /// Suffix used by --rename-source
    #[arg(long)]
    rename_suffix: Option<String>,

    /// Path to the ffmpeg executable
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// Give up on a single merge after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Skip files from this many most recent days (1 = today only)
    #[arg(long)]
    exclude_days: Option<u32>,

    /// Leave merged files with the current time as mtime
    #[arg(long)]
    no_preserve_mtime: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective options as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Debug logging (overridden by CAMSEG_LOG)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Config file (if any) first, then explicit flags on top.
    fn options(&self) -> anyhow::Result<ProcessOptions> {
        let mut options = match &self.config {
            Some(path) => ProcessOptions::load(path)?,
            None => {
                let input = self.input.clone().context("missing input directory")?;
                let output = self.output.clone().context("missing --output")?;
                ProcessOptions::new(input, output)
            }
        };

        if let Some(input) = &self.input {
            options.input = input.clone();
        }
        if let Some(output) = &self.output {
            options.output = output.clone();
        }
        if let Some(merge_by) = &self.merge_by {
            options.merge_by = merge_by.clone();
        }
        if let Some(name_format) = &self.name_format {
            options.name_format = name_format.clone();
        }
        if let Some(ext) = &self.input_ext {
            options.input_extension = ext.clone();
        }
        if let Some(ext) = &self.output_ext {
            options.output_extension = ext.clone();
        }
        if self.delete_source {
            options.delete_source = true;
            options.rename_source = false;
        }
        if self.rename_source {
            options.rename_source = true;
            options.delete_source = false;
        }
        if let Some(suffix) = &self.rename_suffix {
            options.rename_suffix = suffix.clone();
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            options.ffmpeg = ffmpeg.clone();
        }
        if let Some(secs) = self.timeout_secs {
            options.merge_timeout_secs = secs;
        }
        if let Some(days) = self.exclude_days {
            options.exclude_recent_days = days;
        }
        if self.no_preserve_mtime {
            options.preserve_mtime = false;
        }

        Ok(options)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logger(cli.verbose);
    let t_total = std::time::Instant::now();

    let options = cli.options()?;
    tracing::debug!(?options, "effective options");
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&options)?);
        return Ok(());
    }

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}/{len} {msg}")
            .context("invalid progress template")?,
    );

    let result = camseg_core::process(&options, &|_stage, current, total, message| {
        pb.set_length(total);
        pb.set_position(current);
        pb.set_message(message.to_string());
    });
    pb.finish_and_clear();
    let result = result?;

    if let Some(path) = &cli.report {
        let file = File::create(path)
            .with_context(|| format!("cannot create report {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &result)?;
    }

    eprintln!(
        "Done! {} segments ({} still recording), {} buckets: {} merged, {} already merged, {} failed, {} sources disposed ({:.2}s)",
        result.files_found,
        result.files_excluded_recent,
        result.buckets,
        result.merged,
        result.skipped_existing,
        result.failures.len(),
        result.sources_disposed,
        t_total.elapsed().as_secs_f64()
    );
    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }

    if !result.failures.is_empty() {
        for failure in &result.failures {
            eprintln!("failed: {} {}: {}", failure.prefix, failure.bucket, failure.error);
        }
        anyhow::bail!("{} bucket(s) failed to merge", result.failures.len());
    }

    Ok(())
}
