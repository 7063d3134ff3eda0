//! Lossless concatenation of a bucket's segments into one container.
//!
//! The executor owns the parts that must hold regardless of the tool used:
//! skip when the output already exists, list inputs in playback order in a
//! temporary manifest, and only publish an output that verifiably exists.
//! The tool itself sits behind [`ConcatBackend`]; [`FfmpegBackend`] drives
//! ffmpeg's concat demuxer with `-c copy`.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::MergeError;

/// How much of the tool's stderr is kept for diagnostics.
const DIAGNOSTICS_TAIL: usize = 4096;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// What the concat tool reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcatReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Tail of the tool's stderr
    pub diagnostics: String,
}

/// Something that can stream-copy the files listed in a concat manifest into
/// `output`, overwriting it without prompting.
pub trait ConcatBackend {
    fn concat(&self, manifest: &Path, output: &Path) -> Result<ConcatReport, MergeError>;
}

/// Result of a merge that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    /// Output was already present; nothing was run
    AlreadyExists,
}

/// Runs `ffmpeg -f concat -safe 0 -i <manifest> -c copy <output>` with a
/// bounded wait.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn command(&self, manifest: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-nostdin", "-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .args(["-c", "copy"])
            .arg(output);
        cmd
    }
}

impl ConcatBackend for FfmpegBackend {
    fn concat(&self, manifest: &Path, output: &Path) -> Result<ConcatReport, MergeError> {
        let program = self.program.display().to_string();
        let mut cmd = self.command(manifest, output);
        debug!("running {:?}", cmd);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| MergeError::Spawn {
                program: program.clone(),
                source,
            })?;

        // ffmpeg is chatty on stderr; drain it so the child never blocks on a full pipe
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf);
                buf
            })
        });
        let collect_stderr = |reader: Option<thread::JoinHandle<Vec<u8>>>| {
            reader
                .and_then(|h| h.join().ok())
                .map(|buf| stderr_tail(&buf))
                .unwrap_or_default()
        };

        // a timeout too large for the clock means no deadline at all
        let deadline = Instant::now().checked_add(self.timeout);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if deadline.is_some_and(|d| Instant::now() >= d) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    let diagnostics = collect_stderr(stderr_reader);
                    debug!("{program} timed out; stderr: {diagnostics}");
                    return Err(MergeError::Timeout(self.timeout));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(MergeError::io(format!("waiting for {program}"), e));
                }
            }
        };

        Ok(ConcatReport {
            success: status.success(),
            exit_code: status.code(),
            diagnostics: collect_stderr(stderr_reader),
        })
    }
}

fn stderr_tail(buf: &[u8]) -> String {
    let text = String::from_utf8_lossy(buf);
    let text = text.trim_end();
    let mut start = text.len().saturating_sub(DIAGNOSTICS_TAIL);
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// One manifest line per input, in playback order. Single quotes inside a
/// path are closed, escaped and reopened the way the concat demuxer expects.
pub fn manifest_contents(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

/// Sibling path the tool writes to before the result is moved into place.
/// Keeps the extension so the tool still picks the right muxer.
pub fn partial_path(output: &Path) -> PathBuf {
    let stem = output.file_stem().unwrap_or_default().to_string_lossy();
    let name = match output.extension() {
        Some(ext) => format!(".{stem}.partial.{}", ext.to_string_lossy()),
        None => format!(".{stem}.partial"),
    };
    output.with_file_name(name)
}

/// Concatenate `inputs` (in the given order) into `output`.
///
/// An existing `output` is treated as a finished earlier merge and left
/// alone. The manifest is a temporary file removed on every return path, and
/// a failed or unverifiable run never leaves anything at `output`.
pub fn merge_segments(
    backend: &dyn ConcatBackend,
    inputs: &[&Path],
    output: &Path,
) -> Result<MergeOutcome, MergeError> {
    if output.exists() {
        info!(output = %output.display(), "output exists, skipping merge");
        return Ok(MergeOutcome::AlreadyExists);
    }
    if inputs.is_empty() {
        return Err(MergeError::NoInputs);
    }

    let absolute = inputs
        .iter()
        .map(|p| {
            fs::canonicalize(p)
                .map_err(|e| MergeError::io(format!("cannot resolve {}", p.display()), e))
        })
        .collect::<Result<Vec<PathBuf>, MergeError>>()?;

    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let mut manifest = tempfile::Builder::new()
        .prefix(".camseg-manifest-")
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(|e| MergeError::io(format!("cannot create manifest in {}", dir.display()), e))?;
    let contents = manifest_contents(&absolute);
    manifest
        .write_all(contents.as_bytes())
        .and_then(|_| manifest.flush())
        .map_err(|e| MergeError::io("cannot write manifest", e))?;
    debug!("manifest {}:\n{}", manifest.path().display(), contents.trim_end());

    let partial = partial_path(output);
    let result = run_and_verify(backend, manifest.path(), &partial, output);

    match result {
        Ok(()) => {
            fs::rename(&partial, output).map_err(|e| {
                let _ = fs::remove_file(&partial);
                MergeError::io(format!("cannot move result to {}", output.display()), e)
            })?;
            info!(output = %output.display(), segments = inputs.len(), "merged");
            Ok(MergeOutcome::Merged)
        }
        Err(e) => {
            let _ = fs::remove_file(&partial);
            Err(e)
        }
    }
}

fn run_and_verify(
    backend: &dyn ConcatBackend,
    manifest: &Path,
    partial: &Path,
    output: &Path,
) -> Result<(), MergeError> {
    let report = backend.concat(manifest, partial)?;
    if !report.success {
        return Err(MergeError::ToolFailed {
            exit_code: report.exit_code,
            diagnostics: report.diagnostics,
        });
    }

    let written = fs::metadata(partial).map(|m| m.len() > 0).unwrap_or(false);
    if !written {
        return Err(MergeError::NoOutput(output.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::tempdir;

    /// Test double that records every manifest it is handed.
    pub(crate) struct FakeBackend {
        pub mode: FakeMode,
        pub manifests: RefCell<Vec<String>>,
    }

    #[derive(Clone, Copy)]
    pub(crate) enum FakeMode {
        /// Write the concatenated input bytes to the output
        Concat,
        /// Exit non-zero without writing
        Fail,
        /// Exit zero without writing
        Silent,
    }

    impl FakeBackend {
        pub fn new(mode: FakeMode) -> Self {
            Self {
                mode,
                manifests: RefCell::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.manifests.borrow().len()
        }
    }

    impl ConcatBackend for FakeBackend {
        fn concat(&self, manifest: &Path, output: &Path) -> Result<ConcatReport, MergeError> {
            let text = fs::read_to_string(manifest).unwrap();
            self.manifests.borrow_mut().push(text.clone());

            match self.mode {
                FakeMode::Concat => {
                    let mut data = Vec::new();
                    for line in text.lines() {
                        let path = line
                            .strip_prefix("file '")
                            .and_then(|l| l.strip_suffix('\''))
                            .unwrap();
                        data.extend(fs::read(path).unwrap());
                    }
                    fs::write(output, data).unwrap();
                    Ok(ConcatReport {
                        success: true,
                        exit_code: Some(0),
                        diagnostics: String::new(),
                    })
                }
                FakeMode::Fail => Ok(ConcatReport {
                    success: false,
                    exit_code: Some(1),
                    diagnostics: "Invalid data found when processing input".to_string(),
                }),
                FakeMode::Silent => Ok(ConcatReport {
                    success: true,
                    exit_code: Some(0),
                    diagnostics: String::new(),
                }),
            }
        }
    }

    fn segments(dir: &Path, names: &[(&str, &str)]) -> Vec<PathBuf> {
        names
            .iter()
            .map(|(name, body)| {
                let path = dir.join(name);
                fs::write(&path, body).unwrap();
                path
            })
            .collect()
    }

    fn leftover_files(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect()
    }

    #[test]
    fn test_manifest_contents() {
        let text = manifest_contents(&[
            PathBuf::from("/in/00_20240101120000.mp4"),
            PathBuf::from("/in/it's.mp4"),
        ]);
        assert_eq!(
            text,
            "file '/in/00_20240101120000.mp4'\nfile '/in/it'\\''s.mp4'\n"
        );
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            partial_path(Path::new("/out/00/2024/01/2024-01-01.mkv")),
            PathBuf::from("/out/00/2024/01/.2024-01-01.partial.mkv")
        );
    }

    #[test]
    fn test_merge_in_playback_order() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        let paths = segments(
            input.path(),
            &[("00_20240101080000.mp4", "a"), ("00_20240101090000.mp4", "b"), ("00_20240101100000.mp4", "c")],
        );
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let output = out.path().join("2024-01-01.mkv");
        let backend = FakeBackend::new(FakeMode::Concat);

        let outcome = merge_segments(&backend, &refs, &output).unwrap();
        assert_eq!(outcome, MergeOutcome::Merged);
        assert_eq!(fs::read_to_string(&output).unwrap(), "abc");

        let manifest = backend.manifests.borrow()[0].clone();
        let listed: Vec<&str> = manifest.lines().collect();
        assert_eq!(listed.len(), 3);
        assert!(listed[0].ends_with("00_20240101080000.mp4'"));
        assert!(listed[1].ends_with("00_20240101090000.mp4'"));
        assert!(listed[2].ends_with("00_20240101100000.mp4'"));
        assert!(listed.iter().all(|l| Path::new(&l[6..l.len() - 1]).is_absolute()));

        assert!(leftover_files(out.path()).is_empty(), "manifest and partial must be gone");
    }

    #[test]
    fn test_existing_output_is_skipped() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        let paths = segments(input.path(), &[("00_20240101080000.mp4", "a")]);
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let output = out.path().join("2024-01-01.mkv");
        fs::write(&output, "earlier").unwrap();
        let backend = FakeBackend::new(FakeMode::Concat);

        let outcome = merge_segments(&backend, &refs, &output).unwrap();
        assert_eq!(outcome, MergeOutcome::AlreadyExists);
        assert_eq!(backend.calls(), 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), "earlier");
    }

    #[test]
    fn test_tool_failure_cleans_up() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        let paths = segments(input.path(), &[("00_20240101080000.mp4", "a")]);
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let output = out.path().join("2024-01-01.mkv");
        let backend = FakeBackend::new(FakeMode::Fail);

        let err = merge_segments(&backend, &refs, &output).unwrap_err();
        assert!(matches!(err, MergeError::ToolFailed { exit_code: Some(1), .. }));
        assert!(!output.exists());
        assert!(leftover_files(out.path()).is_empty());
        assert!(paths[0].exists());
    }

    #[test]
    fn test_success_without_output() {
        let input = tempdir().unwrap();
        let out = tempdir().unwrap();
        let paths = segments(input.path(), &[("00_20240101080000.mp4", "a")]);
        let refs: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
        let output = out.path().join("2024-01-01.mkv");
        let backend = FakeBackend::new(FakeMode::Silent);

        let err = merge_segments(&backend, &refs, &output).unwrap_err();
        match &err {
            MergeError::NoOutput(path) => assert_eq!(path, &output),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!err.to_string().contains(".partial"));
        assert!(!output.exists());
        assert!(leftover_files(out.path()).is_empty());
    }

    #[test]
    fn test_missing_input() {
        let out = tempdir().unwrap();
        let output = out.path().join("2024-01-01.mkv");
        let backend = FakeBackend::new(FakeMode::Concat);
        let missing = out.path().join("gone.mp4");

        let err = merge_segments(&backend, &[missing.as_path()], &output).unwrap_err();
        assert!(matches!(err, MergeError::Io { .. }));
        assert_eq!(backend.calls(), 0);
        assert!(matches!(
            merge_segments(&backend, &[], &output),
            Err(MergeError::NoInputs)
        ));
    }

    #[test]
    fn test_stderr_tail() {
        let long = "x".repeat(DIAGNOSTICS_TAIL + 100) + "\n";
        assert_eq!(stderr_tail(long.as_bytes()).len(), DIAGNOSTICS_TAIL);
        assert_eq!(stderr_tail(b"error\n"), "error");
    }

    #[cfg(unix)]
    mod ffmpeg {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        /// Write an executable shell script standing in for ffmpeg.
        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-ffmpeg");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[test]
        fn test_success_writes_last_argument() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(dir.path(), r#"for a in "$@"; do out="$a"; done; echo merged > "$out""#);
            let backend = FfmpegBackend::new(tool, Duration::from_secs(10));
            let output = dir.path().join("out.mkv");

            let report = backend.concat(&dir.path().join("list.txt"), &output).unwrap();
            assert!(report.success);
            assert_eq!(report.exit_code, Some(0));
            assert_eq!(fs::read_to_string(&output).unwrap(), "merged\n");
        }

        #[test]
        fn test_failure_keeps_stderr() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'list.txt: Invalid data' >&2; exit 3");
            let backend = FfmpegBackend::new(tool, Duration::from_secs(10));

            let report = backend
                .concat(&dir.path().join("list.txt"), &dir.path().join("out.mkv"))
                .unwrap();
            assert!(!report.success);
            assert_eq!(report.exit_code, Some(3));
            assert_eq!(report.diagnostics, "list.txt: Invalid data");
        }

        #[test]
        fn test_timeout_kills_tool() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(dir.path(), "exec sleep 30");
            let backend = FfmpegBackend::new(tool, Duration::from_millis(300));

            let started = Instant::now();
            let err = backend
                .concat(&dir.path().join("list.txt"), &dir.path().join("out.mkv"))
                .unwrap_err();
            assert!(matches!(err, MergeError::Timeout(_)));
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[test]
        fn test_unbounded_timeout() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(dir.path(), "exit 0");
            let backend = FfmpegBackend::new(tool, Duration::from_secs(u64::MAX));

            let report = backend
                .concat(&dir.path().join("list.txt"), &dir.path().join("out.mkv"))
                .unwrap();
            assert!(report.success);
        }

        #[test]
        fn test_missing_program() {
            let dir = tempdir().unwrap();
            let backend = FfmpegBackend::new(dir.path().join("no-such-ffmpeg"), Duration::from_secs(1));
            let err = backend
                .concat(&dir.path().join("list.txt"), &dir.path().join("out.mkv"))
                .unwrap_err();
            assert!(matches!(err, MergeError::Spawn { .. }));
        }
    }
}
