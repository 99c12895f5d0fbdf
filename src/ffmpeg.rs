use crate::error::ToolError;
use log::debug;
use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default program name looked up in PATH
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
/// Upper bound for one measurement pass
pub const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Upper bound for one normalization pass
pub const TRANSCODE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Text captured from a finished tool run
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// ffmpeg writes its reports to stderr, so stderr goes first
    pub fn combined(&self) -> String {
        format!("{}{}", self.stderr, self.stdout)
    }
}

/// Loudness filter settings handed to `loudnorm`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoudnormParams {
    pub target_lufs: f64,
    pub true_peak_db: f64,
    pub lra: f64,
}

impl LoudnormParams {
    pub fn filter(&self) -> String {
        format!(
            "loudnorm=I={}:TP={}:LRA={}:print_format=summary",
            self.target_lufs, self.true_peak_db, self.lra
        )
    }
}

/// Returns true if `program -version` runs and exits successfully
pub fn is_available(program: &Path) -> bool {
    Command::new(program)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Arguments for a measurement-only pass: no media is written
pub fn analysis_args(input: &Path) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        input.into(),
        "-af".into(),
        "loudnorm=print_format=summary".into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ]
}

/// Arguments for a normalization pass writing to `output`, copying video as-is
pub fn normalize_args(input: &Path, output: &Path, params: &LoudnormParams) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-i".into(),
        input.into(),
        "-af".into(),
        params.filter().into(),
        "-c:v".into(),
        "copy".into(),
        "-y".into(),
        output.into(),
    ]
}

/// Renders a command line for display
pub fn display_command(program: &Path, args: &[OsString]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

/// Runs `program` to completion, killing it if it outlives `timeout`.
///
/// A nonzero exit is returned as [`ToolError::Failed`].
pub fn run_with_timeout(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
) -> Result<ToolOutput, ToolError> {
    debug!("Running: {}", display_command(program, args));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ToolError::Spawn {
            program: program.to_path_buf(),
            source: e,
        })?;

    // Drain both pipes so a chatty child never blocks on a full buffer
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match wait_deadline(&mut child, timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            _ = child.kill();
            _ = child.wait();
            return Err(ToolError::TimedOut(timeout));
        }
        Err(e) => {
            _ = child.kill();
            _ = child.wait();
            return Err(ToolError::Io(e));
        }
    };

    let output = ToolOutput {
        stdout: collect(stdout),
        stderr: collect(stderr),
    };
    if status.success() {
        Ok(output)
    } else {
        Err(ToolError::Failed {
            code: status.code(),
            stderr: output.stderr,
        })
    }
}

fn wait_deadline(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string() {
        let params = LoudnormParams {
            target_lufs: -18.0,
            true_peak_db: -1.5,
            lra: 11.0,
        };
        assert_eq!(
            params.filter(),
            "loudnorm=I=-18:TP=-1.5:LRA=11:print_format=summary"
        );
    }

    #[test]
    fn test_normalize_args_copy_video_and_overwrite() {
        let params = LoudnormParams {
            target_lufs: -24.0,
            true_peak_db: -2.0,
            lra: 7.0,
        };
        let args = normalize_args(Path::new("in.mp4"), Path::new("in_temp.mp4"), &params);
        let line = display_command(Path::new("ffmpeg"), &args);
        assert!(line.starts_with("ffmpeg "));
        assert!(line.contains("-i in.mp4"));
        assert!(line.contains("-c:v copy"));
        assert!(line.ends_with("-y in_temp.mp4"));
    }

    #[test]
    fn test_missing_program() {
        assert!(!is_available(Path::new("/nonexistent/ffmpeg-9f3a")));
        let err = run_with_timeout(Path::new("/nonexistent/ffmpeg-9f3a"), &[], ANALYSIS_TIMEOUT)
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_exit_code() {
        let args: Vec<OsString> = vec!["-c".into(), "echo out; echo err >&2; exit 3".into()];
        match run_with_timeout(Path::new("sh"), &args, Duration::from_secs(10)) {
            Err(ToolError::Failed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        let args: Vec<OsString> = vec!["-c".into(), "echo out; echo err >&2".into()];
        let output = run_with_timeout(Path::new("sh"), &args, Duration::from_secs(10)).unwrap();
        assert_eq!(output.combined(), "err\nout\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let args: Vec<OsString> = vec!["-c".into(), "sleep 5".into()];
        let started = Instant::now();
        let err = run_with_timeout(Path::new("sh"), &args, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
