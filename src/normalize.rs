use crate::compliance::ComplianceStatus;
use crate::error::{NormalizeError, ToolError};
use crate::ffmpeg::{self, LoudnormParams};
use crate::measure::extract_output_lufs;
use crate::report::ReportEntry;
use crate::resolve::resolve_file;
use log::{info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Target loudness for normalization, middle of the podcast range
pub const DEFAULT_TARGET_LUFS: f64 = -18.0;
pub const DEFAULT_TRUE_PEAK: f64 = -1.5;
pub const DEFAULT_LRA: f64 = 11.0;

/// One out-of-spec file waiting to be normalized
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationTask {
    pub filename: String,
    pub current_lufs: f64,
    pub status: ComplianceStatus,
    pub deviation_db: f64,
    /// `target_lufs - current_lufs`
    pub adjustment_needed: f64,
    pub processed: bool,
    pub error: Option<String>,
}

impl NormalizationTask {
    pub fn new(
        filename: impl Into<String>,
        current_lufs: f64,
        status: ComplianceStatus,
        deviation_db: f64,
        target_lufs: f64,
    ) -> Self {
        NormalizationTask {
            filename: filename.into(),
            current_lufs,
            status,
            deviation_db,
            adjustment_needed: target_lufs - current_lufs,
            processed: false,
            error: None,
        }
    }

    pub fn from_entry(entry: &ReportEntry, target_lufs: f64) -> Self {
        Self::new(
            entry.filename.clone(),
            entry.current_lufs,
            entry.status,
            entry.deviation_db,
            target_lufs,
        )
    }
}

/// Where normalized audio ends up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputMode {
    /// `<stem>_normalized.<ext>` next to the original
    Suffixed,
    /// Original filename inside this directory
    Directory(PathBuf),
    /// Replace the original, optionally keeping a `_backup` copy
    InPlace { backup: bool },
}

/// Settings shared by every task of a normalization run
#[derive(Debug, Clone)]
pub struct NormalizeSettings {
    pub target_lufs: f64,
    pub true_peak_db: f64,
    pub lra: f64,
    pub mode: OutputMode,
    /// Log what would be done and touch nothing
    pub dry_run: bool,
    /// Skip the confirmation prompt
    pub assume_yes: bool,
    pub ffmpeg: PathBuf,
    pub transcode_timeout: Duration,
    /// Directory receiving the run log
    pub log_dir: PathBuf,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        NormalizeSettings {
            target_lufs: DEFAULT_TARGET_LUFS,
            true_peak_db: DEFAULT_TRUE_PEAK,
            lra: DEFAULT_LRA,
            mode: OutputMode::Suffixed,
            dry_run: false,
            assume_yes: false,
            ffmpeg: PathBuf::from(ffmpeg::DEFAULT_FFMPEG),
            transcode_timeout: ffmpeg::TRANSCODE_TIMEOUT,
            log_dir: PathBuf::from("."),
        }
    }
}

impl NormalizeSettings {
    pub fn loudnorm(&self) -> LoudnormParams {
        LoudnormParams {
            target_lufs: self.target_lufs,
            true_peak_db: self.true_peak_db,
            lra: self.lra,
        }
    }

    /// Human readable description of the output mode
    pub fn describe_mode(&self) -> String {
        match &self.mode {
            OutputMode::InPlace { backup: true } => "In-place replacement (with backup)".to_string(),
            OutputMode::InPlace { backup: false } => "In-place replacement (NO BACKUP)".to_string(),
            OutputMode::Directory(dir) => format!("{}/ (original filenames)", dir.display()),
            OutputMode::Suffixed => "Same directory with '_normalized' suffix".to_string(),
        }
    }
}

/// Where to look for the file a task names
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'a> {
    pub source_folder: &'a Path,
    pub report_path: Option<&'a Path>,
}

/// What a successful normalization produced
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub input: PathBuf,
    pub output: PathBuf,
    pub backup: Option<PathBuf>,
    /// Loudness the tool reported for the result, if it printed one
    pub final_lufs: Option<f64>,
    pub dry_run: bool,
}

/// `dir/<stem><suffix>.<ext>`
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

pub fn temp_path(input: &Path) -> PathBuf {
    sibling_with_suffix(input, "_temp")
}

pub fn backup_path(input: &Path) -> PathBuf {
    sibling_with_suffix(input, "_backup")
}

/// Computes where the normalized file goes. Does not create anything.
pub fn output_path(input: &Path, mode: &OutputMode) -> PathBuf {
    match mode {
        OutputMode::InPlace { .. } => input.to_path_buf(),
        OutputMode::Directory(dir) => dir.join(input.file_name().unwrap_or_default()),
        OutputMode::Suffixed => sibling_with_suffix(input, "_normalized"),
    }
}

/// Copies `path` to its `_backup` sibling, keeping permissions and mtime.
///
/// An existing backup file holds an older original and is left alone.
/// Returns the backup path and whether this call created it.
fn backup_file(path: &Path) -> Result<(PathBuf, bool), NormalizeError> {
    let backup = backup_path(path);
    if backup.is_file() {
        warn!("  Keeping existing backup {:?}", backup);
        return Ok((backup, false));
    }
    if let Err(e) = fs::copy(path, &backup) {
        if backup.is_file() {
            _ = fs::remove_file(&backup);
        }
        return Err(NormalizeError::Backup {
            path: backup,
            source: e,
        });
    }
    let kept_mtime = fs::metadata(path).and_then(|m| m.modified()).and_then(|modified| {
        fs::File::options()
            .write(true)
            .open(&backup)
            .and_then(|f| f.set_modified(modified))
    });
    if let Err(e) = kept_mtime {
        warn!("Backup {:?} keeps current mtime: {}", backup, e);
    }
    Ok((backup, true))
}

/// Both paths exist and resolve to the same file
fn is_same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Size and mtime, enough to tell whether a tool run wrote to `path`
fn fingerprint(path: &Path) -> Option<(u64, SystemTime)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

/// Removes a leftover of this run. Never removes `input`.
fn remove_artifact(path: &Path, input: &Path) {
    if is_same_file(path, input) {
        return;
    }
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to remove partial file {:?}: {}", path, e);
        }
    }
}

/// Normalizes the file named by `task` according to `settings`.
///
/// The original is only ever modified by an atomic rename of a fully written
/// temp file, after the backup (if requested) succeeded.
pub fn normalize_file(
    task: &NormalizationTask,
    settings: &NormalizeSettings,
    lookup: Lookup<'_>,
) -> Result<Normalized, NormalizeError> {
    let input = resolve_file(&task.filename, lookup.source_folder, lookup.report_path)
        .ok_or_else(|| NormalizeError::FileNotFound(task.filename.clone()))?;
    let output = output_path(&input, &settings.mode);
    let in_place = matches!(settings.mode, OutputMode::InPlace { .. });
    let temp = if in_place {
        temp_path(&input)
    } else {
        output.clone()
    };
    if !in_place && is_same_file(&input, &output) {
        return Err(NormalizeError::OutputIsInput(output));
    }
    let args = ffmpeg::normalize_args(&input, &temp, &settings.loudnorm());

    if settings.dry_run {
        info!(
            "[DRY RUN] Would execute: {}",
            ffmpeg::display_command(&settings.ffmpeg, &args)
        );
        return Ok(Normalized {
            input,
            output,
            backup: None,
            final_lufs: None,
            dry_run: true,
        });
    }

    if let OutputMode::Directory(dir) = &settings.mode {
        fs::create_dir_all(dir).map_err(|e| NormalizeError::Io {
            path: dir.clone(),
            source: e,
        })?;
    }

    info!(
        "  Target: {} LUFS (adjustment: {:+.1} dB)",
        settings.target_lufs, task.adjustment_needed
    );
    let before = fingerprint(&temp);
    let tool_output = match ffmpeg::run_with_timeout(&settings.ffmpeg, &args, settings.transcode_timeout) {
        Ok(out) => out,
        Err(e) => {
            // Drop a partial file this run wrote. An earlier output the tool
            // never got to write stays.
            let spawned = !matches!(e, ToolError::Spawn { .. });
            if spawned && (in_place || fingerprint(&temp) != before) {
                remove_artifact(&temp, &input);
            }
            if let ToolError::Failed { stderr, .. } = &e {
                if stderr.contains("already exists") {
                    warn!("  Output file already exists and could not be overwritten");
                }
            }
            return Err(e.into());
        }
    };

    let mut backup = None;
    if let OutputMode::InPlace { backup: wants_backup } = settings.mode {
        let mut created_backup = None;
        if wants_backup {
            match backup_file(&input) {
                Ok((path, created)) => {
                    if created {
                        info!("  Created backup: {:?}", path.file_name().unwrap_or_default());
                        created_backup = Some(path.clone());
                    }
                    backup = Some(path);
                }
                Err(e) => {
                    remove_artifact(&temp, &input);
                    return Err(e);
                }
            }
        }
        if let Err(e) = fs::rename(&temp, &input) {
            remove_artifact(&temp, &input);
            // Original is untouched, its fresh backup is redundant
            if let Some(path) = &created_backup {
                remove_artifact(path, &input);
            }
            return Err(NormalizeError::Replace {
                path: input,
                source: e,
            });
        }
        info!("  Replaced original file");
    } else {
        info!("  Saved to: {:?}", output.file_name().unwrap_or_default());
    }

    let final_lufs = extract_output_lufs(&tool_output.combined());
    if let Some(lufs) = final_lufs {
        info!("  Final loudness: {:.1} LUFS", lufs);
    }

    Ok(Normalized {
        input,
        output,
        backup,
        final_lufs,
        dry_run: false,
    })
}
