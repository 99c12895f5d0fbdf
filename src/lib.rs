/// Loudness range checks
pub mod compliance;
/// Module for error handling
pub mod error;
/// Invocation of the external ffmpeg binary
pub mod ffmpeg;
/// Reading loudness values out of tool output
pub mod measure;
/// Normalizing a single file
pub mod normalize;
/// Loudness report writing and parsing
pub mod report;
/// Locating files named in a report
pub mod resolve;
/// Log written after a normalization run
pub mod run_log;

use crate::compliance::TargetRange;
use crate::error::{Error, MeasurementError};
use crate::measure::{LoudnessParser, LoudnormSummaryParser, Measurement};
use crate::normalize::{Lookup, NormalizationTask, NormalizeSettings, normalize_file};
use crate::report::{CheckSummary, FileOutcome, Report};
use crate::run_log::RunLog;
use indicatif::{ProgressBar, ProgressIterator, ProgressStyle};
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::Display;
use walkdir::WalkDir;

/// Represents supported video container formats
#[derive(Debug, PartialEq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum VideoFormats {
    Mp4,
    Mkv,
    Avi,
    Mov,
    M4v,
    Webm,
    Flv,
    Wmv,
    Mpg,
    Mpeg,
}

impl VideoFormats {
    /// Returns a list of supported file extensions
    #[inline]
    pub fn supported_extensions() -> &'static [&'static str] {
        &[
            "mp4", "mkv", "avi", "mov", "m4v", "webm", "flv", "wmv", "mpg", "mpeg",
        ]
    }

    /// Creates a VideoFormats enum from a file path based on its extension
    #[inline]
    pub fn from_path(value: impl AsRef<Path>) -> Option<Self> {
        Some(
            match value
                .as_ref()
                .extension()
                .unwrap_or_default()
                .to_string_lossy()
                .to_lowercase()
                .as_ref()
            {
                "mp4" => Self::Mp4,
                "mkv" => Self::Mkv,
                "avi" => Self::Avi,
                "mov" => Self::Mov,
                "m4v" => Self::M4v,
                "webm" => Self::Webm,
                "flv" => Self::Flv,
                "wmv" => Self::Wmv,
                "mpg" => Self::Mpg,
                "mpeg" => Self::Mpeg,
                _ => return None,
            },
        )
    }
}

/// Named normalization targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[strum(serialize_all = "lowercase")]
pub enum Preset {
    /// -24 LUFS
    Broadcast,
    /// -16 LUFS
    Gaming,
    /// -16 LUFS
    Podcast,
}

impl Preset {
    pub fn target_lufs(self) -> f64 {
        match self {
            Preset::Broadcast => -24.0,
            Preset::Gaming | Preset::Podcast => -16.0,
        }
    }
}

/// Explicit target wins over a preset, which wins over the default
pub fn resolve_target(target: Option<f64>, preset: Option<Preset>) -> f64 {
    target
        .or(preset.map(Preset::target_lufs))
        .unwrap_or(normalize::DEFAULT_TARGET_LUFS)
}

/// Configuration options for the analysis pass
#[derive(Debug, Clone)]
pub struct CheckOptions {
    /// Folder containing the videos, not searched recursively
    pub folder: PathBuf,
    /// Acceptable loudness range
    pub range: TargetRange,
    /// ffmpeg executable
    pub ffmpeg: PathBuf,
    /// Upper bound for analyzing one file
    pub analysis_timeout: Duration,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            folder: PathBuf::from("."),
            range: TargetRange::default(),
            ffmpeg: PathBuf::from(ffmpeg::DEFAULT_FFMPEG),
            analysis_timeout: ffmpeg::ANALYSIS_TIMEOUT,
        }
    }
}

/// Counts for a normalization run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub processed: usize,
    pub successful: usize,
    pub errors: usize,
    /// Where the run log went; absent for dry runs and runs with nothing to do
    pub log_path: Option<PathBuf>,
    /// User declined the confirmation prompt
    pub cancelled: bool,
}

/// Counts for a combined check and normalize run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoSummary {
    pub check: CheckSummary,
    pub run: RunSummary,
}

impl AutoSummary {
    pub fn has_errors(&self) -> bool {
        self.check.errors > 0 || self.run.errors > 0
    }
}

fn progress_bar(len: usize, message: &'static str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message);
    pb
}

/// Fails with [`Error::MissingDependency`] unless `ffmpeg -version` runs
pub fn ensure_tool(ffmpeg: &Path) -> Result<(), Error> {
    if ffmpeg::is_available(ffmpeg) {
        Ok(())
    } else {
        Err(Error::MissingDependency(ffmpeg.to_path_buf()))
    }
}

/// Validates check options for correctness
fn validate_check_options(options: &CheckOptions) -> Result<(), Error> {
    let range = &options.range;
    if !(range.min_lufs.is_finite() && range.max_lufs.is_finite()) || range.min_lufs >= range.max_lufs
    {
        return Err(Error::InvalidOptions(format!(
            "Minimum loudness must be below maximum: {} to {} LUFS",
            range.min_lufs, range.max_lufs
        )));
    }
    if !options.folder.exists() {
        return Err(Error::FolderNotFound(options.folder.clone()));
    }
    if !options.folder.is_dir() {
        return Err(Error::NotADirectory(options.folder.clone()));
    }
    Ok(())
}

/// Validates normalization settings for correctness
fn validate_settings(settings: &NormalizeSettings) -> Result<(), Error> {
    for (name, value) in [
        ("target", settings.target_lufs),
        ("true peak", settings.true_peak_db),
        ("LRA", settings.lra),
    ] {
        if !value.is_finite() {
            return Err(Error::InvalidOptions(format!("{name} must be a finite number")));
        }
    }
    if settings.true_peak_db > 0.0 {
        warn!(
            "Target true peak {:.1} dBTP is above 0 dBFS. This will likely cause clipping.",
            settings.true_peak_db
        );
    }
    Ok(())
}

/// `x_backup.mp4` or `x_temp.mp4` sitting next to `x.mp4`, left by in-place runs
fn is_work_artifact(path: &Path) -> bool {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    ["_backup", "_temp"].iter().any(|suffix| {
        stem.strip_suffix(suffix).is_some_and(|original| {
            let name = match path.extension() {
                Some(ext) => format!("{}.{}", original, ext.to_string_lossy()),
                None => original.to_string(),
            };
            path.with_file_name(name).is_file()
        })
    })
}

/// Finds the supported video files directly inside `folder`, sorted by name
pub fn find_video_files(folder: impl AsRef<Path>) -> Result<Vec<PathBuf>, Error> {
    let folder = folder.as_ref();
    if !folder.exists() {
        return Err(Error::FolderNotFound(folder.to_path_buf()));
    }
    if !folder.is_dir() {
        return Err(Error::NotADirectory(folder.to_path_buf()));
    }
    let video_files = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter(|e| VideoFormats::from_path(e.path()).is_some())
        .filter(|e| {
            let artifact = is_work_artifact(e.path());
            if artifact {
                debug!("Skipping work file {:?}", e.path());
            }
            !artifact
        })
        .map(|e| e.into_path())
        .collect();
    Ok(video_files)
}

/// Measures one file with ffmpeg's `loudnorm` summary
pub fn analyze_file(
    path: &Path,
    options: &CheckOptions,
    parser: &dyn LoudnessParser,
) -> Result<Measurement, MeasurementError> {
    if fs::File::open(path).is_err() {
        return Err(MeasurementError::Unreadable);
    }
    let output = ffmpeg::run_with_timeout(
        &options.ffmpeg,
        &ffmpeg::analysis_args(path),
        options.analysis_timeout,
    )?;
    let lufs = measure::to_report_precision(parser.measure(&output.combined())?);
    Ok(Measurement {
        filename: path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned(),
        absolute_path: fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()),
        lufs,
    })
}

/// Analyzes every video in the folder without writing anything.
///
/// Per-file failures become [`FileOutcome::Failed`] entries; only problems
/// with the folder or the tool itself abort the run.
pub fn analyze_folder(options: &CheckOptions) -> Result<Report, Error> {
    validate_check_options(options)?;
    ensure_tool(&options.ffmpeg)?;

    let folder = std::path::absolute(&options.folder).map_err(|e| Error::Io {
        path: options.folder.clone(),
        source: e,
    })?;
    let video_files = find_video_files(&options.folder)?;
    let mut report = Report {
        generated: chrono::Local::now().naive_local(),
        folder,
        range: options.range,
        entries: Vec::with_capacity(video_files.len()),
    };
    if video_files.is_empty() {
        info!(
            "No video files found in {:?} (looking for: {})",
            options.folder,
            VideoFormats::supported_extensions().join(", ")
        );
        return Ok(report);
    }
    info!("Found {} video files to process", video_files.len());

    let parser = LoudnormSummaryParser;
    let total = video_files.len();
    let pb = progress_bar(total, "Analyzing");
    for (idx, path) in video_files.iter().enumerate().progress_with(pb.clone()) {
        let filename = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        info!("Analyzing [{}/{}]: {}", idx + 1, total, filename);
        let outcome = match analyze_file(path, options, &parser) {
            Ok(measurement) => {
                let compliance = options.range.classify(measurement.lufs);
                FileOutcome::Analyzed {
                    measurement,
                    compliance,
                }
            }
            Err(e) => {
                if let MeasurementError::Unparsable { lufs_lines } = &e {
                    for line in lufs_lines {
                        warn!("  Unparsed output: {}", line);
                    }
                }
                error!("  {}: {}", filename, e);
                FileOutcome::Failed {
                    filename,
                    reason: e.to_string(),
                }
            }
        };
        info!("  {}", outcome.render(&options.range).trim());
        report.entries.push(outcome);
    }
    pb.finish_with_message("Analysis done");
    log_check_summary(&report.summary());
    Ok(report)
}

fn log_check_summary(summary: &CheckSummary) {
    info!("=== SUMMARY ===");
    info!("Total files found: {}", summary.total);
    info!("Files successfully analyzed: {}", summary.analyzed);
    info!("Files with errors: {}", summary.errors);
    info!("Files within spec: {}", summary.ok);
    info!(
        "Files out of spec: {} ({} too quiet, {} too loud)",
        summary.out_of_spec(),
        summary.too_quiet,
        summary.too_loud
    );
}

/// Analyzes the folder and writes the report to `report_path`
pub fn check_folder(options: &CheckOptions, report_path: &Path) -> Result<Report, Error> {
    let report = analyze_folder(options)?;
    if report.entries.is_empty() {
        return Ok(report);
    }
    report.save(report_path).map_err(|e| Error::Report {
        path: report_path.to_path_buf(),
        source: e,
    })?;
    info!("Report saved to: {:?}", report_path);
    Ok(report)
}

/// Turns the out-of-spec part of a fresh report into normalization tasks
pub fn tasks_from_report(report: &Report, target_lufs: f64) -> Vec<NormalizationTask> {
    report
        .out_of_spec()
        .map(|(m, c)| {
            NormalizationTask::new(m.filename.clone(), m.lufs, c.status, c.deviation_db, target_lufs)
        })
        .collect()
}

/// Normalizes each task in order, recording the outcome on the task itself,
/// then writes the run log (unless dry-running).
pub fn run_tasks(
    tasks: &mut [NormalizationTask],
    settings: &NormalizeSettings,
    lookup: Lookup<'_>,
    source: String,
) -> Result<RunSummary, Error> {
    let total = tasks.len();
    let pb = progress_bar(total, "Normalizing");
    for (idx, task) in tasks.iter_mut().enumerate().progress_with(pb.clone()) {
        info!("[{}/{}] Processing: {}", idx + 1, total, task.filename);
        match normalize_file(task, settings, lookup) {
            Ok(_) => task.processed = true,
            Err(e) => {
                error!("  ERROR: {}", e);
                task.processed = false;
                task.error = Some(e.to_string());
            }
        }
    }
    pb.finish_with_message("Normalization done");

    let successful = tasks.iter().filter(|t| t.processed).count();
    let mut summary = RunSummary {
        processed: total,
        successful,
        errors: total - successful,
        ..Default::default()
    };

    if !settings.dry_run {
        let log = RunLog {
            generated: chrono::Local::now().naive_local(),
            source,
            settings,
            tasks: &*tasks,
        };
        let path = log.save(&settings.log_dir).map_err(|e| Error::Io {
            path: settings.log_dir.clone(),
            source: e,
        })?;
        info!("Log saved to: {:?}", path);
        summary.log_path = Some(path);
    }

    info!("=== SUMMARY ===");
    info!("Files processed: {}", summary.processed);
    info!("Successful: {}", summary.successful);
    info!("Errors: {}", summary.errors);
    Ok(summary)
}

fn announce(tasks: &[NormalizationTask], settings: &NormalizeSettings) {
    info!("Found {} files to normalize:", tasks.len());
    for task in tasks {
        info!(
            "  {} {} ({:.1} LUFS, {:+.1} dB adjustment needed)",
            task.status, task.filename, task.current_lufs, task.adjustment_needed
        );
    }
    if settings.dry_run {
        info!("[DRY RUN MODE - No files will be modified]");
    }
}

/// Asks `confirm` unless the settings say not to
fn confirmed(
    settings: &NormalizeSettings,
    tasks: &[NormalizationTask],
    confirm: impl FnOnce(&NormalizeSettings, &[NormalizationTask]) -> bool,
) -> bool {
    if settings.dry_run || settings.assume_yes || confirm(settings, tasks) {
        true
    } else {
        info!("Normalization cancelled");
        false
    }
}

/// Normalizes the out-of-spec files listed in an existing report.
///
/// `confirm` is asked once before anything is modified, unless the run is a
/// dry run or `assume_yes` is set.
pub fn normalize_from_report(
    report_path: &Path,
    settings: &NormalizeSettings,
    confirm: impl FnOnce(&NormalizeSettings, &[NormalizationTask]) -> bool,
) -> Result<RunSummary, Error> {
    validate_settings(settings)?;
    ensure_tool(&settings.ffmpeg)?;

    info!("Reading report: {:?}", report_path);
    let parsed = report::read_report(report_path).map_err(|e| Error::Report {
        path: report_path.to_path_buf(),
        source: e,
    })?;
    let mut tasks: Vec<NormalizationTask> = parsed
        .entries
        .iter()
        .map(|entry| NormalizationTask::from_entry(entry, settings.target_lufs))
        .collect();
    if tasks.is_empty() {
        info!("No files found that need normalization");
        return Ok(RunSummary::default());
    }

    announce(&tasks, settings);
    if !confirmed(settings, &tasks, confirm) {
        return Ok(RunSummary {
            cancelled: true,
            ..Default::default()
        });
    }

    let lookup = Lookup {
        source_folder: &parsed.source_folder,
        report_path: Some(report_path),
    };
    run_tasks(
        &mut tasks,
        settings,
        lookup,
        report_path.display().to_string(),
    )
}

/// Checks the folder in memory and normalizes whatever is out of spec.
/// No report file is written.
pub fn auto_normalize_folder(
    options: &CheckOptions,
    settings: &NormalizeSettings,
    confirm: impl FnOnce(&NormalizeSettings, &[NormalizationTask]) -> bool,
) -> Result<AutoSummary, Error> {
    validate_settings(settings)?;
    let report = analyze_folder(options)?;
    let mut summary = AutoSummary {
        check: report.summary(),
        ..Default::default()
    };

    let mut tasks = tasks_from_report(&report, settings.target_lufs);
    if tasks.is_empty() {
        if !report.entries.is_empty() {
            info!("All analyzed files are within spec. Nothing to normalize.");
        }
        return Ok(summary);
    }

    announce(&tasks, settings);
    if !confirmed(settings, &tasks, confirm) {
        summary.run.cancelled = true;
        return Ok(summary);
    }

    let lookup = Lookup {
        source_folder: &report.folder,
        report_path: None,
    };
    summary.run = run_tasks(
        &mut tasks,
        settings,
        lookup,
        format!("auto: {}", report.folder.display()),
    )?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceStatus;

    #[test]
    fn test_video_formats() {
        assert_eq!(VideoFormats::from_path("a/b/clip.MP4"), Some(VideoFormats::Mp4));
        assert_eq!(VideoFormats::from_path("movie.mpeg"), Some(VideoFormats::Mpeg));
        assert_eq!(VideoFormats::from_path("song.flac"), None);
        assert_eq!(VideoFormats::from_path("no_extension"), None);
        assert_eq!(VideoFormats::Webm.to_string(), "webm");
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target(None, None), -18.0);
        assert_eq!(resolve_target(None, Some(Preset::Broadcast)), -24.0);
        assert_eq!(resolve_target(None, Some(Preset::Gaming)), -16.0);
        assert_eq!(resolve_target(None, Some(Preset::Podcast)), -16.0);
        assert_eq!(resolve_target(Some(-14.0), Some(Preset::Broadcast)), -14.0);
    }

    #[test]
    fn test_find_video_files_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mkv", "a.MP4", "notes.txt", "c.webm"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("d.mp4"), b"x").unwrap();
        fs::create_dir_all(dir.path().join("folder.mp4")).unwrap();

        let found: Vec<String> = find_video_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.MP4", "b.mkv", "c.webm"]);
    }

    #[test]
    fn test_backups_next_to_originals_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.mp4", "a_backup.mp4", "b_temp.mp4", "lonely_backup.mp4"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let found: Vec<String> = find_video_files(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found, vec!["a.mp4", "b_temp.mp4", "lonely_backup.mp4"]);
    }

    #[test]
    fn test_find_video_files_folder_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(find_video_files(&missing), Err(Error::FolderNotFound(_))));
        let file = dir.path().join("file.mp4");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(find_video_files(&file), Err(Error::NotADirectory(_))));
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = CheckOptions {
            folder: dir.path().to_path_buf(),
            range: TargetRange {
                min_lufs: -16.0,
                max_lufs: -20.0,
            },
            ..Default::default()
        };
        assert!(matches!(analyze_folder(&options), Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn test_missing_tool_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        let options = CheckOptions {
            folder: dir.path().to_path_buf(),
            ffmpeg: PathBuf::from("/nonexistent/ffmpeg-9f3a"),
            ..Default::default()
        };
        assert!(matches!(analyze_folder(&options), Err(Error::MissingDependency(_))));
    }

    #[test]
    fn test_tasks_from_report() {
        let range = TargetRange::default();
        let outcome = |name: &str, lufs: f64| FileOutcome::Analyzed {
            measurement: Measurement {
                filename: name.to_string(),
                absolute_path: PathBuf::from(name),
                lufs,
            },
            compliance: range.classify(lufs),
        };
        let report = Report {
            generated: chrono::Local::now().naive_local(),
            folder: PathBuf::from("/videos"),
            range,
            entries: vec![outcome("a.mp4", -22.0), outcome("ok.mp4", -18.0), outcome("b.mp4", -14.0)],
        };
        let tasks = tasks_from_report(&report, -18.0);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].filename, "a.mp4");
        assert_eq!(tasks[0].status, ComplianceStatus::TooQuiet);
        assert_eq!(tasks[0].adjustment_needed, 4.0);
        assert_eq!(tasks[1].status, ComplianceStatus::TooLoud);
        assert_eq!(tasks[1].adjustment_needed, -4.0);
    }
}
