//! Text loudness report.
//!
//! A [`Report`] is the structured result of a check run. [`Report::render`]
//! produces the durable text document and [`parse_report`] reads the
//! out-of-spec entries back from that text. The per-entry line shapes are
//! relied upon by other tools and must stay stable.

use crate::compliance::{ComplianceResult, ComplianceStatus, TargetRange};
use crate::error::ReportError;
use crate::measure::Measurement;
use chrono::NaiveDateTime;
use log::warn;
use regex::Regex;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const REPORT_TITLE: &str = "=== Video Loudness Analysis Report ===";
pub const SUMMARY_TITLE: &str = "=== SUMMARY ===";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static ENTRY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^TOO (QUIET|LOUD): (.+?)\r?\n\s+Current: ([-\d.]+) LUFS.*?Deviation: ([\d.]+) dB (quieter|louder)",
    )
    .expect("Internal Error: invalid report pattern")
});

static FOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Folder: (.+?)\r?$").expect("Internal Error: invalid report pattern")
});

static RANGE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^Target Range: ([-\d.]+) to ([-\d.]+) LUFS")
        .expect("Internal Error: invalid report pattern")
});

/// Result of checking one file
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Analyzed {
        measurement: Measurement,
        compliance: ComplianceResult,
    },
    Failed {
        filename: String,
        reason: String,
    },
}

impl FileOutcome {
    pub fn filename(&self) -> &str {
        match self {
            FileOutcome::Analyzed { measurement, .. } => &measurement.filename,
            FileOutcome::Failed { filename, .. } => filename,
        }
    }

    /// Renders the report lines for this outcome
    pub fn render(&self, range: &TargetRange) -> String {
        match self {
            FileOutcome::Analyzed {
                measurement,
                compliance,
            } => {
                let (label, direction) = match compliance.status {
                    ComplianceStatus::Ok => {
                        return format!(
                            "OK: {} ({:.1} LUFS)\n",
                            measurement.filename, measurement.lufs
                        );
                    }
                    ComplianceStatus::TooQuiet => ("TOO QUIET", "quieter"),
                    ComplianceStatus::TooLoud => ("TOO LOUD", "louder"),
                };
                format!(
                    "{}: {}\n  Current: {:.1} LUFS | Target: {} to {} LUFS | Deviation: {:.1} dB {}\n\n",
                    label,
                    measurement.filename,
                    measurement.lufs,
                    range.min_lufs,
                    range.max_lufs,
                    compliance.deviation_db,
                    direction
                )
            }
            FileOutcome::Failed { filename, reason } => format!("ERROR: {filename} - {reason}\n"),
        }
    }
}

/// Counts shown at the bottom of a report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckSummary {
    pub total: usize,
    pub analyzed: usize,
    pub errors: usize,
    pub ok: usize,
    pub too_quiet: usize,
    pub too_loud: usize,
}

impl CheckSummary {
    #[inline]
    pub fn out_of_spec(&self) -> usize {
        self.too_quiet + self.too_loud
    }

    pub fn record(&mut self, outcome: &FileOutcome) {
        self.total += 1;
        match outcome {
            FileOutcome::Failed { .. } => self.errors += 1,
            FileOutcome::Analyzed { compliance, .. } => {
                self.analyzed += 1;
                match compliance.status {
                    ComplianceStatus::Ok => self.ok += 1,
                    ComplianceStatus::TooQuiet => self.too_quiet += 1,
                    ComplianceStatus::TooLoud => self.too_loud += 1,
                }
            }
        }
    }
}

/// Everything a check run found, in enumeration order
#[derive(Debug, Clone)]
pub struct Report {
    pub generated: NaiveDateTime,
    /// Absolute path of the analyzed folder
    pub folder: PathBuf,
    pub range: TargetRange,
    pub entries: Vec<FileOutcome>,
}

impl Report {
    pub fn summary(&self) -> CheckSummary {
        let mut summary = CheckSummary::default();
        for entry in &self.entries {
            summary.record(entry);
        }
        summary
    }

    /// Files that fall outside the range
    pub fn out_of_spec(&self) -> impl Iterator<Item = (&Measurement, &ComplianceResult)> {
        self.entries.iter().filter_map(|e| match e {
            FileOutcome::Analyzed {
                measurement,
                compliance,
            } if !compliance.is_ok() => Some((measurement, compliance)),
            _ => None,
        })
    }

    pub fn render(&self) -> String {
        let range = &self.range;
        let mut out = String::new();
        out.push_str(REPORT_TITLE);
        out.push('\n');
        _ = writeln!(out, "Generated: {}", self.generated.format(TIMESTAMP_FORMAT));
        _ = writeln!(out, "Folder: {}", self.folder.display());
        _ = write!(out, "Target Range: {} to {} LUFS", range.min_lufs, range.max_lufs);
        if *range == TargetRange::default() {
            out.push_str(" (podcast/dialogue)");
        }
        out.push_str("\n\n");
        _ = writeln!(out, "Found {} video files to process\n", self.entries.len());

        for entry in &self.entries {
            out.push_str(&entry.render(range));
        }

        let summary = self.summary();
        out.push('\n');
        out.push_str(SUMMARY_TITLE);
        out.push('\n');
        _ = writeln!(out, "Total files found: {}", summary.total);
        _ = writeln!(out, "Files successfully analyzed: {}", summary.analyzed);
        _ = writeln!(out, "Files with errors: {}", summary.errors);
        _ = writeln!(
            out,
            "Files within spec ({} to {} LUFS): {}",
            range.min_lufs, range.max_lufs, summary.ok
        );
        _ = writeln!(out, "Files out of spec: {}", summary.out_of_spec());
        _ = writeln!(out, "  - Too quiet (< {} LUFS): {}", range.min_lufs, summary.too_quiet);
        _ = writeln!(out, "  - Too loud (> {} LUFS): {}", range.max_lufs, summary.too_loud);
        if summary.out_of_spec() > 0 {
            out.push_str("\nConsider normalizing out-of-spec files using:\n");
            out.push_str("ffmpeg -i input.mp4 -af loudnorm=I=-18:TP=-1.5:LRA=11 output.mp4\n");
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        fs::write(path, self.render())?;
        Ok(())
    }
}

/// An out-of-spec entry read back from a report
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    pub filename: String,
    pub current_lufs: f64,
    pub status: ComplianceStatus,
    pub deviation_db: f64,
}

/// What a normalization run needs from a report
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReport {
    /// Folder recorded in the header, or the report's own directory
    pub source_folder: PathBuf,
    pub range: Option<TargetRange>,
    pub entries: Vec<ReportEntry>,
}

/// Parses report text. OK and ERROR entries are skipped on purpose, only
/// out-of-spec files are normalization candidates.
pub fn parse_report(text: &str, report_path: &Path) -> Result<ParsedReport, ReportError> {
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for caps in ENTRY_PATTERN.captures_iter(text) {
        let filename = caps[2].to_string();
        let status = match (&caps[1], &caps[5]) {
            ("QUIET", "quieter") => ComplianceStatus::TooQuiet,
            ("LOUD", "louder") => ComplianceStatus::TooLoud,
            (label, direction) => {
                warn!(
                    "Skipping {:?}: TOO {} entry says {}",
                    filename, label, direction
                );
                continue;
            }
        };
        let (Ok(current_lufs), Ok(deviation_db)) = (caps[3].parse::<f64>(), caps[4].parse::<f64>())
        else {
            warn!("Skipping {:?}: unreadable numbers in report entry", filename);
            continue;
        };
        if !seen.insert(filename.clone()) {
            return Err(ReportError::DuplicateEntry(filename));
        }
        entries.push(ReportEntry {
            filename,
            current_lufs,
            status,
            deviation_db,
        });
    }

    let source_folder = FOLDER_PATTERN
        .captures(text)
        .map(|caps| PathBuf::from(caps[1].trim()))
        .unwrap_or_else(|| report_path.parent().unwrap_or(Path::new("")).to_path_buf());

    let range = RANGE_PATTERN.captures(text).and_then(|caps| {
        Some(TargetRange {
            min_lufs: caps[1].parse().ok()?,
            max_lufs: caps[2].parse().ok()?,
        })
    });

    Ok(ParsedReport {
        source_folder,
        range,
        entries,
    })
}

/// Reads and parses a report file
pub fn read_report(path: &Path) -> Result<ParsedReport, ReportError> {
    let text = fs::read_to_string(path)?;
    parse_report(&text, path)
}

/// `loudness_report_<timestamp>.txt`
pub fn default_report_name(now: NaiveDateTime) -> String {
    format!("loudness_report_{}.txt", now.format("%Y%m%d_%H%M%S"))
}
