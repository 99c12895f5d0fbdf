use crate::normalize::{NormalizationTask, NormalizeSettings, OutputMode};
use chrono::NaiveDateTime;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Record of one normalization run, written once when the run ends
#[derive(Debug, Clone)]
pub struct RunLog<'a> {
    pub generated: NaiveDateTime,
    /// Report path, or a description of where the tasks came from
    pub source: String,
    pub settings: &'a NormalizeSettings,
    pub tasks: &'a [NormalizationTask],
}

impl RunLog<'_> {
    pub fn successful(&self) -> usize {
        self.tasks.iter().filter(|t| t.processed).count()
    }

    pub fn render(&self) -> String {
        let settings = self.settings;
        let mut out = String::from("=== Video Loudness Normalization Log ===\n");
        _ = writeln!(out, "Generated: {}", self.generated.format("%Y-%m-%d %H:%M:%S"));
        _ = writeln!(out, "Source report: {}", self.source);
        _ = writeln!(out, "Target LUFS: {}", settings.target_lufs);
        _ = writeln!(out, "True Peak: {} dB", settings.true_peak_db);
        _ = writeln!(out, "LRA: {} LU", settings.lra);
        match &settings.mode {
            OutputMode::Directory(dir) => {
                _ = writeln!(out, "Output directory: {}", dir.display());
            }
            OutputMode::InPlace { .. } => out.push_str("Mode: In-place replacement\n"),
            OutputMode::Suffixed => out.push_str("Mode: Create normalized copies\n"),
        }

        let successful = self.successful();
        _ = writeln!(out, "\nFiles processed: {}", self.tasks.len());
        _ = writeln!(out, "Successful: {}", successful);
        _ = writeln!(out, "Errors: {}\n", self.tasks.len() - successful);

        out.push_str("=== Detailed Results ===\n");
        for task in self.tasks {
            _ = writeln!(out, "\nFile: {}", task.filename);
            _ = writeln!(out, "  Original: {:.1} LUFS", task.current_lufs);
            _ = writeln!(out, "  Status: {}", task.status);
            _ = writeln!(out, "  Adjustment: {:+.1} dB", task.adjustment_needed);
            _ = writeln!(out, "  Processed: {}", if task.processed { "Yes" } else { "No" });
            if let Some(error) = &task.error {
                _ = writeln!(out, "  Error: {}", error);
            }
        }
        out
    }

    /// Writes `normalization_log_<timestamp>.txt` into `dir`
    pub fn save(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(format!(
            "normalization_log_{}.txt",
            self.generated.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, self.render())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compliance::ComplianceStatus;
    use chrono::NaiveDate;

    #[test]
    fn test_render_and_save() {
        let mut ok = NormalizationTask::new("a.mp4", -22.0, ComplianceStatus::TooQuiet, 2.0, -18.0);
        ok.processed = true;
        let mut failed = NormalizationTask::new("b.mp4", -14.0, ComplianceStatus::TooLoud, 2.0, -18.0);
        failed.error = Some("Cannot find file \"b.mp4\"".to_string());
        let tasks = vec![ok, failed];
        let settings = NormalizeSettings {
            mode: OutputMode::InPlace { backup: true },
            ..Default::default()
        };
        let log = RunLog {
            generated: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(3, 4, 5)
                .unwrap(),
            source: "/reports/r.txt".to_string(),
            settings: &settings,
            tasks: &tasks,
        };
        let text = log.render();

        assert!(text.contains("Source report: /reports/r.txt\n"));
        assert!(text.contains("Target LUFS: -18\nTrue Peak: -1.5 dB\nLRA: 11 LU\n"));
        assert!(text.contains("Mode: In-place replacement\n"));
        assert!(text.contains("Files processed: 2\nSuccessful: 1\nErrors: 1\n"));
        assert!(text.contains(
            "File: a.mp4\n  Original: -22.0 LUFS\n  Status: TOO_QUIET\n  Adjustment: +4.0 dB\n  Processed: Yes\n"
        ));
        assert!(text.contains("  Adjustment: -4.0 dB\n  Processed: No\n  Error: Cannot find file \"b.mp4\"\n"));

        let dir = tempfile::tempdir().unwrap();
        let path = log.save(dir.path()).unwrap();
        assert_eq!(path, dir.path().join("normalization_log_20240102_030405.txt"));
        assert_eq!(fs::read_to_string(path).unwrap(), text);
    }
}
