use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use video_loudness_audit::compliance::{MAX_LUFS, MIN_LUFS, TargetRange};
use video_loudness_audit::normalize::{
    DEFAULT_LRA, DEFAULT_TRUE_PEAK, NormalizationTask, NormalizeSettings, OutputMode,
};
use video_loudness_audit::report::default_report_name;
use video_loudness_audit::{
    CheckOptions, Preset, auto_normalize_folder, check_folder, normalize_from_report,
    resolve_target,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    tool: ToolArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ToolArgs {
    /// ffmpeg executable to use
    #[arg(long, global = true, env = "VIDEO_LOUDNESS_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// seconds allowed for analyzing one file
    #[arg(long, global = true, default_value_t = 300)]
    analysis_timeout: u64,

    /// seconds allowed for normalizing one file
    #[arg(long, global = true, default_value_t = 1800)]
    transcode_timeout: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a folder and write a loudness report
    Check {
        /// folder containing video files
        #[arg(default_value = ".")]
        folder: PathBuf,

        /// report file, default to loudness_report_<timestamp>.txt in the working directory
        #[arg(short, long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        range: RangeArgs,
    },
    /// Normalize the out-of-spec files listed in a loudness report
    Normalize {
        /// loudness report written by `check`
        report: PathBuf,

        #[command(flatten)]
        normalize: NormalizeArgs,
    },
    /// Check a folder, then normalize the out-of-spec files without writing a report
    Auto {
        /// folder containing video files
        #[arg(default_value = ".")]
        folder: PathBuf,

        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        normalize: NormalizeArgs,
    },
}

#[derive(Args)]
struct RangeArgs {
    /// lowest acceptable loudness in LUFS
    #[arg(long, default_value_t = MIN_LUFS, allow_negative_numbers = true)]
    min_lufs: f64,

    /// highest acceptable loudness in LUFS
    #[arg(long, default_value_t = MAX_LUFS, allow_negative_numbers = true)]
    max_lufs: f64,
}

#[derive(Args)]
struct NormalizeArgs {
    /// explicit target LUFS, overrides --preset [default: -18]
    #[arg(short, long, allow_negative_numbers = true)]
    target: Option<f64>,

    /// target preset
    #[arg(long, value_enum)]
    preset: Option<Preset>,

    /// true peak limit in dB
    #[arg(long, visible_alias = "tp", default_value_t = DEFAULT_TRUE_PEAK, allow_negative_numbers = true)]
    true_peak: f64,

    /// loudness range in LU
    #[arg(long, default_value_t = DEFAULT_LRA)]
    lra: f64,

    /// directory to save normalized files, keeping their names
    #[arg(short, long, conflicts_with = "in_place")]
    output_dir: Option<PathBuf>,

    /// replace original files (backup by default)
    #[arg(short, long)]
    in_place: bool,

    /// skip backup when using --in-place
    #[arg(long)]
    no_backup: bool,

    /// show what would be done without touching any file
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// proceed without confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// directory for the normalization log
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

impl NormalizeArgs {
    fn into_settings(self, tool: &ToolArgs) -> NormalizeSettings {
        let mode = if self.in_place {
            OutputMode::InPlace {
                backup: !self.no_backup,
            }
        } else if let Some(dir) = self.output_dir {
            OutputMode::Directory(dir)
        } else {
            OutputMode::Suffixed
        };
        NormalizeSettings {
            target_lufs: resolve_target(self.target, self.preset),
            true_peak_db: self.true_peak,
            lra: self.lra,
            mode,
            dry_run: self.dry_run,
            assume_yes: self.yes,
            ffmpeg: tool.ffmpeg.clone(),
            transcode_timeout: Duration::from_secs(tool.transcode_timeout),
            log_dir: self.log_dir,
        }
    }
}

impl ToolArgs {
    fn check_options(&self, folder: PathBuf, range: &RangeArgs) -> CheckOptions {
        CheckOptions {
            folder,
            range: TargetRange {
                min_lufs: range.min_lufs,
                max_lufs: range.max_lufs,
            },
            ffmpeg: self.ffmpeg.clone(),
            analysis_timeout: Duration::from_secs(self.analysis_timeout),
        }
    }
}

fn confirm_on_stdin(settings: &NormalizeSettings, _tasks: &[NormalizationTask]) -> bool {
    println!("\nNormalization settings:");
    println!("  Target: {} LUFS", settings.target_lufs);
    println!("  True Peak: {} dB", settings.true_peak_db);
    println!("  LRA: {} LU", settings.lra);
    println!("  Output: {}", settings.describe_mode());
    print!("\nProceed with normalization? (y/N): ");
    _ = io::stdout().flush();

    let mut answer = String::new();
    io::stdin().read_line(&mut answer).is_ok() && answer.trim().eq_ignore_ascii_case("y")
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let tool = cli.tool;
    match cli.command {
        Command::Check {
            folder,
            report,
            range,
        } => {
            let options = tool.check_options(folder, &range);
            let report_path = report.unwrap_or_else(|| {
                PathBuf::from(default_report_name(chrono::Local::now().naive_local()))
            });
            let report = check_folder(&options, &report_path)?;
            let summary = report.summary();
            info!("Analysis complete!");
            Ok(exit_code(summary.errors > 0))
        }
        Command::Normalize { report, normalize } => {
            let settings = normalize.into_settings(&tool);
            let summary = normalize_from_report(&report, &settings, confirm_on_stdin)?;
            Ok(exit_code(summary.errors > 0))
        }
        Command::Auto {
            folder,
            range,
            normalize,
        } => {
            let options = tool.check_options(folder, &range);
            let settings = normalize.into_settings(&tool);
            let summary = auto_normalize_folder(&options, &settings, confirm_on_stdin)?;
            info!(
                "Files analyzed: {}, out-of-spec normalized: {}, errors: {}",
                summary.check.analyzed,
                summary.run.successful,
                summary.check.errors + summary.run.errors
            );
            Ok(exit_code(summary.has_errors()))
        }
    }
}

fn main() -> Result<ExitCode> {
    _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .parse_default_env()
        .try_init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => Ok(code),
        Err(e) => {
            error!("{}", e);
            Err(e)
        }
    }
}
