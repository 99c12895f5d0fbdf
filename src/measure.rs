use crate::error::MeasurementError;
use log::debug;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;

/// A single loudness reading taken from one file
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub filename: String,
    pub absolute_path: PathBuf,
    pub lufs: f64,
}

/// Turns the raw text printed by a loudness analyzer into an integrated
/// loudness value.
pub trait LoudnessParser {
    fn measure(&self, raw_output: &str) -> Result<f64, MeasurementError>;
}

/// Ordered patterns, most specific first. `Input Integrated` is what
/// ffmpeg's `loudnorm=print_format=summary` prints.
static INTEGRATED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)Input Integrated:\s+([-\d.]+)\s+LUFS",
        r"(?i)I:\s+([-\d.]+)\s+LUFS",
        r"(?i)input.*integrated.*?([-\d.]+)\s*LUFS",
        // Last resort, can misfire on unrelated lines
        r"(?i)(-\d+(?:\.\d+)?)\s*LUFS",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Internal Error: invalid loudness pattern"))
    .collect()
});

static OUTPUT_INTEGRATED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Output Integrated:\s+([-\d.]+)\s+LUFS")
        .expect("Internal Error: invalid loudness pattern")
});

/// Reads the input integrated loudness out of a `loudnorm` summary
#[derive(Debug, Default, Clone, Copy)]
pub struct LoudnormSummaryParser;

impl LoudnessParser for LoudnormSummaryParser {
    fn measure(&self, raw_output: &str) -> Result<f64, MeasurementError> {
        for (idx, pattern) in INTEGRATED_PATTERNS.iter().enumerate() {
            let Some(caps) = pattern.captures(raw_output) else {
                continue;
            };
            match parse_finite(&caps[1]) {
                Some(lufs) => {
                    debug!("Loudness pattern #{} matched: {} LUFS", idx, lufs);
                    return Ok(lufs);
                }
                None => debug!(
                    "Loudness pattern #{} matched unparsable value {:?}",
                    idx, &caps[1]
                ),
            }
        }
        Err(MeasurementError::Unparsable {
            lufs_lines: raw_output
                .lines()
                .filter(|l| l.to_lowercase().contains("lufs"))
                .take(3)
                .map(|l| l.trim().to_string())
                .collect(),
        })
    }
}

/// Extracts the loudness reached after normalization, if the tool printed it
pub fn extract_output_lufs(raw_output: &str) -> Option<f64> {
    OUTPUT_INTEGRATED
        .captures(raw_output)
        .and_then(|caps| parse_finite(&caps[1]))
}

/// Rounds to the one decimal reports are written with, so a file is
/// classified by the value its report line shows
pub fn to_report_precision(lufs: f64) -> f64 {
    (lufs * 10.0).round() / 10.0
}

/// `-inf` and other placeholders count as unparsable
fn parse_finite(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOUDNORM_SUMMARY: &str = "\
[Parsed_loudnorm_0 @ 0x7f8b1c004a80]
Input Integrated:    -24.2 LUFS
Input True Peak:      -3.1 dBTP
Input LRA:             6.4 LU
Input Threshold:     -34.6 LUFS

Output Integrated:   -18.1 LUFS
Output True Peak:     -1.5 dBTP
";

    #[test]
    fn test_loudnorm_summary() {
        let lufs = LoudnormSummaryParser.measure(LOUDNORM_SUMMARY).unwrap();
        assert_eq!(lufs, -24.2);
    }

    #[test]
    fn test_specific_pattern_wins_over_last_resort() {
        let text = "some filter: -30 LUFS\nInput Integrated: -14.0 LUFS\n";
        assert_eq!(LoudnormSummaryParser.measure(text).unwrap(), -14.0);
    }

    #[test]
    fn test_terse_alias() {
        let text = "Summary:\n  Integrated loudness:\n    I:         -19.5 LUFS\n";
        assert_eq!(LoudnormSummaryParser.measure(text).unwrap(), -19.5);
    }

    #[test]
    fn test_loose_scan_is_case_insensitive() {
        let text = "input integrated loudness = -21.7 lufs";
        assert_eq!(LoudnormSummaryParser.measure(text).unwrap(), -21.7);
    }

    #[test]
    fn test_last_resort() {
        let text = "momentary -12.5 LUFS";
        assert_eq!(LoudnormSummaryParser.measure(text).unwrap(), -12.5);
    }

    #[test]
    fn test_malformed_value_falls_through() {
        // First pattern captures "-.-", which is not a number
        let text = "Input Integrated: -.- LUFS\nfallback -23.0 LUFS";
        assert_eq!(LoudnormSummaryParser.measure(text).unwrap(), -23.0);
    }

    #[test]
    fn test_negative_infinity_is_unparsable() {
        let text = "Input Integrated:     -inf LUFS\nInput True Peak: -inf dBTP\n";
        match LoudnormSummaryParser.measure(text) {
            Err(MeasurementError::Unparsable { lufs_lines }) => {
                assert_eq!(lufs_lines, vec!["Input Integrated:     -inf LUFS"]);
            }
            other => panic!("expected Unparsable, got {other:?}"),
        }
    }

    #[test]
    fn test_no_match() {
        let err = LoudnormSummaryParser
            .measure("Stream #0:1: Audio: aac, 48000 Hz, stereo")
            .unwrap_err();
        assert!(matches!(err, MeasurementError::Unparsable { ref lufs_lines } if lufs_lines.is_empty()));
    }

    #[test]
    fn test_output_lufs() {
        assert_eq!(extract_output_lufs(LOUDNORM_SUMMARY), Some(-18.1));
        assert_eq!(extract_output_lufs("Input Integrated: -20 LUFS"), None);
    }

    #[test]
    fn test_report_precision() {
        assert_eq!(to_report_precision(-20.04), -20.0);
        assert_eq!(to_report_precision(-20.06), -20.1);
        assert_eq!(to_report_precision(-14.0), -14.0);
    }
}
