use strum_macros::Display;

/// Lower bound of the default acceptable range (podcast/dialogue)
pub const MIN_LUFS: f64 = -20.0;
/// Upper bound of the default acceptable range (podcast/dialogue)
pub const MAX_LUFS: f64 = -16.0;

/// Where a measurement falls relative to the acceptable range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ComplianceStatus {
    Ok,
    TooQuiet,
    TooLoud,
}

/// Inclusive loudness range a file must fall into to be left alone
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetRange {
    pub min_lufs: f64,
    pub max_lufs: f64,
}

impl Default for TargetRange {
    fn default() -> Self {
        TargetRange {
            min_lufs: MIN_LUFS,
            max_lufs: MAX_LUFS,
        }
    }
}

impl TargetRange {
    #[inline]
    pub fn classify(&self, lufs: f64) -> ComplianceResult {
        classify(lufs, self.min_lufs, self.max_lufs)
    }
}

/// Outcome of comparing one measurement against a [`TargetRange`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComplianceResult {
    pub status: ComplianceStatus,
    /// Distance to the nearest bound in dB, zero when within range
    pub deviation_db: f64,
}

impl ComplianceResult {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == ComplianceStatus::Ok
    }
}

/// Classifies an integrated loudness value against `[min_lufs, max_lufs]`.
///
/// Both bounds are inclusive.
pub fn classify(lufs: f64, min_lufs: f64, max_lufs: f64) -> ComplianceResult {
    if lufs < min_lufs {
        ComplianceResult {
            status: ComplianceStatus::TooQuiet,
            deviation_db: min_lufs - lufs,
        }
    } else if lufs > max_lufs {
        ComplianceResult {
            status: ComplianceStatus::TooLoud,
            deviation_db: lufs - max_lufs,
        }
    } else {
        ComplianceResult {
            status: ComplianceStatus::Ok,
            deviation_db: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_inclusive() {
        assert_eq!(classify(-20.0, MIN_LUFS, MAX_LUFS).status, ComplianceStatus::Ok);
        assert_eq!(classify(-16.0, MIN_LUFS, MAX_LUFS).status, ComplianceStatus::Ok);
        assert_eq!(classify(-18.0, MIN_LUFS, MAX_LUFS).deviation_db, 0.0);
    }

    #[test]
    fn test_just_outside_range() {
        let quiet = classify(-20.1, MIN_LUFS, MAX_LUFS);
        assert_eq!(quiet.status, ComplianceStatus::TooQuiet);
        assert!((quiet.deviation_db - 0.1).abs() < 1e-9);

        let loud = classify(-15.9, MIN_LUFS, MAX_LUFS);
        assert_eq!(loud.status, ComplianceStatus::TooLoud);
        assert!((loud.deviation_db - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_deviation_nonzero_iff_out_of_range() {
        let range = TargetRange::default();
        let mut lufs = -40.0;
        while lufs <= 0.0 {
            let result = range.classify(lufs);
            assert!(result.deviation_db >= 0.0);
            assert_eq!(result.is_ok(), (MIN_LUFS..=MAX_LUFS).contains(&lufs));
            assert_eq!(result.deviation_db > 0.0, !result.is_ok(), "at {lufs}");
            lufs += 0.25;
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ComplianceStatus::TooQuiet.to_string(), "TOO_QUIET");
        assert_eq!(ComplianceStatus::TooLoud.to_string(), "TOO_LOUD");
        assert_eq!(ComplianceStatus::Ok.to_string(), "OK");
    }
}
