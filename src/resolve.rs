use log::debug;
use std::path::{Path, PathBuf};

/// Locates a file named in a report.
///
/// Looks in `source_folder` first, then relative to the working directory,
/// then next to the report itself. Returns `None` when all three miss.
pub fn resolve_file(
    filename: &str,
    source_folder: &Path,
    report_path: Option<&Path>,
) -> Option<PathBuf> {
    let report_dir = report_path.map(|p| p.parent().unwrap_or_else(|| Path::new("")));
    let candidates = [
        Some(source_folder.join(filename)),
        Some(PathBuf::from(filename)),
        report_dir.map(|dir| dir.join(filename)),
    ];
    for candidate in candidates.into_iter().flatten() {
        if candidate.is_file() {
            return Some(candidate);
        }
        debug!("{:?} not found at {:?}", filename, candidate);
    }
    None
}
