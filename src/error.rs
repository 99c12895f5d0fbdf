use std::{path::PathBuf, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("Failed to start {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Tool exited with {}", describe_exit(.code))]
    Failed { code: Option<i32>, stderr: String },
    #[error("Tool timed out after {} seconds", .0.as_secs())]
    TimedOut(Duration),
    #[error("I/O error while waiting for tool: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum MeasurementError {
    #[error("File not readable")]
    Unreadable,
    #[error("Could not extract LUFS value from tool output")]
    Unparsable {
        /// Raw output lines that mention LUFS, kept for diagnosis
        lufs_lines: Vec<String>,
    },
    #[error("Analysis failed: {0}")]
    Tool(#[from] ToolError),
}

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Report lists {0:?} more than once")]
    DuplicateEntry(String),
}

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("Cannot find file {0:?}")]
    FileNotFound(String),
    #[error("Output {0:?} would overwrite its own input")]
    OutputIsInput(PathBuf),
    #[error("Normalization failed: {0}")]
    Tool(#[from] ToolError),
    #[error("Failed to create backup {path:?}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to replace original file {path:?}: {source}")]
    Replace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0:?} is not installed or not runnable")]
    MissingDependency(PathBuf),
    #[error("Folder {0:?} does not exist")]
    FolderNotFound(PathBuf),
    #[error("{0:?} is not a directory")]
    NotADirectory(PathBuf),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
    #[error("Report {path:?} could not be used: {source}")]
    Report {
        path: PathBuf,
        #[source]
        source: ReportError,
    },
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {c}"),
        None => "a signal".to_string(),
    }
}
