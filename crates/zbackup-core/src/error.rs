//! Error types for the zbackup core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the zbackup library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error, fatal before any task starts
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid backup section; it is skipped, the run continues
    #[error("invalid backup spec: {0}")]
    Plan(String),

    /// A volume-manager command failed
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// A remote snapshot with this run's timestamp label already exists
    #[error("{snapshot} already exists, wait next minute and run again")]
    SnapshotExists { snapshot: String },

    /// The send or receive side of a replication stream failed
    #[error("stream error: {0}")]
    Stream(String),

    /// No snapshot carrying the ownership tag was found
    #[error("no tagged snapshot on {0}")]
    NoTaggedSnapshot(String),

    /// Another instance holds the pidfile
    #[error("pidfile error: {0}")]
    Pidfile(String),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a volume-manager command.
///
/// Carries the rendered command line, the captured stderr, and the exit
/// code (`None` when the process was killed by a signal or never started).
#[derive(Error, Debug)]
#[error("command `{command}` failed with status {code:?}: {stderr}")]
pub struct DriverError {
    pub command: String,
    pub stderr: String,
    pub code: Option<i32>,
}

impl DriverError {
    /// Build from a finished process that exited non-zero.
    pub fn from_output(command: impl Into<String>, output: &std::process::Output) -> Self {
        Self {
            command: command.into(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            code: output.status.code(),
        }
    }

    /// Build from a process that could not be spawned at all.
    pub fn spawn(command: impl Into<String>, err: std::io::Error) -> Self {
        Self {
            command: command.into(),
            stderr: err.to_string(),
            code: None,
        }
    }

    /// Build for a condition detected without a child process, such as a
    /// missing target in the in-memory driver.
    pub fn other(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stderr: stderr.into(),
            code: None,
        }
    }
}
