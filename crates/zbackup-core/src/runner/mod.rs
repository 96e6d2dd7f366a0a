//! Command execution on the local host or on the backup target.
//!
//! A [`CommandRunner`] only *builds* commands; the volume driver decides how
//! to wire stdio and whether to await or stream.

mod local;
mod ssh;

pub use local::LocalRunner;
pub use ssh::SshRunner;

use tokio::process::Command;

/// Builds commands bound to one execution locus.
pub trait CommandRunner: Send + Sync {
    /// Prepare a command for the given argv without spawning it.
    ///
    /// `argv` must be non-empty.
    fn command(&self, argv: &[&str]) -> Command;

    /// Human-readable rendering of argv, for logs and errors.
    fn rendered(&self, argv: &[&str]) -> String;
}
