//! Runs commands on this host.

use tokio::process::Command;

use super::CommandRunner;

/// Spawns child processes directly on the local host.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl CommandRunner for LocalRunner {
    fn command(&self, argv: &[&str]) -> Command {
        let mut cmd = Command::new(argv[0]);
        cmd.args(&argv[1..]);
        cmd.kill_on_drop(true);
        cmd
    }

    fn rendered(&self, argv: &[&str]) -> String {
        argv.join(" ")
    }
}
