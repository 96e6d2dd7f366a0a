//! Runs commands on the backup target over a key-authenticated channel.

use tokio::process::Command;

use super::CommandRunner;

/// Wraps commands in `ssh` invocations against `user@host`.
///
/// A control master multiplexes the concurrent sessions of parallel tasks
/// over one TCP connection; each command still runs in its own session, so
/// one failed session does not take down its peers.
#[derive(Debug, Clone)]
pub struct SshRunner {
    user: String,
    host: String,
    port: Option<u16>,
    key: String,
}

impl SshRunner {
    /// `host` is `hostname` or `hostname:port`.
    pub fn new(user: &str, host: &str, key: &str) -> Self {
        let (host, port) = match host.rsplit_once(':') {
            Some((name, port)) => match port.parse() {
                Ok(port) => (name.to_string(), Some(port)),
                Err(_) => (host.to_string(), None),
            },
            None => (host.to_string(), None),
        };
        Self {
            user: user.to_string(),
            host,
            port,
            key: key.to_string(),
        }
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.key.clone(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            "ControlPath=/tmp/zbackup-ssh-%r@%h:%p".to_string(),
            "-o".to_string(),
            "ControlPersist=60".to_string(),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args
    }
}

impl CommandRunner for SshRunner {
    fn command(&self, argv: &[&str]) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args());
        cmd.arg(argv.join(" "));
        cmd.kill_on_drop(true);
        cmd
    }

    fn rendered(&self, argv: &[&str]) -> String {
        format!("ssh {}@{} {}", self.user, self.host, argv.join(" "))
    }
}
