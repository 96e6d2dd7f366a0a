//! The real driver, shelling out to the `zfs` utility.

use std::process::{Output, Stdio};

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Child;

use super::{snapshot_name, DatasetKind, ReceiveStream, SendStream, VolumeDriver};
use crate::error::{DriverError, Error, Result};
use crate::runner::CommandRunner;

/// Volume driver over a [`CommandRunner`], so the same code drives the
/// local pool and the remote mirror pool.
pub struct ZfsDriver<R> {
    runner: R,
}

impl<R: CommandRunner> ZfsDriver<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run to completion without checking the exit status.
    async fn raw(&self, argv: &[&str]) -> Result<(Output, String)> {
        let rendered = self.runner.rendered(argv);
        let output = self
            .runner
            .command(argv)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DriverError::spawn(rendered.clone(), e))?;
        Ok((output, rendered))
    }

    /// Run to completion and fail on a non-zero exit.
    async fn checked(&self, argv: &[&str]) -> Result<Output> {
        let (output, rendered) = self.raw(argv).await?;
        if !output.status.success() {
            return Err(DriverError::from_output(rendered, &output).into());
        }
        Ok(output)
    }

    /// Existence probe shared by datasets and snapshots. `zfs list` exits
    /// non-zero for a missing target, with "does not exist" on stderr;
    /// anything else on a non-zero exit is a real failure.
    async fn exists(&self, target: &str, kind: DatasetKind) -> Result<bool> {
        let argv = ["zfs", "list", "-H", "-o", "name", "-t", kind.as_str(), target];
        let (output, rendered) = self.raw(&argv).await?;
        if output.status.success() {
            return Ok(true);
        }
        if String::from_utf8_lossy(&output.stderr).contains("does not exist") {
            return Ok(false);
        }
        Err(DriverError::from_output(rendered, &output).into())
    }

    /// Expand a trailing-`*` root: datasets sharing the parent whose
    /// basename matches the prefix as an anchored regex.
    async fn list_siblings(&self, prefix: &str, kind: DatasetKind) -> Result<Vec<String>> {
        let (parent, stem) = match prefix.rsplit_once('/') {
            Some((parent, stem)) => (Some(parent), stem),
            None => (None, prefix),
        };
        let matcher = Regex::new(&format!("^{}", regex::escape(stem)))
            .map_err(|e| Error::Plan(format!("invalid pattern {prefix:?}: {e}")))?;

        let mut argv = vec!["zfs", "list", "-H", "-o", "name", "-t", kind.as_str()];
        match parent {
            Some(parent) => argv.extend(["-d", "1", parent]),
            None => argv.extend(["-d", "0"]),
        }
        let output = self.checked(&argv).await?;
        Ok(lines(&output.stdout)
            .into_iter()
            .filter(|name| {
                let basename = name.rsplit('/').next().unwrap_or(name);
                parent != Some(name.as_str()) && matcher.is_match(basename)
            })
            .collect())
    }
}

#[async_trait]
impl<R: CommandRunner> VolumeDriver for ZfsDriver<R> {
    async fn list_datasets(
        &self,
        root: &str,
        kind: DatasetKind,
        recursive: bool,
    ) -> Result<Vec<String>> {
        if let Some(prefix) = root.strip_suffix('*') {
            return self.list_siblings(prefix, kind).await;
        }
        let mut argv = vec!["zfs", "list", "-H", "-o", "name", "-t", kind.as_str()];
        if recursive {
            argv.push("-r");
        }
        if !root.is_empty() {
            argv.push(root);
        }
        let output = self.checked(&argv).await?;
        Ok(lines(&output.stdout))
    }

    async fn exists_dataset(&self, name: &str) -> Result<bool> {
        self.exists(name, DatasetKind::Filesystem).await
    }

    async fn exists_snapshot(&self, dataset: &str, label: &str) -> Result<bool> {
        self.exists(&snapshot_name(dataset, label), DatasetKind::Snapshot)
            .await
    }

    async fn create_dataset(&self, name: &str) -> Result<()> {
        self.checked(&["zfs", "create", name]).await.map(|_| ())
    }

    async fn create_snapshot(&self, dataset: &str, label: &str) -> Result<()> {
        self.checked(&["zfs", "snapshot", &snapshot_name(dataset, label)])
            .await
            .map(|_| ())
    }

    async fn rename_snapshot(&self, dataset: &str, old: &str, new: &str) -> Result<()> {
        self.checked(&[
            "zfs",
            "rename",
            &snapshot_name(dataset, old),
            &snapshot_name(dataset, new),
        ])
        .await
        .map(|_| ())
    }

    async fn destroy(&self, target: &str) -> Result<()> {
        self.checked(&["zfs", "destroy", target]).await.map(|_| ())
    }

    async fn set_property(&self, target: &str, key: &str, value: &str) -> Result<()> {
        self.checked(&["zfs", "set", &format!("{key}={value}"), target])
            .await
            .map(|_| ())
    }

    async fn get_property(&self, target: &str, key: &str) -> Result<String> {
        let output = self
            .checked(&["zfs", "get", "-H", "-o", "value", key, target])
            .await?;
        Ok(lines(&output.stdout).into_iter().next().unwrap_or_default())
    }

    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let output = self
            .checked(&[
                "zfs", "list", "-H", "-o", "name", "-t", "snapshot", "-d", "1", dataset,
            ])
            .await?;
        Ok(lines(&output.stdout))
    }

    async fn most_recent_tagged(&self, dataset: &str, tag_key: &str) -> Result<String> {
        let output = self
            .checked(&[
                "zfs", "get", "-H", "-t", "snapshot", "-d", "1", "-o", "name,value", tag_key,
                dataset,
            ])
            .await?;
        lines(&output.stdout)
            .into_iter()
            .filter_map(|line| {
                let (name, value) = line.split_once('\t')?;
                (value.trim() == "true").then(|| name.to_string())
            })
            .max()
            .ok_or_else(|| Error::NoTaggedSnapshot(dataset.to_string()))
    }

    async fn open_send(
        &self,
        dataset: &str,
        base_label: &str,
        incr_label: Option<&str>,
    ) -> Result<SendStream> {
        let base = snapshot_name(dataset, base_label);
        let incr;
        let mut argv = vec!["zfs", "send"];
        match incr_label {
            Some(label) => {
                incr = snapshot_name(dataset, label);
                argv.extend(["-i", base.as_str(), incr.as_str()]);
            }
            None => argv.push(base.as_str()),
        }

        let rendered = self.runner.rendered(&argv);
        let mut child = self
            .runner
            .command(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::spawn(rendered.clone(), e))?;
        let reader = child
            .stdout
            .take()
            .ok_or_else(|| Error::Stream(format!("`{rendered}`: no stdout handle")))?;
        Ok(SendStream::new(reader, await_child(child, rendered)))
    }

    async fn open_receive(&self, dataset: &str, new_label: &str) -> Result<ReceiveStream> {
        let argv = ["zfs", "receive", &snapshot_name(dataset, new_label)];
        let rendered = self.runner.rendered(&argv);
        let mut child = self
            .runner
            .command(&argv)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DriverError::spawn(rendered.clone(), e))?;
        let writer = child
            .stdin
            .take()
            .ok_or_else(|| Error::Stream(format!("`{rendered}`: no stdin handle")))?;
        Ok(ReceiveStream::new(writer, await_child(child, rendered)))
    }
}

/// Await a send/receive child; a non-zero exit is a stream failure
/// carrying whatever the process left on stderr.
async fn await_child(child: Child, rendered: String) -> Result<()> {
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Error::Stream(format!("`{rendered}`: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Stream(format!(
            "`{rendered}` exited with {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }
    Ok(())
}

fn lines(stdout: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}
