//! Per-dataset backup task: the state machine coordinating both hosts.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::driver::{snapshot_name, VolumeDriver, TAG_PROPERTY};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::retention::{self, RetentionPolicy};

pub const SNAP_CURR_PREFIX: &str = "zbackup_curr_";
pub const SNAP_NEW_PREFIX: &str = "zbackup_new_";

/// Sentinel labels computed per task from the invocation suffix.
///
/// `curr` marks the last replicated state and is the base of the next
/// incremental send; `new` exists only while an incremental run is in
/// flight and becomes `curr` on success.
#[derive(Debug, Clone)]
pub struct SentinelLabels {
    pub curr: String,
    pub new: String,
}

impl SentinelLabels {
    pub fn new(suffix: &str) -> Self {
        Self {
            curr: format!("{SNAP_CURR_PREFIX}{suffix}"),
            new: format!("{SNAP_NEW_PREFIX}{suffix}"),
        }
    }
}

/// One source dataset replicated to one remote destination.
///
/// Immutable once constructed; [`run`](BackupTask::run) is single-shot,
/// retries are the caller's business.
pub struct BackupTask {
    id: usize,
    src: String,
    dst: String,
    dst_root: String,
    policy: RetentionPolicy,
    labels: SentinelLabels,
    local: Arc<dyn VolumeDriver>,
    remote: Arc<dyn VolumeDriver>,
    env: Env,
}

impl BackupTask {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        src: impl Into<String>,
        dst: impl Into<String>,
        dst_root: impl Into<String>,
        policy: RetentionPolicy,
        labels: SentinelLabels,
        local: Arc<dyn VolumeDriver>,
        remote: Arc<dyn VolumeDriver>,
        env: Env,
    ) -> Self {
        Self {
            id,
            src: src.into(),
            dst: dst.into(),
            dst_root: dst_root.into(),
            policy,
            labels,
            local,
            remote,
            env,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn dst(&self) -> &str {
        &self.dst
    }

    /// Drive the full cycle: precheck, snapshot, stream, rotate, tag,
    /// prune. Strictly sequential; any failure aborts this task only.
    pub async fn run(&self) -> Result<()> {
        let id = self.id;
        let ts_label = self.env.timestamp_label();

        // PreCheck: a destination snapshot from the same minute means a
        // previous run is still within this label's resolution.
        debug!("[{id}]: check {} exists", snapshot_name(&self.dst, &ts_label));
        if self.remote.exists_snapshot(&self.dst, &ts_label).await? {
            return Err(Error::SnapshotExists {
                snapshot: snapshot_name(&self.dst, &ts_label),
            });
        }

        // DecideMode: an existing @curr sentinel selects incremental mode.
        debug!("[{id}]: check {} exists", snapshot_name(&self.src, &self.labels.curr));
        let mut have_curr = self.local.exists_snapshot(&self.src, &self.labels.curr).await?;
        if !have_curr && self.local.exists_snapshot(&self.src, &self.labels.new).await? {
            // A run died between destroying @curr and renaming @new. The
            // lingering @new is the last replicated state; promote it
            // instead of falling back to an expensive full send.
            warn!(
                "[{id}]: promoting lingering {} to {}",
                snapshot_name(&self.src, &self.labels.new),
                self.labels.curr
            );
            self.local
                .rename_snapshot(&self.src, &self.labels.new, &self.labels.curr)
                .await?;
            have_curr = true;
        }
        let incremental = have_curr;

        // Snapshot: @curr on a first run, @new on an incremental one.
        let new_label = if incremental {
            if self.local.exists_snapshot(&self.src, &self.labels.new).await? {
                // Leftover from a run that failed mid-stream; its delta
                // was never committed remotely, so recapture it.
                warn!(
                    "[{id}]: destroying stale {}",
                    snapshot_name(&self.src, &self.labels.new)
                );
                self.local
                    .destroy(&snapshot_name(&self.src, &self.labels.new))
                    .await?;
            }
            &self.labels.new
        } else {
            &self.labels.curr
        };
        debug!("[{id}]: create snapshot {}", snapshot_name(&self.src, new_label));
        self.local.create_snapshot(&self.src, new_label).await?;

        // EnsureRemoteRoot
        debug!("[{id}]: check {} exists", self.dst_root);
        if !self.remote.exists_dataset(&self.dst_root).await? {
            self.remote.create_dataset(&self.dst_root).await?;
        }

        // Stream
        self.stream(&ts_label, incremental).await?;

        // Rotate (incremental only): @curr is superseded by @new.
        if incremental {
            debug!("[{id}]: rotate sentinels (destroy @curr, rename @new to @curr)");
            self.local
                .destroy(&snapshot_name(&self.src, &self.labels.curr))
                .await?;
            self.local
                .rename_snapshot(&self.src, &self.labels.new, &self.labels.curr)
                .await?;
        }

        // Tag: readonly on the dataset, ownership tag on the snapshot. An
        // untagged remote snapshot would be invisible to retention.
        debug!("[{id}]: set {} readonly", self.dst);
        self.remote.set_property(&self.dst, "readonly", "on").await?;
        debug!("[{id}]: tag {}", snapshot_name(&self.dst, &ts_label));
        self.remote
            .set_property(&snapshot_name(&self.dst, &ts_label), TAG_PROPERTY, "true")
            .await?;

        // Prune
        retention::prune(self.remote.as_ref(), &self.dst, &self.policy, &self.env, id).await
    }

    /// Couple the local send process to the remote receive process and
    /// await both; a short receive must not look like success.
    async fn stream(&self, ts_label: &str, incremental: bool) -> Result<()> {
        let id = self.id;
        debug!("[{id}]: start receive on remote {}", self.dst);
        let receive = self.remote.open_receive(&self.dst, ts_label).await?;

        debug!("[{id}]: start send from {}", self.src);
        let incr_label = incremental.then_some(self.labels.new.as_str());
        let send = self
            .local
            .open_send(&self.src, &self.labels.curr, incr_label)
            .await?;

        let (mut reader, send_done) = send.into_parts();
        let (mut writer, recv_done) = receive.into_parts();
        let copied = tokio::io::copy(&mut reader, &mut writer)
            .await
            .map_err(|e| Error::Stream(format!("copying {} to {}: {e}", self.src, self.dst)))?;
        writer
            .shutdown()
            .await
            .map_err(|e| Error::Stream(format!("closing stream to {}: {e}", self.dst)))?;
        drop(writer);
        drop(reader);

        send_done.await?;
        recv_done.await?;
        debug!("[{id}]: streamed {copied} bytes to {}", self.dst);
        Ok(())
    }
}
