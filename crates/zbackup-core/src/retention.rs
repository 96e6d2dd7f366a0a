//! Retention: expiring old tagged snapshots on the remote.

use std::time::Duration;

use chrono::{Local, NaiveDateTime, TimeZone};
use tracing::{debug, error, info};

use crate::driver::VolumeDriver;
use crate::env::{Env, TIME_FORMAT};
use crate::error::{Error, Result};

/// What to do with aged remote snapshots after a successful backup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// Keep everything
    #[default]
    None,
    /// Keep only the most recent tagged snapshot
    LastOne,
    /// Keep tagged snapshots younger than the duration
    MaxAge(Duration),
}

impl RetentionPolicy {
    /// Parse the config form: empty, `lastone`, or a duration like `24h`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "" => Ok(Self::None),
            "lastone" => Ok(Self::LastOne),
            other => humantime::parse_duration(other)
                .map(Self::MaxAge)
                .map_err(|e| Error::Plan(format!("invalid expire {other:?}: {e}"))),
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::None
    }
}

/// Destroy expired tagged snapshots of `dst` per `policy`.
///
/// Only snapshots carrying the tag are considered; the most recent tagged
/// snapshot survives `lastone`, and a lone snapshot is never destroyed.
/// Individual destroy failures are logged and skipped.
pub async fn prune(
    driver: &dyn VolumeDriver,
    dst: &str,
    policy: &RetentionPolicy,
    env: &Env,
    task_id: usize,
) -> Result<()> {
    debug!("[{task_id}]: cleaning expired snapshots, policy {policy:?}");
    if policy.is_none() {
        info!("[{task_id}]: expire is not set, nothing to delete");
        return Ok(());
    }

    let recent = driver
        .most_recent_tagged(dst, crate::driver::TAG_PROPERTY)
        .await?;

    let all = driver.list_snapshots(dst).await?;
    if all.len() == 1 {
        info!("[{task_id}]: only one snapshot, nothing to delete");
        return Ok(());
    }

    for snap in &all {
        if driver.get_property(snap, crate::driver::TAG_PROPERTY).await? != "true" {
            debug!("[{task_id}]: {snap} is not ours, skipping");
            continue;
        }
        let expired = match policy {
            RetentionPolicy::None => false,
            RetentionPolicy::LastOne => snap != &recent,
            RetentionPolicy::MaxAge(max_age) => {
                match label_time(snap) {
                    Some(taken) => {
                        let age = env
                            .clock
                            .now()
                            .signed_duration_since(taken)
                            .to_std()
                            .unwrap_or_default();
                        age > *max_age
                    }
                    None => {
                        debug!("[{task_id}]: {snap} has no timestamp label, skipping");
                        false
                    }
                }
            }
        };
        if !expired {
            debug!("[{task_id}]: {snap} not expired, skipping");
            continue;
        }
        debug!("[{task_id}]: destroying {snap}");
        if let Err(e) = driver.destroy(snap).await {
            error!("[{task_id}]: error destroying {snap}: {e}");
        }
    }
    Ok(())
}

/// Parse the label after `@` as a local wall-clock timestamp.
fn label_time(snapshot: &str) -> Option<chrono::DateTime<Local>> {
    let label = snapshot.split('@').nth(1)?;
    let naive = NaiveDateTime::parse_from_str(label, TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}
