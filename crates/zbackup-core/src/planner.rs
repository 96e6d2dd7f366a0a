//! Expands backup specs into a flat list of independent tasks.

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::BackupSpec;
use crate::driver::{DatasetKind, VolumeDriver};
use crate::env::Env;
use crate::error::Result;
use crate::retention::RetentionPolicy;
use crate::task::{BackupTask, SentinelLabels};

/// Turns configuration into [`BackupTask`]s, one per discovered source
/// dataset. Invalid specs are skipped with an error log; a broken spec
/// never takes the run down.
pub struct TaskPlanner {
    env: Env,
    local: Arc<dyn VolumeDriver>,
    remote: Arc<dyn VolumeDriver>,
    labels: SentinelLabels,
}

impl TaskPlanner {
    pub fn new(
        env: Env,
        local: Arc<dyn VolumeDriver>,
        remote: Arc<dyn VolumeDriver>,
        snap_suffix: &str,
    ) -> Self {
        Self {
            env,
            local,
            remote,
            labels: SentinelLabels::new(snap_suffix),
        }
    }

    /// Expand every spec; task ids are dense across all specs.
    pub async fn plan(&self, specs: &[BackupSpec]) -> Vec<BackupTask> {
        let mut tasks = Vec::new();
        for spec in specs {
            if spec.remote_prefix.is_some() && spec.recursive {
                error!(
                    "{}: 'remote_prefix' and 'recursive' are mutually exclusive; skip this [[backup]] section",
                    spec.local
                );
                continue;
            }
            if spec.remote_prefix.is_some() && spec.is_pattern() {
                error!(
                    "{}: 'remote_prefix' and 'regexp' are mutually exclusive; skip this [[backup]] section",
                    spec.local
                );
                continue;
            }
            if spec.is_pattern() && spec.recursive {
                error!(
                    "{}: 'regexp' and 'recursive=true' are mutually exclusive; skip this [[backup]] section",
                    spec.local
                );
                continue;
            }
            let policy = match RetentionPolicy::parse(&spec.expire) {
                Ok(policy) => policy,
                Err(e) => {
                    error!("{}: {e}; skip this [[backup]] section", spec.local);
                    continue;
                }
            };
            if policy.is_none() {
                warn!("{}: expire not set, will not delete old backups", spec.local);
            }

            let sources = match self
                .local
                .list_datasets(&spec.local, DatasetKind::Filesystem, spec.recursive)
                .await
            {
                Ok(sources) => sources,
                Err(e) => {
                    error!("{}: error listing filesystems: {e}", spec.local);
                    continue;
                }
            };
            if spec.remote_prefix.is_some() {
                warn!(
                    "{}: 'remote_prefix' set; fs with this name on remote may be overwritten",
                    spec.local
                );
                if sources.len() > 1 {
                    warn!(
                        "{}: {} sources collapse onto one remote name; later tasks clobber earlier ones",
                        spec.local,
                        sources.len()
                    );
                }
            }

            for src in sources {
                let dst = match &spec.remote_prefix {
                    Some(prefix) => format!("{}/{prefix}", spec.remote_root),
                    None => format!(
                        "{}/{}-{}",
                        spec.remote_root,
                        self.env.hostname,
                        src.replace('/', "-")
                    ),
                };
                tasks.push(BackupTask::new(
                    tasks.len(),
                    src,
                    dst,
                    spec.remote_root.clone(),
                    policy.clone(),
                    self.labels.clone(),
                    self.local.clone(),
                    self.remote.clone(),
                    self.env.clone(),
                ));
            }
        }
        tasks
    }

    /// Property-scan mode: every local dataset carrying `property=true`
    /// becomes its own spec against `remote_root`.
    pub async fn specs_from_property(
        &self,
        property: &str,
        remote_root: &str,
        expire: &str,
    ) -> Result<Vec<BackupSpec>> {
        let datasets = self
            .local
            .list_datasets("", DatasetKind::Filesystem, true)
            .await?;
        let mut specs = Vec::new();
        for dataset in datasets {
            if self.local.get_property(&dataset, property).await? == "true" {
                specs.push(BackupSpec {
                    local: dataset,
                    remote_root: remote_root.to_string(),
                    remote_prefix: None,
                    recursive: false,
                    expire: expire.to_string(),
                });
            }
        }
        Ok(specs)
    }
}
