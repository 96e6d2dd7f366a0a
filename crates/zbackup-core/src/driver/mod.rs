//! Volume-manager abstraction and implementations.
//!
//! This module provides a unified interface over the volume manager's
//! command-line surface:
//!
//! - **Zfs**: the real driver, shelling out to `zfs` through a
//!   [`CommandRunner`](crate::runner::CommandRunner) (local or SSH)
//! - **Memory**: an in-memory double (for testing)

mod memory;
mod stream;
mod zfs;

pub use memory::MemoryDriver;
pub use stream::{ReceiveStream, SendStream, WaitHandle};
pub use zfs::ZfsDriver;

use async_trait::async_trait;

use crate::error::Result;

/// Property key marking remote snapshots owned by this tool.
pub const TAG_PROPERTY: &str = "zbackup:";

/// Kind of dataset selected by [`VolumeDriver::list_datasets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    Filesystem,
    Snapshot,
}

impl DatasetKind {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DatasetKind::Filesystem => "filesystem",
            DatasetKind::Snapshot => "snapshot",
        }
    }
}

/// `dataset@label` form used across drivers and logs.
pub fn snapshot_name(dataset: &str, label: &str) -> String {
    format!("{dataset}@{label}")
}

/// Facade over a volume manager bound to one host.
///
/// Non-existence is never an error from the `exists_*` predicates; every
/// other command failure surfaces as a
/// [`DriverError`](crate::error::DriverError).
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Datasets of `kind` under `root`.
    ///
    /// With `recursive` false the result is `root` itself; with it true,
    /// `root` and every descendant. A trailing `*` in `root` instead
    /// selects siblings whose basename matches the prefix. An empty `root`
    /// lists every dataset on the host.
    async fn list_datasets(
        &self,
        root: &str,
        kind: DatasetKind,
        recursive: bool,
    ) -> Result<Vec<String>>;

    async fn exists_dataset(&self, name: &str) -> Result<bool>;

    async fn exists_snapshot(&self, dataset: &str, label: &str) -> Result<bool>;

    async fn create_dataset(&self, name: &str) -> Result<()>;

    async fn create_snapshot(&self, dataset: &str, label: &str) -> Result<()>;

    async fn rename_snapshot(&self, dataset: &str, old: &str, new: &str) -> Result<()>;

    /// Destroy a dataset, or a snapshot when `target` contains `@`.
    async fn destroy(&self, target: &str) -> Result<()>;

    async fn set_property(&self, target: &str, key: &str, value: &str) -> Result<()>;

    /// Property value, `-` when unset.
    async fn get_property(&self, target: &str, key: &str) -> Result<String>;

    /// All snapshots of `dataset`, full `dataset@label` names, label order.
    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>>;

    /// The snapshot whose `tag_key` property is `true` with the greatest
    /// label; fails with
    /// [`NoTaggedSnapshot`](crate::error::Error::NoTaggedSnapshot) when
    /// there is none.
    async fn most_recent_tagged(&self, dataset: &str, tag_key: &str) -> Result<String>;

    /// Start the producer of a replication stream: the full contents of
    /// `dataset@base_label`, or the delta from it to `dataset@incr_label`.
    async fn open_send(
        &self,
        dataset: &str,
        base_label: &str,
        incr_label: Option<&str>,
    ) -> Result<SendStream>;

    /// Start the consumer that commits the incoming stream as
    /// `dataset@new_label`.
    async fn open_receive(&self, dataset: &str, new_label: &str) -> Result<ReceiveStream>;
}
