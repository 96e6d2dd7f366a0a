//! zbackup core library
//!
//! This crate provides the core functionality for replicating local ZFS
//! datasets to a remote mirror pool: volume drivers over local and SSH
//! command runners, task planning, the per-dataset backup state machine,
//! a bounded worker pool, and retention-based pruning.

pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod pidfile;
pub mod planner;
pub mod pool;
pub mod retention;
pub mod runner;
pub mod task;

pub use config::{BackupSpec, Config};
pub use driver::{
    snapshot_name, DatasetKind, MemoryDriver, ReceiveStream, SendStream, VolumeDriver, ZfsDriver,
    TAG_PROPERTY,
};
pub use env::{Clock, Env, TIME_FORMAT};
pub use error::{DriverError, Error, Result};
pub use pidfile::Pidfile;
pub use planner::TaskPlanner;
pub use pool::WorkerPool;
pub use retention::RetentionPolicy;
pub use runner::{CommandRunner, LocalRunner, SshRunner};
pub use task::{BackupTask, SentinelLabels, SNAP_CURR_PREFIX, SNAP_NEW_PREFIX};
