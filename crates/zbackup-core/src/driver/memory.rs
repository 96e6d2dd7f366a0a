//! In-memory volume driver for testing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncReadExt;

use super::{snapshot_name, DatasetKind, ReceiveStream, SendStream, VolumeDriver};
use crate::error::{DriverError, Error, Result};

/// Trailer a complete in-memory stream must end with; a receive that hits
/// EOF without it fails like a short `zfs receive` would.
const STREAM_TRAILER: &[u8] = b"\nEND\n";

#[derive(Default)]
struct Snapshot {
    data: Bytes,
    properties: HashMap<String, String>,
}

#[derive(Default)]
struct Dataset {
    properties: HashMap<String, String>,
    /// label -> snapshot; BTreeMap keeps labels in lexicographic order
    snapshots: BTreeMap<String, Snapshot>,
}

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, Dataset>,
    send_failures: HashSet<String>,
    active_receives: usize,
    max_active_receives: usize,
}

/// In-memory driver double.
///
/// Models datasets, snapshots, user properties, and the coupling of send
/// to receive streams. Primarily useful for tests, which also use its
/// probe methods to inspect state and inject failures.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    state: Arc<Mutex<State>>,
    transfer_delay: Option<Duration>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay each receive commit, widening the window in which transfers
    /// overlap; used to observe pool parallelism.
    pub fn with_transfer_delay(mut self, delay: Duration) -> Self {
        self.transfer_delay = Some(delay);
        self
    }

    /// Make every subsequent `open_send` for `dataset` fail.
    pub fn inject_send_failure(&self, dataset: &str) {
        self.state.lock().send_failures.insert(dataset.to_string());
    }

    /// Clear an injected send failure.
    pub fn clear_send_failure(&self, dataset: &str) {
        self.state.lock().send_failures.remove(dataset);
    }

    /// Labels of every snapshot of `dataset`, label order.
    pub fn snapshot_labels(&self, dataset: &str) -> Vec<String> {
        self.state
            .lock()
            .datasets
            .get(dataset)
            .map(|ds| ds.snapshots.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Bytes committed for `dataset@label`, if it exists.
    pub fn snapshot_data(&self, dataset: &str, label: &str) -> Option<Bytes> {
        self.state
            .lock()
            .datasets
            .get(dataset)
            .and_then(|ds| ds.snapshots.get(label))
            .map(|snap| snap.data.clone())
    }

    /// High-water mark of concurrently open receives.
    pub fn max_concurrent_receives(&self) -> usize {
        self.state.lock().max_active_receives
    }

    fn parent_of(name: &str) -> Option<&str> {
        name.rsplit_once('/').map(|(parent, _)| parent)
    }

    fn basename_of(name: &str) -> &str {
        name.rsplit('/').next().unwrap_or(name)
    }
}

fn missing(command: String) -> Error {
    DriverError::other(command, "does not exist").into()
}

#[async_trait]
impl VolumeDriver for MemoryDriver {
    async fn list_datasets(
        &self,
        root: &str,
        kind: DatasetKind,
        recursive: bool,
    ) -> Result<Vec<String>> {
        if kind == DatasetKind::Snapshot {
            return Err(DriverError::other(
                format!("list -t snapshot {root}"),
                "snapshot listing goes through list_snapshots",
            )
            .into());
        }
        let state = self.state.lock();
        if let Some(prefix) = root.strip_suffix('*') {
            let (parent, stem) = match prefix.rsplit_once('/') {
                Some((parent, stem)) => (Some(parent), stem),
                None => (None, prefix),
            };
            if let Some(parent) = parent {
                if !state.datasets.contains_key(parent) {
                    return Err(missing(format!("zfs list {parent}")));
                }
            }
            return Ok(state
                .datasets
                .keys()
                .filter(|name| {
                    Self::parent_of(name) == parent && Self::basename_of(name).starts_with(stem)
                })
                .cloned()
                .collect());
        }
        if root.is_empty() {
            return Ok(state.datasets.keys().cloned().collect());
        }
        if !state.datasets.contains_key(root) {
            return Err(missing(format!("zfs list {root}")));
        }
        if !recursive {
            return Ok(vec![root.to_string()]);
        }
        let child_prefix = format!("{root}/");
        Ok(state
            .datasets
            .keys()
            .filter(|name| *name == root || name.starts_with(&child_prefix))
            .cloned()
            .collect())
    }

    async fn exists_dataset(&self, name: &str) -> Result<bool> {
        Ok(self.state.lock().datasets.contains_key(name))
    }

    async fn exists_snapshot(&self, dataset: &str, label: &str) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .datasets
            .get(dataset)
            .is_some_and(|ds| ds.snapshots.contains_key(label)))
    }

    async fn create_dataset(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.datasets.contains_key(name) {
            return Err(DriverError::other(format!("zfs create {name}"), "dataset exists").into());
        }
        if let Some(parent) = Self::parent_of(name) {
            if !state.datasets.contains_key(parent) {
                return Err(missing(format!("zfs create {name}: parent {parent}")));
            }
        }
        state.datasets.insert(name.to_string(), Dataset::default());
        Ok(())
    }

    async fn create_snapshot(&self, dataset: &str, label: &str) -> Result<()> {
        let mut state = self.state.lock();
        let command = format!("zfs snapshot {}", snapshot_name(dataset, label));
        let Some(ds) = state.datasets.get_mut(dataset) else {
            return Err(missing(command));
        };
        if ds.snapshots.contains_key(label) {
            return Err(DriverError::other(command, "snapshot exists").into());
        }
        ds.snapshots.insert(label.to_string(), Snapshot::default());
        Ok(())
    }

    async fn rename_snapshot(&self, dataset: &str, old: &str, new: &str) -> Result<()> {
        let mut state = self.state.lock();
        let command = format!(
            "zfs rename {} {}",
            snapshot_name(dataset, old),
            snapshot_name(dataset, new)
        );
        let Some(ds) = state.datasets.get_mut(dataset) else {
            return Err(missing(command));
        };
        if ds.snapshots.contains_key(new) {
            return Err(DriverError::other(command, "target exists").into());
        }
        match ds.snapshots.remove(old) {
            Some(snap) => {
                ds.snapshots.insert(new.to_string(), snap);
                Ok(())
            }
            None => Err(missing(command)),
        }
    }

    async fn destroy(&self, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        let command = format!("zfs destroy {target}");
        match target.split_once('@') {
            Some((dataset, label)) => {
                let Some(ds) = state.datasets.get_mut(dataset) else {
                    return Err(missing(command));
                };
                ds.snapshots
                    .remove(label)
                    .map(|_| ())
                    .ok_or_else(|| missing(command))
            }
            None => state
                .datasets
                .remove(target)
                .map(|_| ())
                .ok_or_else(|| missing(command)),
        }
    }

    async fn set_property(&self, target: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock();
        let command = format!("zfs set {key}={value} {target}");
        match target.split_once('@') {
            Some((dataset, label)) => {
                let snap = state
                    .datasets
                    .get_mut(dataset)
                    .and_then(|ds| ds.snapshots.get_mut(label));
                match snap {
                    Some(snap) => {
                        snap.properties.insert(key.to_string(), value.to_string());
                        Ok(())
                    }
                    None => Err(missing(command)),
                }
            }
            None => match state.datasets.get_mut(target) {
                Some(ds) => {
                    ds.properties.insert(key.to_string(), value.to_string());
                    Ok(())
                }
                None => Err(missing(command)),
            },
        }
    }

    async fn get_property(&self, target: &str, key: &str) -> Result<String> {
        let state = self.state.lock();
        let command = format!("zfs get {key} {target}");
        let properties = match target.split_once('@') {
            Some((dataset, label)) => state
                .datasets
                .get(dataset)
                .and_then(|ds| ds.snapshots.get(label))
                .map(|snap| &snap.properties),
            None => state.datasets.get(target).map(|ds| &ds.properties),
        };
        match properties {
            Some(properties) => Ok(properties.get(key).cloned().unwrap_or_else(|| "-".to_string())),
            None => Err(missing(command)),
        }
    }

    async fn list_snapshots(&self, dataset: &str) -> Result<Vec<String>> {
        let state = self.state.lock();
        match state.datasets.get(dataset) {
            Some(ds) => Ok(ds
                .snapshots
                .keys()
                .map(|label| snapshot_name(dataset, label))
                .collect()),
            None => Err(missing(format!("zfs list -t snapshot {dataset}"))),
        }
    }

    async fn most_recent_tagged(&self, dataset: &str, tag_key: &str) -> Result<String> {
        let state = self.state.lock();
        let Some(ds) = state.datasets.get(dataset) else {
            return Err(missing(format!("zfs get {tag_key} {dataset}")));
        };
        ds.snapshots
            .iter()
            .filter(|(_, snap)| snap.properties.get(tag_key).map(String::as_str) == Some("true"))
            .map(|(label, _)| label)
            .max()
            .map(|label| snapshot_name(dataset, label))
            .ok_or_else(|| Error::NoTaggedSnapshot(dataset.to_string()))
    }

    async fn open_send(
        &self,
        dataset: &str,
        base_label: &str,
        incr_label: Option<&str>,
    ) -> Result<SendStream> {
        let base = snapshot_name(dataset, base_label);
        let state = self.state.lock();
        if state.send_failures.contains(dataset) {
            return Err(DriverError::other(format!("zfs send {base}"), "injected failure").into());
        }
        let Some(ds) = state.datasets.get(dataset) else {
            return Err(missing(format!("zfs send {base}")));
        };
        if !ds.snapshots.contains_key(base_label) {
            return Err(missing(format!("zfs send {base}")));
        }
        let header = match incr_label {
            Some(label) => {
                if !ds.snapshots.contains_key(label) {
                    return Err(missing(format!(
                        "zfs send -i {base} {}",
                        snapshot_name(dataset, label)
                    )));
                }
                format!("ZSTREAM incremental {base} {}", snapshot_name(dataset, label))
            }
            None => format!("ZSTREAM full {base}"),
        };
        drop(state);

        let mut payload = header.into_bytes();
        payload.extend_from_slice(STREAM_TRAILER);
        let reader = std::io::Cursor::new(payload);
        Ok(SendStream::new(reader, async { Ok(()) }))
    }

    async fn open_receive(&self, dataset: &str, new_label: &str) -> Result<ReceiveStream> {
        {
            let mut state = self.state.lock();
            state.active_receives += 1;
            state.max_active_receives = state.max_active_receives.max(state.active_receives);
        }

        let (writer, mut reader) = tokio::io::duplex(64 * 1024);
        let state = self.state.clone();
        let delay = self.transfer_delay;
        let dataset = dataset.to_string();
        let label = new_label.to_string();

        let handle = tokio::spawn(async move {
            let mut data = Vec::new();
            let read = reader.read_to_end(&mut data).await;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let result = commit(&state, &dataset, &label, read, data);
            state.lock().active_receives -= 1;
            result
        });
        let wait = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::Stream(format!("receive task failed: {e}"))),
            }
        };
        Ok(ReceiveStream::new(writer, wait))
    }
}

/// Commit the received bytes as `dataset@label`, creating the dataset the
/// way `zfs receive` does. The parent must already exist and the stream
/// must be complete.
fn commit(
    state: &Mutex<State>,
    dataset: &str,
    label: &str,
    read: std::io::Result<usize>,
    data: Vec<u8>,
) -> Result<()> {
    let name = snapshot_name(dataset, label);
    if let Err(e) = read {
        return Err(Error::Stream(format!("receiving {name}: {e}")));
    }
    if !data.ends_with(STREAM_TRAILER) {
        return Err(Error::Stream(format!("receiving {name}: incomplete stream")));
    }

    let mut state = state.lock();
    if !state.datasets.contains_key(dataset) {
        if let Some((parent, _)) = dataset.rsplit_once('/') {
            if !state.datasets.contains_key(parent) {
                return Err(Error::Stream(format!(
                    "receiving {name}: parent {parent} does not exist"
                )));
            }
        }
    }
    let ds = state.datasets.entry(dataset.to_string()).or_default();
    if ds.snapshots.contains_key(label) {
        return Err(Error::Stream(format!("receiving {name}: snapshot exists")));
    }
    ds.snapshots.insert(
        label.to_string(),
        Snapshot {
            data: Bytes::from(data),
            properties: HashMap::new(),
        },
    );
    Ok(())
}
