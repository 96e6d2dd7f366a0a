//! Backup task state-machine tests.
//!
//! First-run full sends, incremental deltas, sentinel rotation, the
//! same-minute guard, and recovery after partial failure.

use std::sync::Arc;

use zbackup_core::{Error, MemoryDriver, RetentionPolicy, VolumeDriver};

use super::helpers;

const CURR: &str = "zbackup_curr_default";
const NEW: &str = "zbackup_new_default";

async fn driver_pair() -> (Arc<MemoryDriver>, Arc<MemoryDriver>) {
    let local = Arc::new(MemoryDriver::new());
    let remote = Arc::new(MemoryDriver::new());
    local.create_dataset("tank").await.unwrap();
    local.create_dataset("tank/a").await.unwrap();
    (local, remote)
}

#[tokio::test]
async fn first_run_sends_full_stream_and_tags_destination() {
    let (local, remote) = driver_pair().await;
    let env = helpers::fixed_env();
    let task = helpers::make_task(
        0,
        &local,
        &remote,
        &env,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
    );
    task.run().await.unwrap();

    // Exactly one sentinel, the incremental base for the next run.
    assert_eq!(local.snapshot_labels("tank/a"), vec![CURR.to_string()]);

    // The destination root was created and the stream committed.
    assert!(remote.exists_dataset("backup").await.unwrap());
    assert!(remote
        .exists_snapshot("backup/host1-tank-a", "2025-01-15T10:00")
        .await
        .unwrap());
    let data = remote
        .snapshot_data("backup/host1-tank-a", "2025-01-15T10:00")
        .unwrap();
    assert!(data.starts_with(b"ZSTREAM full tank/a@zbackup_curr_default"));

    // Destination is read-only, snapshot carries the ownership tag.
    assert_eq!(
        remote.get_property("backup/host1-tank-a", "readonly").await.unwrap(),
        "on"
    );
    assert_eq!(
        remote
            .get_property("backup/host1-tank-a@2025-01-15T10:00", "zbackup:")
            .await
            .unwrap(),
        "true"
    );
}

#[tokio::test]
async fn second_run_sends_delta_and_rotates_sentinels() {
    let (local, remote) = driver_pair().await;
    let env = helpers::fixed_env();
    let task = helpers::make_task(
        0,
        &local,
        &remote,
        &env,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
    );
    task.run().await.unwrap();

    env.clock.set(helpers::jan15(10, 1));
    task.run().await.unwrap();

    // Rotation: @new became @curr, nothing else lingers.
    assert_eq!(local.snapshot_labels("tank/a"), vec![CURR.to_string()]);

    let data = remote
        .snapshot_data("backup/host1-tank-a", "2025-01-15T10:01")
        .unwrap();
    assert!(data.starts_with(
        b"ZSTREAM incremental tank/a@zbackup_curr_default tank/a@zbackup_new_default"
    ));
    assert_eq!(
        remote
            .get_property("backup/host1-tank-a@2025-01-15T10:01", "zbackup:")
            .await
            .unwrap(),
        "true"
    );
}

#[tokio::test]
async fn same_minute_rerun_fails_without_touching_sentinels() {
    let (local, remote) = driver_pair().await;
    let env = helpers::fixed_env();
    let task = helpers::make_task(
        0,
        &local,
        &remote,
        &env,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
    );
    task.run().await.unwrap();

    let err = task.run().await.unwrap_err();
    assert!(matches!(err, Error::SnapshotExists { .. }));
    assert!(err.to_string().contains("wait next minute and run again"));

    // No @new was created, the base is untouched.
    assert_eq!(local.snapshot_labels("tank/a"), vec![CURR.to_string()]);
}

#[tokio::test]
async fn failed_send_keeps_the_incremental_base() {
    let (local, remote) = driver_pair().await;
    let env = helpers::fixed_env();
    let task = helpers::make_task(
        0,
        &local,
        &remote,
        &env,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
    );
    task.run().await.unwrap();

    local.inject_send_failure("tank/a");
    env.clock.set(helpers::jan15(10, 1));
    assert!(task.run().await.is_err());

    // Pre-rotation state survives: @curr is still the base, and nothing
    // was committed remotely for the failed minute.
    let labels = local.snapshot_labels("tank/a");
    assert!(labels.contains(&CURR.to_string()));
    assert!(!remote
        .exists_snapshot("backup/host1-tank-a", "2025-01-15T10:01")
        .await
        .unwrap());

    // The next run retries the same delta and cleans up the stale @new.
    local.clear_send_failure("tank/a");
    env.clock.set(helpers::jan15(10, 2));
    task.run().await.unwrap();
    assert_eq!(local.snapshot_labels("tank/a"), vec![CURR.to_string()]);
    assert!(remote
        .exists_snapshot("backup/host1-tank-a", "2025-01-15T10:02")
        .await
        .unwrap());
}

#[tokio::test]
async fn lingering_new_sentinel_is_promoted_to_curr() {
    let (local, remote) = driver_pair().await;
    // Simulate a crash between destroy(@curr) and rename(@new -> @curr).
    local.create_snapshot("tank/a", NEW).await.unwrap();

    let env = helpers::fixed_env();
    let task = helpers::make_task(
        0,
        &local,
        &remote,
        &env,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
    );
    task.run().await.unwrap();

    // The promoted sentinel served as the base of an incremental send
    // instead of forcing a full one.
    assert_eq!(local.snapshot_labels("tank/a"), vec![CURR.to_string()]);
    let data = remote
        .snapshot_data("backup/host1-tank-a", "2025-01-15T10:00")
        .unwrap();
    assert!(data.starts_with(b"ZSTREAM incremental"));
}

#[tokio::test]
async fn suffix_scopes_sentinels_per_invocation() {
    use std::sync::Arc;
    use zbackup_core::{BackupTask, SentinelLabels, VolumeDriver};

    // Two configurations backing up the same dataset must not share
    // sentinels; the suffix keeps them apart.
    let (local, remote) = driver_pair().await;
    let env = helpers::fixed_env();
    let task_a = BackupTask::new(
        0,
        "tank/a",
        "backup/host1-tank-a",
        "backup",
        RetentionPolicy::None,
        SentinelLabels::new("one.conf"),
        local.clone() as Arc<dyn VolumeDriver>,
        remote.clone() as Arc<dyn VolumeDriver>,
        env.clone(),
    );
    let task_b = BackupTask::new(
        0,
        "tank/a",
        "mirror/host1-tank-a",
        "mirror",
        RetentionPolicy::None,
        SentinelLabels::new("two.conf"),
        local.clone() as Arc<dyn VolumeDriver>,
        remote.clone() as Arc<dyn VolumeDriver>,
        env.clone(),
    );

    task_a.run().await.unwrap();
    task_b.run().await.unwrap();

    assert_eq!(
        local.snapshot_labels("tank/a"),
        vec!["zbackup_curr_one.conf".to_string(), "zbackup_curr_two.conf".to_string()]
    );
}
