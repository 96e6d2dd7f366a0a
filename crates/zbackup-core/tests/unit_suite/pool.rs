//! Worker pool tests: bounded parallelism and failure isolation.

use std::sync::Arc;
use std::time::Duration;

use zbackup_core::{MemoryDriver, RetentionPolicy, VolumeDriver, WorkerPool};

use super::helpers;

#[tokio::test]
async fn parallelism_never_exceeds_the_configured_cap() {
    let local = Arc::new(MemoryDriver::new());
    let remote = Arc::new(MemoryDriver::new().with_transfer_delay(Duration::from_millis(25)));
    local.create_dataset("tank").await.unwrap();
    remote.create_dataset("backup").await.unwrap();
    let env = helpers::fixed_env();

    let mut tasks = Vec::new();
    for i in 0..6 {
        let src = format!("tank/fs{i}");
        local.create_dataset(&src).await.unwrap();
        tasks.push(helpers::make_task(
            i,
            &local,
            &remote,
            &env,
            &src,
            &format!("backup/host1-tank-fs{i}"),
            "backup",
            RetentionPolicy::None,
        ));
    }

    let pool = WorkerPool::new(2);
    assert!(pool.run(tasks).await);

    assert!(remote.max_concurrent_receives() <= 2);
    for i in 0..6 {
        assert!(remote
            .exists_snapshot(&format!("backup/host1-tank-fs{i}"), "2025-01-15T10:00")
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn failing_task_does_not_cancel_its_peers() {
    let local = Arc::new(MemoryDriver::new());
    let remote = Arc::new(MemoryDriver::new());
    local.create_dataset("tank").await.unwrap();
    local.create_dataset("tank/good").await.unwrap();
    local.create_dataset("tank/also-good").await.unwrap();
    remote.create_dataset("backup").await.unwrap();
    let env = helpers::fixed_env();

    let tasks = vec![
        helpers::make_task(
            0,
            &local,
            &remote,
            &env,
            "tank/good",
            "backup/host1-tank-good",
            "backup",
            RetentionPolicy::None,
        ),
        // Source dataset does not exist: this one fails at the snapshot.
        helpers::make_task(
            1,
            &local,
            &remote,
            &env,
            "tank/missing",
            "backup/host1-tank-missing",
            "backup",
            RetentionPolicy::None,
        ),
        helpers::make_task(
            2,
            &local,
            &remote,
            &env,
            "tank/also-good",
            "backup/host1-tank-also-good",
            "backup",
            RetentionPolicy::None,
        ),
    ];

    let pool = WorkerPool::new(2);
    assert!(!pool.run(tasks).await);

    assert!(remote
        .exists_snapshot("backup/host1-tank-good", "2025-01-15T10:00")
        .await
        .unwrap());
    assert!(remote
        .exists_snapshot("backup/host1-tank-also-good", "2025-01-15T10:00")
        .await
        .unwrap());
    assert!(!remote.exists_dataset("backup/host1-tank-missing").await.unwrap());
}
