//! Retention engine tests.

use chrono::Duration as ChronoDuration;
use std::time::Duration;

use zbackup_core::retention::prune;
use zbackup_core::{Error, MemoryDriver, RetentionPolicy, VolumeDriver, TIME_FORMAT};

use super::helpers::{self, seed_tagged_snapshot};

async fn remote_with_dataset() -> MemoryDriver {
    let remote = MemoryDriver::new();
    remote.create_dataset("backup").await.unwrap();
    remote.create_dataset("backup/fs").await.unwrap();
    remote
}

#[tokio::test]
async fn lastone_keeps_only_the_most_recent_tagged() {
    let remote = remote_with_dataset().await;
    for label in ["2025-01-15T10:00", "2025-01-15T10:01", "2025-01-15T10:02"] {
        seed_tagged_snapshot(&remote, "backup/fs", label).await;
    }
    let env = helpers::fixed_env();

    prune(&remote, "backup/fs", &RetentionPolicy::LastOne, &env, 0)
        .await
        .unwrap();

    assert_eq!(
        remote.snapshot_labels("backup/fs"),
        vec!["2025-01-15T10:02".to_string()]
    );
}

#[tokio::test]
async fn max_age_destroys_only_snapshots_past_the_threshold() {
    let remote = remote_with_dataset().await;
    let env = helpers::fixed_env();
    let now = env.clock.now();
    let label = |hours| (now - ChronoDuration::hours(hours)).format(TIME_FORMAT).to_string();

    for hours in [48, 12, 1] {
        seed_tagged_snapshot(&remote, "backup/fs", &label(hours)).await;
    }

    let policy = RetentionPolicy::MaxAge(Duration::from_secs(24 * 3600));
    prune(&remote, "backup/fs", &policy, &env, 0).await.unwrap();

    assert_eq!(
        remote.snapshot_labels("backup/fs"),
        vec![label(12), label(1)]
    );
}

#[tokio::test]
async fn untagged_snapshots_are_not_ours_to_destroy() {
    let remote = remote_with_dataset().await;
    remote.create_snapshot("backup/fs", "2025-01-10T08:00").await.unwrap();
    seed_tagged_snapshot(&remote, "backup/fs", "2025-01-15T10:00").await;
    seed_tagged_snapshot(&remote, "backup/fs", "2025-01-15T10:01").await;
    let env = helpers::fixed_env();

    prune(&remote, "backup/fs", &RetentionPolicy::LastOne, &env, 0)
        .await
        .unwrap();

    // The manual snapshot survives even though it is the oldest.
    assert_eq!(
        remote.snapshot_labels("backup/fs"),
        vec!["2025-01-10T08:00".to_string(), "2025-01-15T10:01".to_string()]
    );
}

#[tokio::test]
async fn a_lone_snapshot_is_never_destroyed() {
    let remote = remote_with_dataset().await;
    seed_tagged_snapshot(&remote, "backup/fs", "2025-01-01T00:00").await;
    let env = helpers::fixed_env();

    // Far past any threshold, but it is the only one.
    let policy = RetentionPolicy::MaxAge(Duration::from_secs(3600));
    prune(&remote, "backup/fs", &policy, &env, 0).await.unwrap();

    assert_eq!(
        remote.snapshot_labels("backup/fs"),
        vec!["2025-01-01T00:00".to_string()]
    );
}

#[tokio::test]
async fn empty_policy_is_a_no_op() {
    let remote = remote_with_dataset().await;
    for label in ["2025-01-01T00:00", "2025-01-02T00:00"] {
        seed_tagged_snapshot(&remote, "backup/fs", label).await;
    }
    let env = helpers::fixed_env();

    prune(&remote, "backup/fs", &RetentionPolicy::None, &env, 0)
        .await
        .unwrap();

    assert_eq!(remote.snapshot_labels("backup/fs").len(), 2);
}

#[tokio::test]
async fn missing_tag_universe_propagates() {
    let remote = remote_with_dataset().await;
    remote.create_snapshot("backup/fs", "manual-1").await.unwrap();
    remote.create_snapshot("backup/fs", "manual-2").await.unwrap();
    let env = helpers::fixed_env();

    let err = prune(&remote, "backup/fs", &RetentionPolicy::LastOne, &env, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoTaggedSnapshot(_)));
}

#[tokio::test]
async fn snapshots_with_unparseable_labels_are_skipped() {
    let remote = remote_with_dataset().await;
    seed_tagged_snapshot(&remote, "backup/fs", "not-a-timestamp").await;
    seed_tagged_snapshot(&remote, "backup/fs", "2025-01-01T00:00").await;
    seed_tagged_snapshot(&remote, "backup/fs", "2025-01-15T09:30").await;
    let env = helpers::fixed_env();

    let policy = RetentionPolicy::MaxAge(Duration::from_secs(24 * 3600));
    prune(&remote, "backup/fs", &policy, &env, 0).await.unwrap();

    assert_eq!(
        remote.snapshot_labels("backup/fs"),
        vec!["2025-01-15T09:30".to_string(), "not-a-timestamp".to_string()]
    );
}
