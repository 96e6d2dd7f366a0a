//! Bounded concurrent execution of backup tasks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::task::BackupTask;

/// Runs tasks concurrently, at most `max_io_threads` at a time.
///
/// A failing task does not cancel its peers; it only flips the overall
/// result.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_io_threads: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_io_threads)),
        }
    }

    /// Run every task to completion. Returns true iff all succeeded.
    pub async fn run(&self, tasks: Vec<BackupTask>) -> bool {
        let failed = Arc::new(AtomicBool::new(false));
        let mut joins = Vec::with_capacity(tasks.len());
        for task in tasks {
            // Submission blocks while the pool is saturated.
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let failed = failed.clone();
            joins.push(tokio::spawn(async move {
                let _permit = permit;
                info!("[{}]: starting backup", task.id());
                match task.run().await {
                    Ok(()) => info!("[{}]: backup done", task.id()),
                    Err(e) => {
                        error!("[{}]: {e}", task.id());
                        failed.store(true, Ordering::SeqCst);
                    }
                }
            }));
        }
        for join in joins {
            if join.await.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
        }
        !failed.load(Ordering::SeqCst)
    }
}
