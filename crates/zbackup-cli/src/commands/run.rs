//! One backup cycle: load config, plan, then dry-run or execute.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use zbackup_core::{
    Config, Env, LocalRunner, SshRunner, TaskPlanner, VolumeDriver, WorkerPool, ZfsDriver,
};

use crate::Cli;

pub async fn run(cli: Cli) -> Result<()> {
    // The sentinel suffix scopes this invocation's labels so concurrent
    // configurations do not collide: the config file's basename, or the
    // scanned property name in property mode.
    let (config, suffix) = if let Some(property) = &cli.property {
        let host = cli
            .host
            .clone()
            .context("--host is required with property-based backup")?;
        let config = Config {
            host,
            user: cli.user.clone(),
            key: cli.key.clone(),
            max_io_threads: cli.iothreads,
            backups: Vec::new(),
        };
        (config, property.clone())
    } else {
        info!("loading configuration from {}", cli.config.display());
        let raw = tokio::fs::read_to_string(&cli.config)
            .await
            .with_context(|| format!("reading {}", cli.config.display()))?;
        let suffix = cli
            .config
            .file_name()
            .context("config path has no file name")?
            .to_string_lossy()
            .into_owned();
        (Config::from_toml(&raw)?, suffix)
    };
    config.validate()?;
    if cli.test {
        info!("config ok");
        return Ok(());
    }

    let env = Env::system();
    let local: Arc<dyn VolumeDriver> = Arc::new(ZfsDriver::new(LocalRunner));
    let remote: Arc<dyn VolumeDriver> = Arc::new(ZfsDriver::new(SshRunner::new(
        &config.user,
        &config.host,
        &config.key,
    )));
    let planner = TaskPlanner::new(env, local, remote, &suffix);

    let specs = match &cli.property {
        Some(property) => {
            planner
                .specs_from_property(property, &cli.remote, &cli.expire)
                .await?
        }
        None => config.backups.clone(),
    };
    let tasks = planner.plan(&specs).await;
    if tasks.is_empty() {
        warn!("no backup tasks");
        return Ok(());
    }

    if cli.dry_run {
        for task in &tasks {
            info!("[{}]: {} -> {}:{}", task.id(), task.src(), config.host, task.dst());
        }
        return Ok(());
    }

    let pool = WorkerPool::new(config.max_io_threads);
    if !pool.run(tasks).await {
        anyhow::bail!("one or more backup tasks failed");
    }
    Ok(())
}
