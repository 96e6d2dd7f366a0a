use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zbackup_core::Pidfile;

mod commands;

#[derive(Parser)]
#[command(name = "zbackup")]
#[command(about = "Incremental ZFS backup to a remote mirror pool over SSH", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration-based backup
    #[arg(short = 'c', long = "config", default_value = "/etc/zbackup/zbackup.conf")]
    config: PathBuf,

    /// Property-based backup: every local dataset with PROPERTY=true is a source
    #[arg(short = 'u', long = "property")]
    property: Option<String>,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Print the backup plan and exit
    #[arg(long)]
    dry_run: bool,

    /// Pidfile path
    #[arg(short = 'p', long = "pidfile", default_value = "/var/run/zbackup.pid")]
    pidfile: PathBuf,

    /// Log level: info or debug
    #[arg(short = 'v', long = "loglevel", default_value = "info")]
    loglevel: String,

    /// Log file (stderr when omitted)
    #[arg(short = 'f', long = "logfile")]
    logfile: Option<PathBuf>,

    /// Backup host, hostname or hostname:port (property mode)
    #[arg(long)]
    host: Option<String>,

    /// Remote user (property mode)
    #[arg(long, default_value = "root")]
    user: String,

    /// Private key file (property mode)
    #[arg(long, default_value = "/root/.ssh/id_rsa")]
    key: String,

    /// Maximum parallel backup tasks (property mode)
    #[arg(long, default_value_t = 1)]
    iothreads: usize,

    /// Remote root filesystem (property mode)
    #[arg(long, default_value = "zroot")]
    remote: String,

    /// Retention policy: a duration such as 24h, or 'lastone' (property mode)
    #[arg(long, default_value = "24h")]
    expire: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Pidfile first: a second instance must not get as far as logging
    // setup. Held until exit so the drop removes the file.
    let _pidfile = Pidfile::acquire(&cli.pidfile)?;

    // Initialize tracing
    // Priority: RUST_LOG env var > -v flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.loglevel.as_str() {
            "info" => EnvFilter::new("info"),
            "debug" => EnvFilter::new("debug"),
            other => anyhow::bail!("unknown log level: {other}"),
        }
    };
    match &cli.logfile {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(Arc::new(file)).with_ansi(false))
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    commands::run::run(cli).await
}
