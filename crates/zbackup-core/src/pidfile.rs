//! Pidfile protocol: one running instance per pidfile path.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Holds the pidfile for the lifetime of the value; removed on drop.
pub struct Pidfile {
    path: PathBuf,
}

impl Pidfile {
    /// Claim `path`. Fails when the file exists and the PID it names is
    /// still alive; a stale file is silently replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Ok(pid) = contents.trim().parse::<u32>() {
                if Path::new("/proc").join(pid.to_string()).exists() {
                    return Err(Error::Pidfile(format!(
                        "{} exists and process {pid} is running",
                        path.display()
                    )));
                }
            }
        }
        fs::write(&path, format!("{}\n", std::process::id()))?;
        Ok(Self { path })
    }
}

impl Drop for Pidfile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
