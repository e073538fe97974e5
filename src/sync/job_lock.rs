use anyhow::{Context, Result};
use std::fs::{self, File};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Advisory per-job file locks so two runs of the same job never overlap,
/// whether they come from the daemon, cron or an operator shell.
#[derive(Debug, Clone)]
pub struct JobLocks {
    dir: PathBuf,
}

impl JobLocks {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create lock directory {:?}", dir))?;
        Ok(JobLocks { dir })
    }

    pub fn path_for(&self, job: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", job))
    }

    /// Run `f` while holding the lock for `job`.
    ///
    /// Returns `Ok(None)` without running anything when another run holds it.
    pub async fn run_exclusive<F, Fut, T>(&self, job: &str, f: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let path = self.path_for(job);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create lock file {:?}", path))?;

        let mut lock = fd_lock::RwLock::new(file);
        let _guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("{} is already running, skipping this run", job);
                return Ok(None);
            }
        };
        debug!("Acquired {} lock", job);

        Ok(Some(f().await))
    }
}
