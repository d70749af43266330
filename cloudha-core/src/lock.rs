//! Same-host mutual exclusion for failover runs
//!
//! A marker file created with `create_new`. It only guards the window
//! between a trigger and the run record being written; cross-host
//! coordination goes through the persisted run record.

use crate::clock::Clock;
use crate::config::LockConfig;
use crate::error::{FailoverError, FailoverResult};
use crate::patterns::poll::{poll_until, PollConfig, PollLimit, PollOutcome};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub struct LocalLock {
    path: PathBuf,
    held: bool,
}

impl LocalLock {
    /// Poll for the marker file until it can be created
    pub async fn acquire(config: &LockConfig, clock: &dyn Clock) -> FailoverResult<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let poll = PollConfig {
            interval: config.interval,
            limit: PollLimit::Attempts(config.max_attempts),
        };
        let path = config.path.as_path();
        let outcome = poll_until(clock, poll, |attempt| async move {
            match try_create(path).await {
                Ok(()) => Ok(Some(())),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(path = %path.display(), attempt, "lock held, waiting");
                    Ok(None)
                }
                Err(e) => Err(FailoverError::from(e)),
            }
        })
        .await?;

        match outcome {
            PollOutcome::Ready(()) => {
                info!(path = %path.display(), "acquired failover lock");
                Ok(Self {
                    path: config.path.clone(),
                    held: true,
                })
            }
            PollOutcome::Exhausted { attempts } => {
                warn!(path = %path.display(), attempts, "gave up waiting for failover lock");
                Err(FailoverError::LockTimeout {
                    path: path.display().to_string(),
                    attempts,
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Remove the marker; releasing twice is a no-op
    pub async fn release(&mut self) -> FailoverResult<()> {
        if !self.held {
            return Ok(());
        }
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "released failover lock"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.held = false;
        Ok(())
    }
}

async fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", std::process::id()).as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::time::Duration;
    use tempfile::TempDir;

    fn lock_config(dir: &TempDir) -> LockConfig {
        LockConfig {
            path: dir.path().join("run").join("failover.lock"),
            max_attempts: 3,
            interval: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let config = lock_config(&dir);
        let clock = MockClock::default();

        let mut lock = LocalLock::acquire(&config, &clock).await.unwrap();
        assert!(lock.path().exists());

        lock.release().await.unwrap();
        assert!(!config.path.exists());
        lock.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_contended_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let config = lock_config(&dir);
        let clock = MockClock::default();

        let _held = LocalLock::acquire(&config, &clock).await.unwrap();
        let err = LocalLock::acquire(&config, &clock).await.unwrap_err();
        assert!(matches!(err, FailoverError::LockTimeout { attempts: 3, .. }));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_marker_records_pid_and_tolerates_removal() {
        let dir = TempDir::new().unwrap();
        let config = lock_config(&dir);
        let clock = MockClock::default();

        let mut lock = LocalLock::acquire(&config, &clock).await.unwrap();
        let contents = tokio::fs::read_to_string(lock.path()).await.unwrap();
        assert_eq!(contents.trim(), std::process::id().to_string());

        tokio::fs::remove_file(&config.path).await.unwrap();
        lock.release().await.unwrap();
        assert!(!lock.is_held());
    }
}
