use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Advisory exclusive lock on one index name, released on drop.
///
/// Operations do not take it themselves; callers that may race other
/// processes on the same index hold it around load-modify-save.
#[derive(Debug)]
pub struct IndexLock {
    lock_file: File,
}

impl IndexLock {
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive().map_err(|e| {
            CoreError::SaveFailure(format!("cannot lock {}: {e}", lock_path.display()))
        })?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, CoreError> {
    let fail = |e: std::io::Error| {
        CoreError::SaveFailure(format!("cannot open lock {}: {e}", lock_path.display()))
    };
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(fail)?;
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(fail)
}

impl Drop for IndexLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once the token has been tripped.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Trip `token` on Ctrl-C. The running operation stops before its next
/// fetch or push.
pub fn install_signal_handler(token: &CancelToken) {
    let token = token.clone();
    let result = ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!("\ncancellation requested, stopping before the next network call...");
        }
        token.cancel();
    });
    if let Err(e) = result {
        debug!("signal handler not installed: {e}");
    }
}
