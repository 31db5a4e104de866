use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

const FIRST_BACKOFF: Duration = Duration::from_millis(10);
const MAX_BACKOFF: Duration = Duration::from_millis(500);

/// Exclusive advisory lock over one module's clone and target directories.
///
/// Held for the duration of a single stage step; released on drop.
#[derive(Debug)]
pub struct ModuleLock {
    file: File,
}

impl ModuleLock {
    /// Wait up to `timeout` for the lock at `lock_path`, creating the file and
    /// its parent directory on first use.
    ///
    /// Fails with `ErrorKind::TimedOut` when another process keeps it.
    pub fn acquire(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        let deadline = Instant::now() + timeout;
        let mut backoff = FIRST_BACKOFF;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("{} still locked after {:?}", lock_path.display(), timeout),
                ));
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

impl Drop for ModuleLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::debug!("unlock failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::tempdir;

    const SHORT: Duration = Duration::from_millis(50);

    #[test]
    fn creates_lock_file_and_parent() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("locks").join("trytond-sale.lock");

        let _lock = ModuleLock::acquire(&lock_path, SHORT).unwrap();
        assert!(lock_path.is_file());
    }

    #[test]
    fn released_on_drop() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("trytond-sale.lock");

        let first = ModuleLock::acquire(&lock_path, SHORT).unwrap();
        drop(first);
        assert!(ModuleLock::acquire(&lock_path, SHORT).is_ok());
    }

    #[test]
    fn times_out_while_held_elsewhere() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("trytond-stock.lock");
        let (held_tx, held_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel::<()>();

        let holder_path = lock_path.clone();
        let holder = thread::spawn(move || {
            let _lock = ModuleLock::acquire(&holder_path, SHORT).unwrap();
            held_tx.send(()).unwrap();
            done_rx.recv().unwrap();
        });
        held_rx.recv().unwrap();

        let err = ModuleLock::acquire(&lock_path, Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        done_tx.send(()).unwrap();
        holder.join().unwrap();
        assert!(ModuleLock::acquire(&lock_path, SHORT).is_ok());
    }
}
