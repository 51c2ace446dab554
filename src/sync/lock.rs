//! Advisory lock serializing syncs of one working copy across processes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Default wait for a concurrent sync to finish.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Exclusive lock on a working copy, released when dropped.
///
/// The holder's PID is written into the lock file so a blocked process can
/// say who it is waiting for.
#[derive(Debug)]
pub struct SyncLock {
    file: File,
}

fn open_lock_file(lock_path: &Path) -> io::Result<File> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
}

impl SyncLock {
    /// Acquire the lock, polling with exponential backoff until `timeout`.
    ///
    /// Returns an error with `ErrorKind::TimedOut` if another process still
    /// holds the lock when the timeout expires.
    pub fn acquire_with_timeout(lock_path: &Path, timeout: Duration) -> io::Result<Self> {
        let file = open_lock_file(lock_path)?;

        let start = Instant::now();
        let mut sleep_duration = Duration::from_millis(10);
        let max_sleep = Duration::from_millis(500);
        let mut announced = false;

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Self::claim(file),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= timeout {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("lock acquisition timed out after {:?}", timeout),
                        ));
                    }
                    if !announced {
                        log::info!(
                            "waiting for another sync to finish (holder pid: {})",
                            holder_pid(lock_path)
                                .map(|pid| pid.to_string())
                                .unwrap_or_else(|| "unknown".to_string())
                        );
                        announced = true;
                    }
                    std::thread::sleep(sleep_duration);
                    sleep_duration = (sleep_duration * 2).min(max_sleep);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Try to acquire the lock without blocking.
    /// Returns None if another process holds it.
    pub fn try_acquire(lock_path: &Path) -> io::Result<Option<Self>> {
        let file = open_lock_file(lock_path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Self::claim(file).map(Some),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn claim(mut file: File) -> io::Result<Self> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;
        Ok(Self { file })
    }
}

impl Drop for SyncLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.unlock();
    }
}

/// Whether some process holds the lock right now.
///
/// Read-only: a missing lock file means no sync has run, and nothing is
/// created or written.
pub fn is_held(lock_path: &Path) -> io::Result<bool> {
    let file = match File::open(lock_path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = file.unlock();
            Ok(false)
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(true),
        Err(e) => Err(e),
    }
}

/// PID recorded by the current (or last) lock holder, if any.
pub fn holder_pid(lock_path: &Path) -> Option<u32> {
    let mut contents = String::new();
    File::open(lock_path)
        .ok()?
        .read_to_string(&mut contents)
        .ok()?;
    contents.trim().parse().ok()
}
