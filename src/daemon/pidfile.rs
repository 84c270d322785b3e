use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("already running with pid {pid}")]
    AlreadyRunning { pid: i32 },
    #[error("failed to create pid file {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read pid file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pid file {path} does not hold a pid")]
    Malformed { path: PathBuf },
    #[error("failed to remove stale pid file {path}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to probe process {pid}: {source}")]
    Probe {
        pid: i32,
        #[source]
        source: Errno,
    },
}

/// Exclusive ownership of a PID file; the file is removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: i32,
}

impl PidFile {
    /// Records the current process id in `path`.
    ///
    /// A file naming a live process is an error. One naming a dead process,
    /// or holding no pid at all, is removed and acquisition retried.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, PidFileError> {
        let path = path.as_ref();
        let pid = std::process::id() as i32;

        match create(path) {
            Ok(file) => write_pid(path, file, pid),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let existing = match Self::read(path) {
                    Ok(pid) => pid,
                    Err(PidFileError::Malformed { .. }) => None,
                    Err(e) => return Err(e),
                };
                if let Some(existing) = existing
                    && is_alive(existing)?
                {
                    return Err(PidFileError::AlreadyRunning { pid: existing });
                }

                warn!(file = %path.display(), "removing stale pid file");
                match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(source) => {
                        return Err(PidFileError::Cleanup {
                            path: path.to_path_buf(),
                            source,
                        });
                    }
                }

                let file = create(path).map_err(|source| PidFileError::Create {
                    path: path.to_path_buf(),
                    source,
                })?;
                write_pid(path, file, pid)
            }
            Err(source) => Err(PidFileError::Create {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// The pid recorded in `path`, or `None` when there is no file.
    pub fn read(path: impl AsRef<Path>) -> Result<Option<i32>, PidFileError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PidFileError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => Err(PidFileError::Malformed {
                path: path.to_path_buf(),
            }),
        }
    }

    /// The recorded pid when that process is still alive.
    pub fn running(path: impl AsRef<Path>) -> Result<Option<i32>, PidFileError> {
        let path = path.as_ref();
        let pid = match Self::read(path) {
            Ok(pid) => pid,
            Err(PidFileError::Malformed { .. }) => None,
            Err(e) => return Err(e),
        };
        match pid {
            Some(pid) if is_alive(pid)? => Ok(Some(pid)),
            _ => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Err(error) if error.kind() != io::ErrorKind::NotFound => {
                warn!(
                    file = %self.path.display(),
                    error = %error,
                    "failed to remove pid file"
                );
            }
            _ => {}
        }
    }
}

fn create(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

fn write_pid(path: &Path, mut file: File, pid: i32) -> Result<PidFile, PidFileError> {
    let result = writeln!(file, "{pid}").and_then(|()| file.sync_all());
    if let Err(source) = result {
        let _ = fs::remove_file(path);
        return Err(PidFileError::Create {
            path: path.to_path_buf(),
            source,
        });
    }

    info!(pid, file = %path.display(), "pid file written");
    Ok(PidFile {
        path: path.to_path_buf(),
        pid,
    })
}

/// Signal 0 probe; `EPERM` still means the process exists.
pub fn is_alive(pid: i32) -> Result<bool, PidFileError> {
    if pid <= 0 {
        return Ok(false);
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(source) => Err(PidFileError::Probe { pid, source }),
    }
}
