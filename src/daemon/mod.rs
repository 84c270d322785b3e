//! Process supervision.
//!
//! `Supervisor::start` forks a detached daemon that holds the PID file and
//! keeps exactly one worker process alive. Workers exit when they hit their
//! request cap, on a fatal loop error, or when told to; the daemon then forks
//! a fresh one. Signals only set flags; the daemon polls them between
//! `waitpid` checks.

pub mod pidfile;

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::{Mode, umask};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{ForkResult, Group, Pid, User, fork, setgid, setsid, setuid};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{ConfigError, DaemonConfig};
pub use pidfile::{PidFile, PidFileError};

/// Delay before respawning a worker that failed.
pub const RESPAWN_BACKOFF: Duration = Duration::from_secs(1);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    PidFile(#[from] PidFileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("already running with pid {pid}")]
    AlreadyRunning { pid: i32 },
    #[error("no running daemon recorded in {0}")]
    NotRunning(String),
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
    #[error("setsid failed: {0}")]
    Setsid(#[source] Errno),
    #[error("unknown user {0:?}")]
    UnknownUser(String),
    #[error("unknown group {0:?}")]
    UnknownGroup(String),
    #[error("failed to switch to {what}: {source}")]
    Privileges {
        what: String,
        #[source]
        source: Errno,
    },
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),
    #[error("waiting for worker {pid} failed: {source}")]
    Wait {
        pid: i32,
        #[source]
        source: Errno,
    },
    #[error("failed to signal process {pid}: {source}")]
    Kill {
        pid: i32,
        #[source]
        source: Errno,
    },
    #[error("process {pid} did not exit within {timeout:?}")]
    StopTimeout { pid: i32, timeout: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerExit {
    Exited(i32),
    Signaled(Signal),
}

impl WorkerExit {
    fn failed(self) -> bool {
        match self {
            WorkerExit::Exited(code) => code != 0,
            WorkerExit::Signaled(signal) => signal != Signal::SIGTERM,
        }
    }
}

/// Termination and reload requests raised by signal handlers.
#[derive(Debug, Clone, Default)]
struct SignalFlags {
    terminate: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl SignalFlags {
    fn install() -> Result<Self, DaemonError> {
        let flags = Self::default();
        for signal in [SIGTERM, SIGINT] {
            signal_hook::flag::register(signal, Arc::clone(&flags.terminate))
                .map_err(DaemonError::Signals)?;
        }
        signal_hook::flag::register(SIGHUP, Arc::clone(&flags.reload))
            .map_err(DaemonError::Signals)?;
        Ok(flags)
    }

    fn terminating(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    fn take_reload(&self) -> bool {
        self.reload.swap(false, Ordering::SeqCst)
    }
}

pub struct Supervisor {
    config: DaemonConfig,
}

impl Supervisor {
    pub fn new(config: DaemonConfig) -> Self {
        Self { config }
    }

    /// Forks the daemon and returns its pid.
    ///
    /// The daemon never returns from this call: it supervises workers that
    /// each run `worker` and exit with the code it returns.
    pub fn start<W>(&self, worker: W) -> Result<i32, DaemonError>
    where
        W: Fn() -> i32,
    {
        if let Some(pid) = PidFile::running(&self.config.pid_file)? {
            return Err(DaemonError::AlreadyRunning { pid });
        }
        let umask_mode = self.config.umask_mode()?;

        // SAFETY: no runtime or other threads exist yet in this process.
        match unsafe { fork() }.map_err(DaemonError::Fork)? {
            ForkResult::Parent { child } => {
                info!(pid = child.as_raw(), "daemon started");
                Ok(child.as_raw())
            }
            ForkResult::Child => {
                let code = match self.run_daemon(umask_mode, &worker) {
                    Ok(()) => 0,
                    Err(e) => {
                        error!(error = %e, "daemon failed");
                        1
                    }
                };
                std::process::exit(code);
            }
        }
    }

    fn run_daemon<W>(&self, umask_mode: Option<u32>, worker: &W) -> Result<(), DaemonError>
    where
        W: Fn() -> i32,
    {
        setsid().map_err(DaemonError::Setsid)?;
        if let Some(mode) = umask_mode {
            umask(Mode::from_bits_truncate(mode));
        }
        drop_privileges(self.config.group.as_deref(), self.config.user.as_deref())?;

        let pid_file = PidFile::acquire(&self.config.pid_file)?;
        let flags = SignalFlags::install()?;

        info!(pid = pid_file.pid(), "supervising workers");

        while !flags.terminating() {
            let child = spawn_worker(worker)?;
            let exit = watch_worker(child, &flags)?;
            info!(pid = child.as_raw(), ?exit, "worker exited");

            if flags.terminating() {
                break;
            }
            if exit.failed() {
                warn!(backoff = ?RESPAWN_BACKOFF, "worker failed, respawning");
                thread::sleep(RESPAWN_BACKOFF);
            }
        }

        info!("daemon stopping");
        drop(pid_file);
        Ok(())
    }
}

fn spawn_worker<W>(worker: &W) -> Result<Pid, DaemonError>
where
    W: Fn() -> i32,
{
    // SAFETY: the supervising process is single-threaded.
    match unsafe { fork() }.map_err(DaemonError::Fork)? {
        ForkResult::Parent { child } => {
            info!(pid = child.as_raw(), "worker spawned");
            Ok(child)
        }
        ForkResult::Child => std::process::exit(worker()),
    }
}

/// Waits for `child`, forwarding SIGTERM once a stop or reload is requested.
fn watch_worker(child: Pid, flags: &SignalFlags) -> Result<WorkerExit, DaemonError> {
    let mut forwarded = false;

    loop {
        match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(WorkerExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(WorkerExit::Signaled(signal)),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(source) => {
                return Err(DaemonError::Wait {
                    pid: child.as_raw(),
                    source,
                });
            }
        }

        let reload = flags.take_reload();
        if reload {
            info!(pid = child.as_raw(), "reload requested");
        }
        if !forwarded && (reload || flags.terminating()) {
            match kill(child, Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => forwarded = true,
                Err(source) => {
                    return Err(DaemonError::Kill {
                        pid: child.as_raw(),
                        source,
                    });
                }
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Switches group first, then user; names are resolved via the system
/// databases.
pub fn drop_privileges(group: Option<&str>, user: Option<&str>) -> Result<(), DaemonError> {
    if let Some(name) = group {
        let group = Group::from_name(name)
            .ok()
            .flatten()
            .ok_or_else(|| DaemonError::UnknownGroup(name.to_string()))?;
        setgid(group.gid).map_err(|source| DaemonError::Privileges {
            what: format!("group {name}"),
            source,
        })?;
    }

    if let Some(name) = user {
        let user = User::from_name(name)
            .ok()
            .flatten()
            .ok_or_else(|| DaemonError::UnknownUser(name.to_string()))?;
        setuid(user.uid).map_err(|source| DaemonError::Privileges {
            what: format!("user {name}"),
            source,
        })?;
    }

    Ok(())
}

/// Sends `signal` to the daemon recorded in `pid_file`.
pub fn signal_daemon(pid_file: &Path, signal: Signal) -> Result<i32, DaemonError> {
    let pid = PidFile::running(pid_file)?
        .ok_or_else(|| DaemonError::NotRunning(pid_file.display().to_string()))?;

    kill(Pid::from_raw(pid), signal).map_err(|source| DaemonError::Kill { pid, source })?;
    info!(pid, ?signal, "signal sent");
    Ok(pid)
}

/// Blocks until the PID file is gone or names a dead process.
pub fn wait_for_exit(pid_file: &Path, pid: i32, timeout: Duration) -> Result<(), DaemonError> {
    let deadline = Instant::now() + timeout;

    while PidFile::running(pid_file)?.is_some() {
        if Instant::now() >= deadline {
            return Err(DaemonError::StopTimeout { pid, timeout });
        }
        thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}
