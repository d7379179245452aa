//! Background worker supervision.
//!
//! Spawns the auth and sync workers as detached processes, records their
//! PIDs under `~/.feishu-sync/`, and stops them on request. The sync
//! worker is this binary re-executed with `run`; the auth worker is the
//! external `feishu-auth` helper that maintains the token file.

use anyhow::{bail, Result};
use fs2::FileExt;
use std::fs;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

/// External helper binary that acquires and refreshes the bearer token.
pub const AUTH_HELPER: &str = "feishu-auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Worker {
    Auth,
    Sync,
}

impl Worker {
    pub fn name(&self) -> &'static str {
        match self {
            Worker::Auth => "auth",
            Worker::Sync => "sync",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPaths {
    pub runtime_dir: PathBuf,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub lock_file: PathBuf,
}

/// Predictable runtime paths for a worker.
pub fn worker_paths(worker: Worker) -> WorkerPaths {
    let runtime_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".feishu-sync");
    WorkerPaths {
        pid_file: runtime_dir.join(format!("{}.pid", worker.name())),
        log_file: runtime_dir.join(format!("{}.log", worker.name())),
        lock_file: runtime_dir.join(format!("{}.lock", worker.name())),
        runtime_dir,
    }
}

/// Spawn a worker detached, with output appended to its log file.
pub fn start(worker: Worker, config_path: &Path) -> Result<()> {
    let paths = worker_paths(worker);
    fs::create_dir_all(&paths.runtime_dir)?;

    if let Some(pid) = read_pid(&paths.pid_file)? {
        if is_pid_running(pid) {
            bail!(
                "{} worker already running with pid {pid}; stop it first",
                worker.name()
            );
        }
        let _ = fs::remove_file(&paths.pid_file);
    }

    let out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.log_file)?;
    let err = out.try_clone()?;

    let mut command = match worker {
        Worker::Sync => {
            let exe = std::env::current_exe()?;
            let mut command = Command::new(exe);
            command.arg("--config").arg(config_path).arg("run");
            command
        }
        Worker::Auth => {
            let mut command = Command::new(AUTH_HELPER);
            command.arg("--config").arg(config_path);
            command
        }
    };

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::from(out))
        .stderr(Stdio::from(err))
        .spawn()?;

    fs::write(&paths.pid_file, child.id().to_string())?;
    println!("{} worker started", worker.name());
    println!("- pid: {}", child.id());
    println!("- log: {}", paths.log_file.display());
    Ok(())
}

/// Stop a worker if it is running; stale PID files are cleaned up.
pub fn stop(worker: Worker) -> Result<()> {
    let paths = worker_paths(worker);

    let Some(pid) = read_pid(&paths.pid_file)? else {
        println!("{} worker is not running", worker.name());
        return Ok(());
    };

    if !is_pid_running(pid) {
        let _ = fs::remove_file(&paths.pid_file);
        println!("{} worker was not running (stale pid file cleaned)", worker.name());
        return Ok(());
    }

    terminate_pid(pid)?;
    wait_for_pid_exit(pid, Duration::from_secs(4));
    let _ = fs::remove_file(&paths.pid_file);
    let _ = fs::remove_file(&paths.lock_file);
    println!("{} worker stopped (pid {pid})", worker.name());
    Ok(())
}

/// Print running/stopped for a worker.
pub fn status(worker: Worker) -> Result<()> {
    let paths = worker_paths(worker);
    match read_pid(&paths.pid_file)? {
        Some(pid) if is_pid_running(pid) => {
            println!("{} worker: running", worker.name());
            println!("- pid: {pid}");
            println!("- log: {}", paths.log_file.display());
        }
        Some(pid) => {
            println!("{} worker: stopped (stale pid {pid})", worker.name());
            let _ = fs::remove_file(&paths.pid_file);
        }
        None => println!("{} worker: stopped", worker.name()),
    }
    Ok(())
}

/// Guard held by a foreground worker so a second instance cannot start.
pub struct RunLock {
    _lock_file: File,
    pid_file: PathBuf,
}

impl RunLock {
    /// Take the sync worker's exclusive lock and record our PID.
    pub fn acquire() -> Result<Self> {
        let paths = worker_paths(Worker::Sync);
        fs::create_dir_all(&paths.runtime_dir)?;
        let lock_file = File::create(&paths.lock_file)?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| anyhow::anyhow!("another sync worker already holds the lock"))?;
        fs::write(&paths.pid_file, std::process::id().to_string())?;
        Ok(Self {
            _lock_file: lock_file,
            pid_file: paths.pid_file,
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.pid_file);
        // The OS lock releases when the file handle drops.
    }
}

pub fn read_pid(path: &Path) -> Result<Option<u32>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    Ok(raw.trim().parse::<u32>().ok())
}

pub fn is_pid_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

fn terminate_pid(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let status = Command::new("kill").arg(pid.to_string()).status()?;
        if !status.success() {
            bail!("failed to terminate worker pid {pid}");
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        bail!("worker stop is only implemented on unix in this build")
    }
}

fn wait_for_pid_exit(pid: u32, timeout: Duration) {
    let step = Duration::from_millis(50);
    let mut waited = Duration::ZERO;
    while waited < timeout {
        if !is_pid_running(pid) {
            return;
        }
        std::thread::sleep(step);
        waited += step;
    }
}
