//! Command execution with a deadline.
//!
//! External helpers (the name resolver, the notifier) are ordinary programs.
//! They run with stdin closed; if one exceeds its deadline it is killed so the
//! poll loop never waits on it.

use std::env;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};

/// Runs `program` with `args`, killing it if it has not exited after `timeout`.
pub fn run_bounded(program: &str, args: &[String], timeout: Duration) -> Result<Output> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .command_context(program)?;
    let pid = child.id();

    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("wait-{program}"))
        .spawn(move || {
            let _ = tx.send(child.wait_with_output());
        })
        .command_context(format!("wait for {program}"))?;

    settle(program, pid, timeout, rx.recv_timeout(timeout))
}

/// Maps what the wait thread delivered to the command's result.
fn settle(
    program: &str,
    pid: u32,
    timeout: Duration,
    received: std::result::Result<io::Result<Output>, mpsc::RecvTimeoutError>,
) -> Result<Output> {
    match received {
        Ok(output) => output.command_context(program),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Generic {
            message: format!("wait thread for {program} terminated unexpectedly"),
            source: None,
        }),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!(program, pid, error = %e, "failed to kill timed out command");
            }
            Err(Error::Timeout {
                operation: program.to_string(),
                timeout,
            })
        }
    }
}

/// Spawns `program` without waiting for it; the child is reaped in the background.
pub fn spawn_detached(program: &str, args: &[String]) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .command_context(program)?;

    let name = program.to_string();
    thread::Builder::new()
        .name(format!("reap-{program}"))
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => debug!(program = %name, %status, "helper exited"),
            Ok(_) => {}
            Err(e) => debug!(program = %name, error = %e, "failed to wait for helper"),
        })
        .command_context(format!("reap {program}"))?;
    Ok(())
}

/// Locates `program` the way the shell would: as a path when it contains a
/// slash, otherwise by searching `PATH`.
pub fn find_program(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return is_executable(&path).then_some(path);
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Checks that every program the configuration relies on is installed.
///
/// The resolver is a hard dependency once configured. The notifier is
/// best-effort and only warned about.
pub fn ensure_dependencies(config: &Config) -> Result<()> {
    if let Some(program) = config.resolver.command.first()
        && find_program(program).is_none()
    {
        return Err(Error::MissingDependency {
            tool: program.clone(),
        });
    }

    if config.notifications.enabled
        && let Some(program) = config.notifications.command.first()
        && find_program(program).is_none()
    {
        warn!(program = %program, "notification program not found, notifications will fail");
    }

    Ok(())
}
