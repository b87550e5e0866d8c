//! Process signalling utilities
//!
//! Persistent sessions outlive the `ekssm` invocation that started them, so a
//! later `stop` only knows the plugin's PID. These helpers probe and signal
//! processes by PID.

use std::io;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::{EkssmError, Result};

/// Interval between liveness probes while waiting for exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signals ekssm sends to forwarding processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// SIGINT, the plugin's own clean-shutdown trigger
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGKILL
    Kill,
}

impl Signal {
    #[cfg(unix)]
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Interrupt => libc::SIGINT,
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// How a termination request played out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// No such process; it exited before we got to it
    AlreadyExited,
    /// Exited within the grace period after SIGTERM
    Exited,
    /// SIGTERM was delivered but the process was still running after the grace period
    Signalled,
    /// SIGTERM delivery failed and SIGKILL was sent instead
    Killed,
}

/// Timing for [`terminate`]
#[derive(Debug, Clone, Copy)]
pub struct TerminateOptions {
    /// How long to wait for exit after a delivered SIGTERM
    pub grace_period: Duration,
    /// Delay before SIGKILL when SIGTERM could not be delivered
    pub kill_delay: Duration,
}

impl From<&crate::config::Config> for TerminateOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            grace_period: config.stop_grace_period,
            kill_delay: config.kill_delay,
        }
    }
}

/// Check if a process with the given PID is still alive
///
/// Uses kill(pid, 0); EPERM means the process exists but belongs to someone else.
#[cfg(unix)]
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: kill with signal 0 performs only the existence/permission check.
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: i32) -> bool {
    false
}

/// Send `signal` to `pid`
#[cfg(unix)]
pub fn send_signal(pid: i32, signal: Signal) -> io::Result<()> {
    if pid <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("refusing to signal pid {}", pid),
        ));
    }
    // SAFETY: plain kill(2) on a positive PID; no memory is shared with the callee.
    let result = unsafe { libc::kill(pid as libc::pid_t, signal.as_raw()) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_pid: i32, signal: Signal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{:?} is not supported on this platform", signal),
    ))
}

/// Gracefully terminate a process by PID.
///
/// Sends SIGTERM and waits up to the grace period for the process to exit.
/// SIGKILL is only used when SIGTERM cannot be delivered; a process that
/// accepts SIGTERM but outlives the grace period is left to finish on its own.
pub async fn terminate(pid: i32, opts: TerminateOptions) -> Result<TerminateOutcome> {
    if !is_process_alive(pid) {
        tracing::warn!("Process {} not found (already stopped?)", pid);
        return Ok(TerminateOutcome::AlreadyExited);
    }

    tracing::debug!("Sending SIGTERM to process {}", pid);
    match send_signal(pid, Signal::Terminate) {
        Ok(()) => {
            if wait_for_exit(pid, opts.grace_period).await {
                tracing::debug!("Process {} exited", pid);
                Ok(TerminateOutcome::Exited)
            } else {
                tracing::debug!(
                    "Process {} still running {:?} after SIGTERM",
                    pid,
                    opts.grace_period
                );
                Ok(TerminateOutcome::Signalled)
            }
        }
        Err(e) => {
            tracing::warn!("Failed to send SIGTERM to {}: {}. Attempting SIGKILL.", pid, e);
            sleep(opts.kill_delay).await;
            send_signal(pid, Signal::Kill).map_err(|kill_err| {
                EkssmError::Process(format!("failed to kill process {}: {}", pid, kill_err))
            })?;
            tracing::debug!("Sent SIGKILL to process {}", pid);
            Ok(TerminateOutcome::Killed)
        }
    }
}

/// Poll until `pid` is gone or `limit` elapses; returns whether it exited
pub async fn wait_for_exit(pid: i32, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if !is_process_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
}
