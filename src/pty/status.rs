//! Child process status
//!
//! `wait_pid` exposes waitpid(2) as-is. `ChildStatus` is the decoded form
//! the session hands out.

use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use super::{PtyError, PtyResult, EXEC_FAILURE_EXIT_CODE, SETUP_FAILURE_EXIT_CODE};

/// Wait for a state change of `pid`
///
/// A thin wrapper over waitpid(2): `flags` are passed through (`WNOHANG`
/// to poll, `WUNTRACED`/`WCONTINUED` to observe job control) and the
/// status is returned undecoded. EINTR is reported, not retried.
pub fn wait_pid(pid: Pid, flags: Option<WaitPidFlag>) -> PtyResult<WaitStatus> {
    waitpid(pid, flags).map_err(PtyError::Wait)
}

/// How a child changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildStatus {
    /// Exited normally with the given code
    Exited(i32),
    /// Terminated by a signal
    Signaled { signal: Signal, core_dumped: bool },
    /// Stopped by a signal (only reported with `WUNTRACED`)
    Stopped(Signal),
    /// Resumed (only reported with `WCONTINUED`)
    Continued,
}

impl ChildStatus {
    /// Decode a waitpid result; `None` when there is nothing to report
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ChildStatus::Exited(code)),
            WaitStatus::Signaled(_, signal, core_dumped) => Some(ChildStatus::Signaled {
                signal,
                core_dumped,
            }),
            WaitStatus::Stopped(_, signal) => Some(ChildStatus::Stopped(signal)),
            WaitStatus::Continued(_) => Some(ChildStatus::Continued),
            _ => None,
        }
    }

    /// Exit code, if the child exited normally
    pub fn code(&self) -> Option<i32> {
        match self {
            ChildStatus::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Terminating signal, if the child was killed
    pub fn signal(&self) -> Option<Signal> {
        match self {
            ChildStatus::Signaled { signal, .. } => Some(*signal),
            _ => None,
        }
    }

    /// Whether the child has terminated (as opposed to stopped/continued)
    pub fn is_terminated(&self) -> bool {
        matches!(self, ChildStatus::Exited(_) | ChildStatus::Signaled { .. })
    }

    pub fn success(&self) -> bool {
        matches!(self, ChildStatus::Exited(0))
    }

    /// Whether the status looks like the child never reached its program
    ///
    /// A program that itself exits with 125 or 127 cannot be told apart.
    pub fn exec_failed(&self) -> bool {
        matches!(
            self,
            ChildStatus::Exited(EXEC_FAILURE_EXIT_CODE | SETUP_FAILURE_EXIT_CODE)
        )
    }

    /// Turn an exec failure into `PtyError::ExecFailed`
    pub fn ensure_started(self) -> PtyResult<Self> {
        match self {
            ChildStatus::Exited(code) if self.exec_failed() => Err(PtyError::ExecFailed(code)),
            status => Ok(status),
        }
    }

    /// Shell-style exit code: the exit code, or 128 + signal number
    pub fn shell_code(&self) -> i32 {
        match self {
            ChildStatus::Exited(code) => *code,
            ChildStatus::Signaled { signal, .. } => 128 + *signal as i32,
            ChildStatus::Stopped(_) | ChildStatus::Continued => 0,
        }
    }
}
