//! PTY (Pseudoterminal) session handling
//!
//! This module provides functionality for creating a pseudoterminal,
//! spawning a child process on its slave side, and driving the master side.
//!
//! # References
//!
//! - openpty(3): https://man7.org/linux/man-pages/man3/openpty.3.html
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html
//! - termios(3): https://man7.org/linux/man-pages/man3/termios.3.html

mod command;
mod error;
mod mode;
mod session;
mod size;
mod status;

pub use command::{SpawnOptions, EXEC_FAILURE_EXIT_CODE, SETUP_FAILURE_EXIT_CODE};
pub use error::{ErrorKind, PtyError, PtyResult};
pub use mode::TerminalMode;
pub use session::{PtySession, Readiness};
pub use size::WindowSize;
pub use status::{wait_pid, ChildStatus};

pub use nix::sys::signal::Signal;
pub use nix::sys::wait::{WaitPidFlag, WaitStatus};
pub use nix::unistd::Pid;
