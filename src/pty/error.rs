//! Error types for PTY operations.

use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// PTY-related errors
///
/// Each variant names the step that failed and carries the OS error number
/// unchanged. Use [`PtyError::kind`] to classify it.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open PTY pair: {0}")]
    OpenPty(#[source] Errno),

    #[error("Failed to set terminal attributes: {0}")]
    Termios(#[source] Errno),

    #[error("Failed to set close-on-exec on PTY master: {0}")]
    CloseOnExec(#[source] Errno),

    #[error("Failed to fork: {0}")]
    Fork(#[source] Errno),

    #[error("Invalid spawn argument: {0}")]
    InvalidArgument(String),

    #[error("Child could not execute its program (exit status {0})")]
    ExecFailed(i32),

    #[error("Failed to poll PTY master: {0}")]
    Poll(#[source] Errno),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] Errno),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] Errno),

    #[error("Failed to set window size: {0}")]
    SetWindowSize(#[source] Errno),

    #[error("Failed to get window size: {0}")]
    GetWindowSize(#[source] Errno),

    #[error("Failed to set non-blocking mode: {0}")]
    SetNonBlocking(#[source] Errno),

    #[error("Failed to signal child: {0}")]
    Signal(#[source] Errno),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] Errno),

    #[error("Failed to close PTY master: {0}")]
    Close(#[source] Errno),

    #[error("PTY master is closed")]
    Closed,

    #[error("PTY peer closed")]
    PeerClosed,
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Coarse classification of a [`PtyError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The OS could not allocate a PTY pair or a process.
    ResourceExhausted,
    /// The child could not replace its image with the requested program.
    ProcessSpawnFailure,
    /// The descriptor or pid is closed, unknown, or already reaped.
    InvalidHandle,
    /// A system call was interrupted; the caller may retry.
    Interrupted,
    /// The slave side is gone (the child exited).
    PeerClosed,
    /// An argument could not be passed to the OS (embedded NUL).
    InvalidArgument,
    /// Any other OS failure.
    Other,
}

impl PtyError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PtyError::OpenPty(_) | PtyError::Fork(_) => ErrorKind::ResourceExhausted,
            PtyError::ExecFailed(_) => ErrorKind::ProcessSpawnFailure,
            PtyError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            PtyError::Closed => ErrorKind::InvalidHandle,
            PtyError::PeerClosed => ErrorKind::PeerClosed,
            PtyError::Write(Errno::EIO) => ErrorKind::PeerClosed,
            _ => match self.errno() {
                Some(Errno::EINTR) => ErrorKind::Interrupted,
                Some(Errno::EBADF | Errno::ECHILD | Errno::ESRCH | Errno::ENOTTY) => {
                    ErrorKind::InvalidHandle
                },
                _ => ErrorKind::Other,
            },
        }
    }

    /// The OS error number behind this error, if there is one
    pub fn errno(&self) -> Option<Errno> {
        match self {
            PtyError::OpenPty(e)
            | PtyError::Termios(e)
            | PtyError::CloseOnExec(e)
            | PtyError::Fork(e)
            | PtyError::Poll(e)
            | PtyError::Read(e)
            | PtyError::Write(e)
            | PtyError::SetWindowSize(e)
            | PtyError::GetWindowSize(e)
            | PtyError::SetNonBlocking(e)
            | PtyError::Signal(e)
            | PtyError::Wait(e)
            | PtyError::Close(e) => Some(*e),
            PtyError::Closed => Some(Errno::EBADF),
            PtyError::InvalidArgument(_) | PtyError::ExecFailed(_) | PtyError::PeerClosed => None,
        }
    }

    /// The raw OS error code, as a signed integer
    pub fn raw_os_error(&self) -> Option<i32> {
        self.errno().map(|e| e as i32)
    }
}

impl From<PtyError> for io::Error {
    fn from(err: PtyError) -> Self {
        let kind = match err.kind() {
            ErrorKind::Interrupted => io::ErrorKind::Interrupted,
            ErrorKind::PeerClosed => io::ErrorKind::BrokenPipe,
            ErrorKind::InvalidArgument => io::ErrorKind::InvalidInput,
            ErrorKind::InvalidHandle => io::ErrorKind::NotConnected,
            _ => match err.errno() {
                Some(Errno::EAGAIN) => io::ErrorKind::WouldBlock,
                _ => io::ErrorKind::Other,
            },
        };
        io::Error::new(kind, err)
    }
}
