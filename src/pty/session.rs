//! PTY session
//!
//! A [`PtySession`] owns the master side of a pseudoterminal and the pid of
//! the child running on its slave side.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, OFlag};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::WaitPidFlag;
use nix::unistd::{self, close, fork, tcgetpgrp, ForkResult, Pid};

use super::command::PreparedCommand;
use super::{
    wait_pid, ChildStatus, PtyError, PtyResult, SpawnOptions, TerminalMode, WindowSize,
};

/// How often `wait_timeout` polls the child
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Result of a zero-timeout readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A read would not block: data is pending or the peer hung up
    Ready,
    /// No data is pending
    NotReady,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Readiness::Ready
    }
}

/// A pseudoterminal with a spawned child process
#[derive(Debug)]
pub struct PtySession {
    /// The PTY master; `None` once closed
    master: Option<OwnedFd>,
    /// The child process ID
    child_pid: Pid,
}

impl PtySession {
    /// Allocate a PTY, fork, and run the requested program on its slave side
    ///
    /// The slave gets the [`TerminalMode::CANONICAL`] profile and the
    /// requested window size before the fork. The child becomes a session
    /// leader with the slave as controlling terminal and stdio, applies the
    /// environment overrides in order, and execs the program.
    ///
    /// A program that cannot be executed is not reported here: the child
    /// exits with [`EXEC_FAILURE_EXIT_CODE`](super::EXEC_FAILURE_EXIT_CODE),
    /// visible through [`wait`](Self::wait).
    pub fn spawn(options: &SpawnOptions) -> PtyResult<Self> {
        let command = PreparedCommand::new(options)?;

        let (master, slave) = open_pair()?;
        options.get_size().apply_to(master.as_fd())?;
        TerminalMode::CANONICAL.apply_to(slave.as_fd())?;

        // SAFETY: the child branch only runs PreparedCommand::exec_child,
        // which never returns and does not allocate
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => {
                drop(master);
                command.exec_child(slave)
            },
            ForkResult::Parent { child } => {
                // The child holds its own copy; ours would keep the
                // terminal open after the child exits
                drop(slave);

                tracing::debug!(
                    pid = child.as_raw(),
                    program = %options.get_program().to_string_lossy(),
                    cols = options.get_size().cols,
                    rows = options.get_size().rows,
                    "spawned PTY session"
                );

                Ok(PtySession {
                    master: Some(master),
                    child_pid: child,
                })
            },
        }
    }

    /// Get the child process ID
    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// Borrow the PTY master, failing once the session is closed
    pub fn master(&self) -> PtyResult<BorrowedFd<'_>> {
        self.master
            .as_ref()
            .map(AsFd::as_fd)
            .ok_or(PtyError::Closed)
    }

    /// Get the raw file descriptor of the PTY master, if still open
    pub fn master_fd(&self) -> Option<RawFd> {
        self.master.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_closed(&self) -> bool {
        self.master.is_none()
    }

    /// Check, without waiting, whether a read would return immediately
    pub fn peek(&self) -> PtyResult<Readiness> {
        let master = self.master()?;
        let mut fds = [PollFd::new(master, PollFlags::POLLIN)];
        let n = poll(&mut fds, PollTimeout::ZERO).map_err(PtyError::Poll)?;
        if n == 0 {
            return Ok(Readiness::NotReady);
        }

        let revents = fds[0].revents().unwrap_or(PollFlags::empty());
        if revents.contains(PollFlags::POLLNVAL) {
            return Err(PtyError::Poll(Errno::EBADF));
        }
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::NotReady)
        }
    }

    /// Read from the PTY master
    ///
    /// Blocks until at least one byte is available unless the master is in
    /// non-blocking mode. Returns 0 once the child side is gone: Linux
    /// reports that as EIO, which is folded into end-of-file here.
    ///
    /// An empty `buf` returns 0 without touching the master, so a zero only
    /// means end-of-file when `buf` had room.
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        let fd = self.master()?.as_raw_fd();
        if buf.is_empty() {
            return Ok(0);
        }

        match unistd::read(fd, buf) {
            Ok(n) => Ok(n),
            Err(Errno::EIO) => {
                tracing::trace!(pid = self.child_pid.as_raw(), "PTY slave closed (EIO)");
                Ok(0)
            },
            Err(e) => Err(PtyError::Read(e)),
        }
    }

    /// Write to the PTY master
    ///
    /// Returns the number of bytes written, which may be less than
    /// `data.len()`.
    pub fn write(&self, data: &[u8]) -> PtyResult<usize> {
        match unistd::write(self.master()?, data) {
            Ok(n) => Ok(n),
            Err(Errno::EIO) => Err(PtyError::PeerClosed),
            Err(e) => Err(PtyError::Write(e)),
        }
    }

    /// Write all data to the PTY master
    pub fn write_all(&self, mut data: &[u8]) -> PtyResult<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(0) => return Err(PtyError::PeerClosed),
                Ok(n) => data = &data[n..],
                Err(PtyError::Write(Errno::EINTR)) => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Resize the PTY
    ///
    /// The kernel sends SIGWINCH to the foreground process group when the
    /// size changes. It stays silent when the size is unchanged, so in that
    /// case the signal is sent here.
    pub fn resize(&self, size: WindowSize) -> PtyResult<()> {
        let master = self.master()?;
        let previous = WindowSize::of_fd(master)?;
        size.apply_to(master)?;

        tracing::debug!(
            pid = self.child_pid.as_raw(),
            cols = size.cols,
            rows = size.rows,
            "resized PTY"
        );

        if previous == size {
            if let Ok(pgrp) = tcgetpgrp(master) {
                let _ = killpg(pgrp, Signal::SIGWINCH);
            }
        }
        Ok(())
    }

    /// The window size the kernel currently reports
    pub fn window_size(&self) -> PtyResult<WindowSize> {
        WindowSize::of_fd(self.master()?)
    }

    /// Switch the PTY master between blocking and non-blocking mode
    pub fn set_nonblocking(&self, nonblocking: bool) -> PtyResult<()> {
        let fd = self.master()?.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(PtyError::SetNonBlocking)?;
        let flags = OFlag::from_bits_truncate(flags);
        let flags = if nonblocking {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };
        fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(PtyError::SetNonBlocking)?;
        Ok(())
    }

    /// Wait for the child process to terminate
    pub fn wait(&self) -> PtyResult<ChildStatus> {
        loop {
            let status = wait_pid(self.child_pid, None)?;
            if let Some(status) = ChildStatus::from_wait_status(status) {
                return Ok(status);
            }
        }
    }

    /// Reap the child if it has terminated, without blocking
    pub fn try_wait(&self) -> PtyResult<Option<ChildStatus>> {
        let status = wait_pid(self.child_pid, Some(WaitPidFlag::WNOHANG))?;
        Ok(ChildStatus::from_wait_status(status))
    }

    /// Wait up to `timeout` for the child to terminate
    pub fn wait_timeout(&self, timeout: Duration) -> PtyResult<Option<ChildStatus>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.try_wait()? {
                return Ok(Some(status));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Send a signal to the child process
    pub fn signal(&self, signal: Signal) -> PtyResult<()> {
        kill(self.child_pid, signal).map_err(PtyError::Signal)
    }

    /// Kill the child process (SIGKILL); it still has to be waited for
    pub fn kill(&self) -> PtyResult<()> {
        self.signal(Signal::SIGKILL)
    }

    /// Close the PTY master
    ///
    /// The child is neither signalled nor reaped. Closing twice fails.
    pub fn close(&mut self) -> PtyResult<()> {
        let master = self.master.take().ok_or(PtyError::Closed)?;
        tracing::debug!(pid = self.child_pid.as_raw(), "closing PTY master");
        close(master.into_raw_fd()).map_err(PtyError::Close)
    }
}

/// Allocate a PTY pair with both ends close-on-exec from the start
///
/// Programs forked and exec'd by other threads never inherit the slave, which
/// would otherwise hold the terminal open after our child exits.
fn open_pair() -> PtyResult<(OwnedFd, OwnedFd)> {
    let master = open_master()?;
    grantpt(&master).map_err(PtyError::OpenPty)?;
    unlockpt(&master).map_err(PtyError::OpenPty)?;
    let slave_name = slave_name(&master)?;

    // SAFETY: posix_openpt returned a fresh descriptor owned by `master`
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    let slave = open(
        slave_name.as_str(),
        OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .map_err(PtyError::OpenPty)?;
    // SAFETY: open returned a fresh descriptor nothing else owns
    let slave = unsafe { OwnedFd::from_raw_fd(slave) };

    Ok((master, slave))
}

#[cfg(target_os = "linux")]
fn open_master() -> PtyResult<PtyMaster> {
    posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC).map_err(PtyError::OpenPty)
}

// posix_openpt rejects O_CLOEXEC outside Linux
#[cfg(not(target_os = "linux"))]
fn open_master() -> PtyResult<PtyMaster> {
    use nix::fcntl::FdFlag;

    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenPty)?;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))
        .map_err(PtyError::CloseOnExec)?;
    Ok(master)
}

#[cfg(target_os = "linux")]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    nix::pty::ptsname_r(master).map_err(PtyError::OpenPty)
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: &PtyMaster) -> PtyResult<String> {
    // SAFETY: the name is copied out of ptsname's static buffer at once
    unsafe { nix::pty::ptsname(master) }.map_err(PtyError::OpenPty)
}

impl AsRawFd for PtySession {
    /// The master descriptor, or -1 once closed
    fn as_raw_fd(&self) -> RawFd {
        self.master_fd().unwrap_or(-1)
    }
}

impl io::Read for PtySession {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        PtySession::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Write for PtySession {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PtySession::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::ErrorKind;

    /// Read until `needle` shows up or the deadline passes
    fn read_until(session: &PtySession, needle: &str, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        let mut buf = [0u8; 1024];
        while Instant::now() < deadline {
            if !session.peek().unwrap().is_ready() {
                std::thread::sleep(Duration::from_millis(10));
                continue;
            }
            match session.read(&mut buf).unwrap() {
                0 => break,
                n => output.extend_from_slice(&buf[..n]),
            }
            if String::from_utf8_lossy(&output).contains(needle) {
                break;
            }
        }
        String::from_utf8_lossy(&output).into_owned()
    }

    #[test]
    fn test_pair_is_close_on_exec() {
        use nix::fcntl::FdFlag;

        let (master, slave) = open_pair().expect("Failed to open PTY pair");
        for fd in [master.as_raw_fd(), slave.as_raw_fd()] {
            let flags = FdFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFD).unwrap());
            assert!(flags.contains(FdFlag::FD_CLOEXEC), "fd {fd} is inherited by exec");
        }
        assert!(unistd::isatty(slave.as_raw_fd()).unwrap());
    }

    #[test]
    fn test_empty_read_does_not_block() {
        let session = PtySession::spawn(&SpawnOptions::new("/bin/sleep").arg("5"))
            .expect("Failed to spawn PTY");

        // Nothing is pending, so a real read would block
        assert_eq!(session.peek().unwrap(), Readiness::NotReady);
        assert_eq!(session.read(&mut []).unwrap(), 0);

        session.kill().unwrap();
        session.wait().unwrap();
    }

    #[test]
    fn test_spawn_echo() {
        let session = PtySession::spawn(&SpawnOptions::new("/bin/echo").arg("hello"))
            .expect("Failed to spawn PTY");
        assert!(session.child_pid().as_raw() > 0);

        let output = read_until(&session, "hello", Duration::from_secs(5));
        assert!(output.contains("hello\r\n"), "Unexpected output: {output:?}");

        assert_eq!(session.wait().unwrap(), ChildStatus::Exited(0));
    }

    #[test]
    fn test_initial_window_size() {
        let session = PtySession::spawn(
            &SpawnOptions::new("/bin/sleep")
                .arg("5")
                .size(WindowSize::new(132, 43)),
        )
        .expect("Failed to spawn PTY");

        assert_eq!(session.window_size().unwrap(), WindowSize::new(132, 43));

        session.kill().unwrap();
        session.wait().unwrap();
    }

    #[test]
    fn test_resize() {
        let session = PtySession::spawn(&SpawnOptions::new("/bin/sleep").arg("5"))
            .expect("Failed to spawn PTY");

        session.resize(WindowSize::new(120, 40)).expect("Failed to resize");
        assert_eq!(session.window_size().unwrap(), WindowSize::new(120, 40));

        // Same geometry again is fine
        session.resize(WindowSize::new(120, 40)).expect("Failed to resize");
        assert_eq!(session.window_size().unwrap(), WindowSize::new(120, 40));

        session.kill().unwrap();
        session.wait().unwrap();
    }

    #[test]
    fn test_close_invalidates_session() {
        let mut session = PtySession::spawn(&SpawnOptions::new("/bin/sleep").arg("5"))
            .expect("Failed to spawn PTY");

        session.close().expect("Failed to close");
        assert!(session.is_closed());
        assert_eq!(session.as_raw_fd(), -1);

        let err = session.resize(WindowSize::new(100, 30)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidHandle);
        assert_eq!(session.peek().unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(session.close().unwrap_err().kind(), ErrorKind::InvalidHandle);

        // Closing the master hangs up the child but does not reap it
        let _ = session.kill();
        assert!(session.wait().unwrap().is_terminated());
    }

    #[test]
    fn test_nonblocking_read_reports_would_block() {
        let session = PtySession::spawn(&SpawnOptions::new("/bin/sleep").arg("5"))
            .expect("Failed to spawn PTY");
        session.set_nonblocking(true).unwrap();

        let mut buf = [0u8; 64];
        let err = session.read(&mut buf).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EAGAIN));

        session.set_nonblocking(false).unwrap();
        session.kill().unwrap();
        session.wait().unwrap();
    }

    #[test]
    fn test_wait_timeout() {
        let session = PtySession::spawn(&SpawnOptions::new("/bin/sleep").arg("5"))
            .expect("Failed to spawn PTY");

        assert_eq!(
            session.wait_timeout(Duration::from_millis(50)).unwrap(),
            None
        );

        session.signal(Signal::SIGTERM).unwrap();
        let status = session
            .wait_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("child did not exit");
        assert_eq!(status.signal(), Some(Signal::SIGTERM));
    }
}
