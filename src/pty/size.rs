//! Window size for PTY

use std::os::fd::{AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::libc;

use super::{PtyError, PtyResult};

/// Terminal geometry in character cells
///
/// Pixel dimensions are not tracked; they are always zero in the kernel's
/// view of the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSize {
    /// Number of columns (characters)
    pub cols: u16,
    /// Number of rows (characters)
    pub rows: u16,
}

impl WindowSize {
    /// Create a new window size
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Convert to libc winsize structure
    pub fn to_winsize(self) -> libc::winsize {
        libc::winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }

    /// Read the kernel's window size for a terminal file descriptor
    pub fn of_fd(fd: BorrowedFd<'_>) -> PtyResult<Self> {
        let mut winsize = libc::winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: TIOCGWINSZ writes a winsize into the pointed-to struct
        let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut winsize) };

        if result < 0 {
            Err(PtyError::GetWindowSize(Errno::last()))
        } else {
            Ok(Self::from(winsize))
        }
    }

    /// Apply this window size to a terminal file descriptor
    pub(crate) fn apply_to(self, fd: BorrowedFd<'_>) -> PtyResult<()> {
        let winsize = self.to_winsize();

        // SAFETY: TIOCSWINSZ only reads the pointed-to winsize
        let result = unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &winsize) };

        if result < 0 {
            Err(PtyError::SetWindowSize(Errno::last()))
        } else {
            Ok(())
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            cols: ws.ws_col,
            rows: ws.ws_row,
        }
    }
}

impl From<(u16, u16)> for WindowSize {
    fn from((cols, rows): (u16, u16)) -> Self {
        Self::new(cols, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::{openpty, Winsize};
    use nix::sys::termios::Termios;
    use std::os::fd::AsFd;

    #[test]
    fn test_window_size_default() {
        let size = WindowSize::default();
        assert_eq!(size.cols, 80);
        assert_eq!(size.rows, 24);
    }

    #[test]
    fn test_to_winsize_zeroes_pixels() {
        let ws = WindowSize::new(132, 43).to_winsize();
        assert_eq!(ws.ws_col, 132);
        assert_eq!(ws.ws_row, 43);
        assert_eq!(ws.ws_xpixel, 0);
        assert_eq!(ws.ws_ypixel, 0);
    }

    #[test]
    fn test_from_tuple() {
        assert_eq!(WindowSize::from((100, 30)), WindowSize::new(100, 30));
    }

    #[test]
    fn test_apply_and_read_back() {
        let pair = openpty(None::<&Winsize>, None::<&Termios>).expect("Failed to open PTY");
        WindowSize::new(120, 40)
            .apply_to(pair.master.as_fd())
            .expect("Failed to set size");

        assert_eq!(
            WindowSize::of_fd(pair.master.as_fd()).unwrap(),
            WindowSize::new(120, 40)
        );
        // The slave side sees the same geometry
        assert_eq!(
            WindowSize::of_fd(pair.slave.as_fd()).unwrap(),
            WindowSize::new(120, 40)
        );
    }
}
