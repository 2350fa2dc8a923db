//! Line-discipline profile applied to every new PTY slave
//!
//! The profile is a fixed, read-only record: canonical line editing with
//! echo, signal generation, software flow control and UTF-8 aware erase,
//! 8-bit characters at 38400 baud.

use std::os::fd::BorrowedFd;

use nix::libc;
use nix::sys::termios::{
    self, BaudRate, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg,
    SpecialCharacterIndices as Cc, Termios,
};

use super::{PtyError, PtyResult};

/// Value that disables a control character slot
#[cfg(target_os = "linux")]
const DISABLED: libc::cc_t = 0;
#[cfg(not(target_os = "linux"))]
const DISABLED: libc::cc_t = 0xff;

/// Control character assignments, indexed by termios slot
#[cfg(not(target_os = "macos"))]
const CONTROL_CHARS: &[(Cc, libc::cc_t)] = &[
    (Cc::VEOF, 0x04),
    (Cc::VEOL, DISABLED),
    (Cc::VEOL2, DISABLED),
    (Cc::VERASE, 0x7f),
    (Cc::VWERASE, 0x17),
    (Cc::VKILL, 0x15),
    (Cc::VREPRINT, 0x12),
    (Cc::VINTR, 0x03),
    (Cc::VQUIT, 0x1c),
    (Cc::VSUSP, 0x1a),
    (Cc::VSTART, 0x11),
    (Cc::VSTOP, 0x13),
    (Cc::VLNEXT, 0x16),
    (Cc::VDISCARD, 0x0f),
    (Cc::VMIN, 1),
    (Cc::VTIME, 0),
];

#[cfg(target_os = "macos")]
const CONTROL_CHARS: &[(Cc, libc::cc_t)] = &[
    (Cc::VEOF, 0x04),
    (Cc::VEOL, DISABLED),
    (Cc::VEOL2, DISABLED),
    (Cc::VERASE, 0x7f),
    (Cc::VWERASE, 0x17),
    (Cc::VKILL, 0x15),
    (Cc::VREPRINT, 0x12),
    (Cc::VINTR, 0x03),
    (Cc::VQUIT, 0x1c),
    (Cc::VSUSP, 0x1a),
    (Cc::VSTART, 0x11),
    (Cc::VSTOP, 0x13),
    (Cc::VLNEXT, 0x16),
    (Cc::VDISCARD, 0x0f),
    (Cc::VDSUSP, 0x19),
    (Cc::VSTATUS, 0x14),
    (Cc::VMIN, 1),
    (Cc::VTIME, 0),
];

/// A complete set of terminal attributes
#[derive(Debug, Clone, Copy)]
pub struct TerminalMode {
    pub input_flags: InputFlags,
    pub output_flags: OutputFlags,
    pub control_flags: ControlFlags,
    pub local_flags: LocalFlags,
    pub baud_rate: BaudRate,
    /// Slots not listed here are disabled
    pub control_chars: &'static [(Cc, libc::cc_t)],
}

impl TerminalMode {
    /// The profile every spawned session starts with
    pub const CANONICAL: TerminalMode = TerminalMode {
        input_flags: InputFlags::ICRNL
            .union(InputFlags::IXON)
            .union(InputFlags::IXANY)
            .union(InputFlags::IMAXBEL)
            .union(InputFlags::BRKINT)
            .union(InputFlags::IUTF8),
        output_flags: OutputFlags::OPOST.union(OutputFlags::ONLCR),
        control_flags: ControlFlags::CREAD
            .union(ControlFlags::CS8)
            .union(ControlFlags::HUPCL),
        local_flags: LocalFlags::ICANON
            .union(LocalFlags::ISIG)
            .union(LocalFlags::IEXTEN)
            .union(LocalFlags::ECHO)
            .union(LocalFlags::ECHOE)
            .union(LocalFlags::ECHOK)
            .union(LocalFlags::ECHOKE)
            .union(LocalFlags::ECHOCTL),
        baud_rate: BaudRate::B38400,
        control_chars: CONTROL_CHARS,
    };

    /// Overwrite every attribute of `termios` with this profile
    pub fn write_into(&self, termios: &mut Termios) -> PtyResult<()> {
        termios.input_flags = self.input_flags;
        termios.output_flags = self.output_flags;
        termios.control_flags = self.control_flags;
        termios.local_flags = self.local_flags;

        termios.control_chars.fill(DISABLED);
        for &(index, value) in self.control_chars {
            termios.control_chars[index as usize] = value;
        }

        // Speeds live in the control flags on Linux, so they go in last
        termios::cfsetispeed(termios, self.baud_rate).map_err(PtyError::Termios)?;
        termios::cfsetospeed(termios, self.baud_rate).map_err(PtyError::Termios)?;
        Ok(())
    }

    /// Apply this profile to a terminal device
    pub fn apply_to(&self, fd: BorrowedFd<'_>) -> PtyResult<()> {
        let mut termios = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
        self.write_into(&mut termios)?;
        termios::tcsetattr(fd, SetArg::TCSANOW, &termios).map_err(PtyError::Termios)
    }

    /// Check whether `termios` carries this profile
    pub fn matches(&self, termios: &Termios) -> bool {
        termios.input_flags == self.input_flags
            && termios.output_flags == self.output_flags
            && termios.local_flags == self.local_flags
            && termios.control_flags.contains(self.control_flags)
            && termios::cfgetispeed(termios) == self.baud_rate
            && termios::cfgetospeed(termios) == self.baud_rate
            && self
                .control_chars
                .iter()
                .all(|&(index, value)| termios.control_chars[index as usize] == value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::{openpty, Winsize};
    use std::os::fd::AsFd;

    #[test]
    fn test_canonical_profile_flags() {
        let mode = TerminalMode::CANONICAL;
        assert!(mode.local_flags.contains(LocalFlags::ICANON));
        assert!(mode.local_flags.contains(LocalFlags::ECHO));
        assert!(!mode.local_flags.contains(LocalFlags::TOSTOP));
        assert!(mode.input_flags.contains(InputFlags::IUTF8));
        assert!(!mode.input_flags.contains(InputFlags::INLCR));
        assert!(mode.output_flags.contains(OutputFlags::ONLCR));
        assert!(mode.control_flags.contains(ControlFlags::CS8));
        assert_eq!(mode.baud_rate, BaudRate::B38400);
    }

    #[test]
    fn test_control_characters() {
        let chars = TerminalMode::CANONICAL.control_chars;
        let lookup = |slot: Cc| {
            chars
                .iter()
                .find(|(index, _)| *index == slot)
                .map(|&(_, value)| value)
        };
        assert_eq!(lookup(Cc::VINTR), Some(0x03));
        assert_eq!(lookup(Cc::VEOF), Some(0x04));
        assert_eq!(lookup(Cc::VERASE), Some(0x7f));
        assert_eq!(lookup(Cc::VEOL), Some(DISABLED));
        assert_eq!(lookup(Cc::VMIN), Some(1));
        assert_eq!(lookup(Cc::VTIME), Some(0));
    }

    #[test]
    fn test_apply_to_slave() {
        let pair = openpty(None::<&Winsize>, None::<&Termios>).expect("Failed to open PTY");
        TerminalMode::CANONICAL
            .apply_to(pair.slave.as_fd())
            .expect("Failed to apply profile");

        let termios = termios::tcgetattr(pair.slave.as_fd()).unwrap();
        assert!(TerminalMode::CANONICAL.matches(&termios));
    }

    #[test]
    fn test_write_into_overwrites_raw_mode() {
        let pair = openpty(None::<&Winsize>, None::<&Termios>).expect("Failed to open PTY");
        let mut termios = termios::tcgetattr(pair.slave.as_fd()).unwrap();
        termios::cfmakeraw(&mut termios);
        assert!(!TerminalMode::CANONICAL.matches(&termios));

        TerminalMode::CANONICAL.write_into(&mut termios).unwrap();
        assert!(TerminalMode::CANONICAL.matches(&termios));
    }
}
