//! PTY Relay
//!
//! Spawns a program on a new PTY and relays the caller's terminal to it:
//! stdin goes to the PTY master, master output goes to stdout, and size
//! changes of the caller's terminal are forwarded. Exits with the child's
//! status.

use std::io::{self, IsTerminal, Read, Write};
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pty_session::config::{parse_env_assignment, EnvVar, Overrides, RelayConfig};
use pty_session::{PtySession, WindowSize};

/// How long one poll of stdin may block
const POLL_INTERVAL_MS: u16 = 50;

/// Relay the current terminal to a program running on a new PTY
#[derive(Parser, Debug)]
#[command(name = "pty-relay")]
#[command(version)]
#[command(about = "Run a program on a pseudoterminal and relay I/O to it", long_about = None)]
struct CliArgs {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Terminal width (default: current terminal, else 80)
    #[arg(long, value_name = "COLS")]
    cols: Option<u16>,

    /// Terminal height (default: current terminal, else 24)
    #[arg(long, value_name = "ROWS")]
    rows: Option<u16>,

    /// Working directory of the program
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Set an environment variable in the program (repeatable)
    #[arg(short, long, value_name = "NAME=VALUE", value_parser = parse_env_assignment)]
    env: Vec<EnvVar>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    /// Program and arguments (default: config, $SHELL, /bin/sh)
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let overrides = Overrides {
        cols: args.cols,
        rows: args.rows,
        cwd: args.cwd.clone(),
        env: args.env.clone(),
        command: args.command.clone(),
    };

    let config = match RelayConfig::load(args.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Configuration error: {}", e);
            eprintln!("pty-relay: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let outer_size = outer_window_size();
    let options = config.spawn_options(outer_size.unwrap_or_default());
    tracing::info!(
        "Spawning {} on a {}x{} PTY",
        options.get_program().to_string_lossy(),
        options.get_size().cols,
        options.get_size().rows
    );

    let mut session = match PtySession::spawn(&options) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to spawn PTY: {}", e);
            eprintln!("pty-relay: failed to spawn PTY: {}", e);
            return ExitCode::FAILURE;
        },
    };

    // Only follow the caller's size when no fixed geometry was requested
    let follow_size = config.terminal.cols.is_none() && config.terminal.rows.is_none();

    let relay_result = {
        let _raw_guard = match RawModeGuard::new() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!("Failed to enter raw mode: {}", e);
                eprintln!("pty-relay: failed to enter raw mode: {}", e);
                let _ = session.kill();
                let _ = session.wait();
                return ExitCode::FAILURE;
            },
        };
        relay(&session, follow_size.then_some(outer_size).flatten())
    };

    if let Err(e) = relay_result {
        tracing::error!("Relay error: {}", e);
    }

    if let Err(e) = session.close() {
        tracing::warn!("Failed to close PTY master: {}", e);
    }

    match session.wait() {
        Ok(status) => {
            tracing::info!("Child exited: {:?}", status);
            if status.exec_failed() {
                eprintln!(
                    "pty-relay: {} could not be started",
                    options.get_program().to_string_lossy()
                );
            }
            ExitCode::from(status.shell_code().clamp(0, 255) as u8)
        },
        Err(e) => {
            tracing::error!("Wait error: {}", e);
            ExitCode::FAILURE
        },
    }
}

/// Shuttle bytes until the child side of the PTY goes away
fn relay(session: &PtySession, mut last_size: Option<WindowSize>) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut stdin_open = true;
    let mut stdin_buf = [0u8; 4096];
    let mut pty_buf = [0u8; 65536];

    loop {
        // Drain whatever the child has produced
        while session.peek()?.is_ready() {
            let n = session.read(&mut pty_buf)?;
            if n == 0 {
                tracing::debug!("PTY reached end of file");
                return Ok(());
            }
            stdout.write_all(&pty_buf[..n])?;
        }
        stdout.flush()?;

        if let Some(previous) = last_size {
            if let Some(current) = outer_window_size() {
                if current != previous {
                    session.resize(current)?;
                    last_size = Some(current);
                }
            }
        }

        if !stdin_open {
            std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
            continue;
        }

        let stdin_ready = {
            let mut fds = [PollFd::new(stdin.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
                Ok(n) => n > 0,
                Err(nix::errno::Errno::EINTR) => false,
                Err(e) => return Err(io::Error::from(e)),
            }
        };

        if stdin_ready {
            let n = stdin.lock().read(&mut stdin_buf)?;
            if n == 0 {
                tracing::debug!("stdin closed, sending EOF character");
                // VEOF (^D) in the canonical profile
                session.write_all(&[0x04])?;
                stdin_open = false;
                continue;
            }
            session.write_all(&stdin_buf[..n])?;
        }
    }
}

/// Size of the terminal on stdout, if there is one
fn outer_window_size() -> Option<WindowSize> {
    let stdout = io::stdout();
    if !stdout.is_terminal() {
        return None;
    }
    WindowSize::of_fd(stdout.as_fd())
        .ok()
        .filter(|size| size.cols > 0 && size.rows > 0)
}

/// RAII guard for raw terminal mode on stdin
struct RawModeGuard {
    original: Option<Termios>,
}

impl RawModeGuard {
    fn new() -> io::Result<Self> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(Self { original: None });
        }

        let original = termios::tcgetattr(stdin.as_fd())?;
        let mut raw = original.clone();

        // Line editing, echo and signals belong to the PTY now
        raw.local_flags.remove(LocalFlags::ICANON);
        raw.local_flags.remove(LocalFlags::ECHO);
        raw.local_flags.remove(LocalFlags::ISIG);
        raw.local_flags.remove(LocalFlags::IEXTEN);
        raw.input_flags.remove(termios::InputFlags::ICRNL);
        raw.input_flags.remove(termios::InputFlags::IXON);
        raw.output_flags.remove(termios::OutputFlags::OPOST);

        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;

        Ok(Self {
            original: Some(original),
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(original) = &self.original {
            let _ = termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, original);
        }
    }
}
