//! Child process setup
//!
//! [`SpawnOptions`] describes what to run. Before forking, the options are
//! turned into a [`PreparedCommand`] holding every C string and the argv
//! pointer array, so the forked child only makes async-signal-safe calls
//! plus `setenv` and `execvp`.

use std::ffi::{CString, OsStr, OsString};
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::ptr;

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::libc::{self, c_char};
use nix::sys::signal::{self, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{chdir, dup2, setsid};

use super::{PtyError, PtyResult, WindowSize};

/// Exit status of a child whose `execvp` failed
pub const EXEC_FAILURE_EXIT_CODE: i32 = 127;

/// Exit status of a child that failed before reaching `execvp`
/// (session, controlling terminal, stdio or working directory setup)
pub const SETUP_FAILURE_EXIT_CODE: i32 = 125;

/// What to run on a new PTY, and with which geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnOptions {
    program: OsString,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
    cwd: Option<PathBuf>,
    size: WindowSize,
}

impl SpawnOptions {
    /// Run `program`, looked up in `PATH` when it has no slash
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            size: WindowSize::default(),
        }
    }

    /// Add an argument (after `argv[0]`, which is always the program)
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Set an environment variable in the child
    ///
    /// Assignments are applied in the order given, on top of the inherited
    /// environment; a later assignment to the same name wins.
    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(mut self, key: K, value: V) -> Self {
        self.env
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Set multiple environment variables, in order
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Set the working directory of the child
    pub fn current_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the initial window size
    pub fn size(mut self, size: WindowSize) -> Self {
        self.size = size;
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    pub fn get_args(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(OsString::as_os_str)
    }

    pub fn get_envs(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
        self.env.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
    }

    pub fn get_current_dir(&self) -> Option<&std::path::Path> {
        self.cwd.as_deref()
    }

    pub fn get_size(&self) -> WindowSize {
        self.size
    }
}

/// A spawn request converted to C types, ready to use after fork
pub(crate) struct PreparedCommand {
    program: CString,
    /// Owns the strings `argv_ptrs` points into
    _argv: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    env: Vec<(CString, CString)>,
    cwd: Option<CString>,
}

impl PreparedCommand {
    pub(crate) fn new(options: &SpawnOptions) -> PtyResult<Self> {
        if options.program.is_empty() {
            return Err(PtyError::InvalidArgument("empty program path".to_string()));
        }

        let program = to_cstring("program", &options.program)?;

        let mut argv = Vec::with_capacity(options.args.len() + 1);
        argv.push(program.clone());
        for arg in &options.args {
            argv.push(to_cstring("argument", arg)?);
        }

        let mut argv_ptrs: Vec<*const c_char> = argv.iter().map(|a| a.as_ptr()).collect();
        argv_ptrs.push(ptr::null());

        let mut env = Vec::with_capacity(options.env.len());
        for (key, value) in &options.env {
            if key.is_empty() || key.as_bytes().contains(&b'=') {
                tracing::warn!(
                    name = %key.to_string_lossy(),
                    "environment name will be rejected by setenv in the child"
                );
            }
            env.push((
                to_cstring("environment name", key)?,
                to_cstring("environment value", value)?,
            ));
        }

        let cwd = options
            .cwd
            .as_ref()
            .map(|dir| to_cstring("working directory", dir.as_os_str()))
            .transpose()?;

        Ok(Self {
            program,
            _argv: argv,
            argv_ptrs,
            env,
            cwd,
        })
    }

    /// Turn the forked child into the requested program
    ///
    /// Runs in the child between fork and exec; never returns.
    pub(crate) fn exec_child(&self, slave: OwnedFd) -> ! {
        if setsid().is_err() {
            child_exit(SETUP_FAILURE_EXIT_CODE);
        }

        let slave_fd = slave.as_raw_fd();

        // SAFETY: TIOCSCTTY takes an int argument; the slave is open
        if unsafe { libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0) } < 0 {
            child_exit(SETUP_FAILURE_EXIT_CODE);
        }

        for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
            if slave_fd != target && dup2(slave_fd, target).is_err() {
                child_exit(SETUP_FAILURE_EXIT_CODE);
            }
        }

        if slave_fd > libc::STDERR_FILENO {
            drop(slave);
        } else {
            // The slave already sits on a stdio slot: keep it open across exec
            if fcntl(slave_fd, FcntlArg::F_SETFD(FdFlag::empty())).is_err() {
                child_exit(SETUP_FAILURE_EXIT_CODE);
            }
            std::mem::forget(slave);
        }

        // Rust ignores SIGPIPE, and ignored dispositions survive exec
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None);
        // SAFETY: restoring the default disposition installs no handler
        let _ = unsafe { signal::signal(Signal::SIGPIPE, SigHandler::SigDfl) };

        if let Some(dir) = &self.cwd {
            if chdir(dir.as_c_str()).is_err() {
                child_exit(SETUP_FAILURE_EXIT_CODE);
            }
        }

        // Best effort: a rejected assignment leaves the inherited value
        for (key, value) in &self.env {
            // SAFETY: both strings are NUL-terminated and outlive the call
            unsafe {
                libc::setenv(key.as_ptr(), value.as_ptr(), 1);
            }
        }

        // SAFETY: argv_ptrs is NULL-terminated and points into live CStrings
        unsafe {
            libc::execvp(self.program.as_ptr(), self.argv_ptrs.as_ptr());
        }

        child_exit(EXEC_FAILURE_EXIT_CODE)
    }
}

fn to_cstring(what: &str, value: &OsStr) -> PtyResult<CString> {
    CString::new(value.as_bytes())
        .map_err(|_| PtyError::InvalidArgument(format!("{what} contains a NUL byte")))
}

/// Leave the forked child without running atexit handlers or flushing
/// buffers shared with the parent
fn child_exit(code: i32) -> ! {
    unsafe { libc::_exit(code) }
}
