//! pty-session
//!
//! Pseudoterminal session management for Unix. This crate allocates a PTY
//! pair, spawns a child process with the slave side as its controlling
//! terminal, and gives the owner a small set of operations on the master
//! side:
//!
//! - `pty`: session lifecycle (spawn, peek, read, write, resize, wait, close)
//! - `config`: TOML configuration used by the `pty-relay` binary
//!
//! The byte stream on the master is passed through untouched; no terminal
//! emulation happens here.

pub mod config;
pub mod pty;

pub use pty::{
    wait_pid, ChildStatus, ErrorKind, PtyError, PtyResult, PtySession, Readiness, SpawnOptions,
    TerminalMode, WindowSize,
};
