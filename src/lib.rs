//! sysrun - run commands as transient systemd units
//!
//! Asks the service manager to start a command as a transient service,
//! then follows the unit over D-Bus until it has finished and turns its
//! result into an exit status.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 sysrun / sysrunctl (bins)                │
//! ├─────────────────────────────────────────────────────────┤
//! │  config  │  request encoder  │  commands (run/wait/...)  │
//! ├──────────┴───────────────────┼──────────────────────────┤
//! │     completion monitor ◄─────┤  pty forwarder (drain)   │
//! │     snapshot + outcome       │                          │
//! ├──────────────────────────────┴──────────────────────────┤
//! │          dbus: BusSession ── ZbusSession (zbus)          │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod commands;
pub mod config;
pub mod dbus;
pub mod monitor;
pub mod pty;
pub mod request;
pub mod units;

pub use config::{BusScope, RunConfig, RunOptions, StdioMode, TerminalInfo, WaitConfig};
pub use monitor::{CompletionMonitor, CompletionPolicy, UnitSnapshot};
