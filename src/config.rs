//! Immutable run configuration
//!
//! Built once from parsed command-line input and passed by reference into
//! the request encoder and the completion monitor.

use std::io::IsTerminal;
use std::path::PathBuf;

use crate::units::{mangle_unit_name, NameError, ServiceType};

/// Which bus the service manager is reached on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BusScope {
    #[default]
    System,
    User,
}

/// How the unit's standard streams are connected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// stdin from /dev/null, stdout+stderr to the journal
    #[default]
    None,
    /// Allocate a pseudo-terminal and forward it to ours
    Pty,
    /// Hand our own stdin/stdout/stderr to the unit
    Direct,
}

impl StdioMode {
    /// Resolve the --pty/--pipe flags.
    ///
    /// Both together pick a pty when all three streams are terminals and
    /// direct passing otherwise.
    pub fn from_flags(pty: bool, pipe: bool, terminal: &TerminalInfo) -> Self {
        match (pty, pipe) {
            (false, false) => Self::None,
            (true, false) => Self::Pty,
            (false, true) => Self::Direct,
            (true, true) if terminal.all_tty => Self::Pty,
            (true, true) => Self::Direct,
        }
    }
}

/// Terminal facts about the invoking process, captured once
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalInfo {
    /// Value of $TERM, if set
    pub term: Option<String>,
    /// All of stdin/stdout/stderr are terminals
    pub all_tty: bool,
}

impl TerminalInfo {
    pub fn detect() -> Self {
        let ttys = [
            std::io::stdin().is_terminal(),
            std::io::stdout().is_terminal(),
            std::io::stderr().is_terminal(),
        ];
        Self {
            term: std::env::var("TERM").ok().filter(|t| !t.is_empty()),
            all_tty: ttys.iter().all(|t| *t),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Command line to execute required")]
    MissingCommand,

    #[error("--pty/--pipe is not compatible with --no-block")]
    StdioWithNoBlock,

    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),

    #[error("Environment variable {0} is not set")]
    UnsetVariable(String),

    #[error("Failed to get current directory: {0}")]
    CurrentDir(#[from] std::io::Error),

    #[error("Invalid unit name: {0}")]
    UnitName(#[from] NameError),
}

/// Everything needed to create and watch one transient service
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Mangled unit name; `None` means pick one from the bus unique name
    pub unit: Option<String>,
    pub description: Option<String>,
    pub bus: BusScope,
    /// Wait for the unit to finish and propagate its result
    pub wait: bool,
    pub stdio: StdioMode,
    pub remain_after_exit: bool,
    pub service_type: Option<ServiceType>,
    pub exec_user: Option<String>,
    pub exec_group: Option<String>,
    pub nice: Option<i32>,
    pub working_directory: Option<PathBuf>,
    /// Unload the unit after it ran, even when failed
    pub collect: bool,
    /// Raw `KEY=VALUE` assignments, typed by the encoder
    pub properties: Vec<String>,
    /// `NAME=VALUE` pairs for the unit's environment
    pub environment: Vec<String>,
    pub command: Vec<String>,
    pub quiet: bool,
    pub terminal: TerminalInfo,
}

impl RunConfig {
    /// Whether the unit has to be watched after creation
    pub fn needs_monitor(&self) -> bool {
        self.wait || self.stdio != StdioMode::None
    }
}

/// Options as they come off the command line, before validation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub unit: Option<String>,
    pub description: Option<String>,
    pub user: bool,
    pub wait: bool,
    pub no_block: bool,
    pub pty: bool,
    pub pipe: bool,
    pub remain_after_exit: bool,
    pub service_type: Option<String>,
    pub exec_user: Option<String>,
    pub exec_group: Option<String>,
    pub nice: Option<i32>,
    pub working_directory: Option<PathBuf>,
    pub same_dir: bool,
    pub collect: bool,
    pub properties: Vec<String>,
    pub setenv: Vec<String>,
    pub command: Vec<String>,
    pub quiet: bool,
}

impl RunOptions {
    /// Validate and freeze into a [`RunConfig`]
    pub fn into_config(self, terminal: TerminalInfo) -> Result<RunConfig, ConfigError> {
        if self.command.is_empty() {
            return Err(ConfigError::MissingCommand);
        }

        let stdio = StdioMode::from_flags(self.pty, self.pipe, &terminal);
        if stdio != StdioMode::None && self.no_block {
            return Err(ConfigError::StdioWithNoBlock);
        }

        let service_type = self
            .service_type
            .map(|t| ServiceType::parse(&t).ok_or(ConfigError::UnknownServiceType(t)))
            .transpose()?;

        let unit = self
            .unit
            .map(|u| mangle_unit_name(&u, ".service"))
            .transpose()?;

        let working_directory = match (self.working_directory, self.same_dir) {
            (Some(dir), _) => Some(dir),
            (None, true) => Some(std::env::current_dir()?),
            (None, false) => None,
        };

        let environment = self
            .setenv
            .into_iter()
            .map(expand_setenv)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunConfig {
            unit,
            description: self.description,
            bus: if self.user { BusScope::User } else { BusScope::System },
            wait: self.wait,
            stdio,
            remain_after_exit: self.remain_after_exit,
            service_type,
            exec_user: self.exec_user,
            exec_group: self.exec_group,
            nice: self.nice,
            working_directory,
            collect: self.collect,
            properties: self.properties,
            environment,
            command: self.command,
            quiet: self.quiet,
            terminal,
        })
    }
}

/// `NAME=VALUE` is taken as is, a bare `NAME` copies our own value
fn expand_setenv(assignment: String) -> Result<String, ConfigError> {
    if assignment.contains('=') {
        return Ok(assignment);
    }
    match std::env::var(&assignment) {
        Ok(value) => Ok(format!("{}={}", assignment, value)),
        Err(_) => Err(ConfigError::UnsetVariable(assignment)),
    }
}

/// Settings for watching a unit that already exists
#[derive(Debug, Clone)]
pub struct WaitConfig {
    pub unit: String,
    pub bus: BusScope,
}

impl WaitConfig {
    pub fn new(unit: &str, user: bool) -> Result<Self, ConfigError> {
        Ok(Self {
            unit: mangle_unit_name(unit, ".service")?,
            bus: if user { BusScope::User } else { BusScope::System },
        })
    }
}
