//! StartTransientUnit request encoding
//!
//! Builds the `(ssa(sv)a(sa(sv)))` payload for a transient service. The
//! manager applies properties in order and the last assignment of a key
//! wins, so the order below is part of the contract:
//!
//! 1. Description
//! 2. CollectMode
//! 3. user `-p` assignments
//! 4. AddRef
//! 5. RemainAfterExit, Type, User, Group, Nice, WorkingDirectory
//! 6. stream redirection (tty triple + TTYPath, or our own descriptors)
//! 7. Environment=TERM=...
//! 8. Environment (bulk)
//! 9. ExecStart

use std::io;
use std::os::fd::AsFd;

use zbus::zvariant::{Fd, OwnedValue, Value};

use crate::config::{RunConfig, StdioMode};

/// Job mode: refuse if a conflicting job is already queued
pub const JOB_MODE_FAIL: &str = "fail";

pub const COLLECT_INACTIVE_OR_FAILED: &str = "inactive-or-failed";

/// One `(sv)` property assignment
pub type Property = (String, OwnedValue);

/// One auxiliary unit: name plus its properties
pub type AuxUnit = (String, Vec<Property>);

/// `ExecStart` entry: (path, argv, ignore-failure)
pub type ExecCommand = (String, Vec<String>, bool);

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("Malformed property assignment: {0}")]
    MalformedProperty(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to encode property {key}: {source}")]
    Variant {
        key: String,
        #[source]
        source: zbus::zvariant::Error,
    },

    #[error("Failed to duplicate standard stream: {0}")]
    Descriptor(#[source] io::Error),

    #[error("Pseudo-terminal requested but no TTY path allocated")]
    MissingTtyPath,
}

/// A fully encoded StartTransientUnit call
#[derive(Debug)]
pub struct TransientUnitCall {
    pub name: String,
    pub mode: String,
    pub properties: Vec<Property>,
    pub aux: Vec<AuxUnit>,
}

impl TransientUnitCall {
    /// Property keys in the order they will be sent
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(|(k, _)| k.as_str())
    }

    /// Last value assigned to `key`, which is the one the manager keeps
    pub fn get(&self, key: &str) -> Option<&Value<'static>> {
        self.properties
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| &**v)
    }
}

#[derive(Default)]
struct PropertyBag(Vec<Property>);

impl PropertyBag {
    fn push<'v>(&mut self, key: &str, value: impl Into<Value<'v>>) -> Result<(), EncodeError> {
        let value = OwnedValue::try_from(value.into()).map_err(|source| EncodeError::Variant {
            key: key.to_string(),
            source,
        })?;
        self.0.push((key.to_string(), value));
        Ok(())
    }

    fn push_fd(&mut self, key: &str, stream: impl AsFd) -> Result<(), EncodeError> {
        let fd = stream
            .as_fd()
            .try_clone_to_owned()
            .map_err(EncodeError::Descriptor)?;
        self.push(key, Value::Fd(Fd::from(fd)))
    }
}

/// Description fallback: the joined command line, or the unit name
pub fn default_description(command: &[String], unit: &str) -> String {
    let joined = shlex::try_join(command.iter().map(String::as_str))
        .unwrap_or_else(|_| command.join(" "));
    if joined.is_empty() {
        unit.to_string()
    } else {
        joined
    }
}

/// Encode the creation request for `unit`.
///
/// `tty_path` is the slave side of an allocated pseudo-terminal and must be
/// present when the config asks for [`StdioMode::Pty`].
pub fn encode_transient_service(
    config: &RunConfig,
    unit: &str,
    tty_path: Option<&str>,
) -> Result<TransientUnitCall, EncodeError> {
    let mut bag = PropertyBag::default();

    let description = match &config.description {
        Some(d) => d.clone(),
        None => default_description(&config.command, unit),
    };
    bag.push("Description", description)?;

    if config.collect {
        bag.push("CollectMode", COLLECT_INACTIVE_OR_FAILED)?;
    }

    for assignment in &config.properties {
        let (key, value) = parse_property_assignment(assignment)?;
        bag.push(&key, value)?;
    }

    // Keeps the unit around past its exit so its properties stay queryable
    if config.needs_monitor() {
        bag.push("AddRef", true)?;
    }

    if config.remain_after_exit {
        bag.push("RemainAfterExit", true)?;
    }
    if let Some(t) = config.service_type {
        bag.push("Type", t.as_str())?;
    }
    if let Some(user) = &config.exec_user {
        bag.push("User", user.as_str())?;
    }
    if let Some(group) = &config.exec_group {
        bag.push("Group", group.as_str())?;
    }
    if let Some(nice) = config.nice {
        bag.push("Nice", nice)?;
    }
    if let Some(dir) = &config.working_directory {
        bag.push("WorkingDirectory", dir.to_string_lossy().into_owned())?;
    }

    let send_term = match config.stdio {
        StdioMode::Pty => {
            let path = tty_path.ok_or(EncodeError::MissingTtyPath)?;
            bag.push("StandardInput", "tty")?;
            bag.push("StandardOutput", "tty")?;
            bag.push("StandardError", "tty")?;
            bag.push("TTYPath", path)?;
            true
        }
        StdioMode::Direct => {
            bag.push_fd("StandardInputFileDescriptor", io::stdin())?;
            bag.push_fd("StandardOutputFileDescriptor", io::stdout())?;
            bag.push_fd("StandardErrorFileDescriptor", io::stderr())?;
            true
        }
        StdioMode::None => false,
    };

    if send_term {
        if let Some(term) = &config.terminal.term {
            bag.push("Environment", vec![format!("TERM={}", term)])?;
        }
    }

    if !config.environment.is_empty() {
        bag.push("Environment", config.environment.clone())?;
    }

    if let Some(path) = config.command.first() {
        let exec: Vec<ExecCommand> = vec![(path.clone(), config.command.clone(), false)];
        bag.push("ExecStart", exec)?;
    }

    Ok(TransientUnitCall {
        name: unit.to_string(),
        mode: JOB_MODE_FAIL.to_string(),
        properties: bag.0,
        aux: Vec::new(),
    })
}

const BOOL_PROPERTIES: &[&str] = &[
    "AddRef",
    "CPUAccounting",
    "Delegate",
    "DynamicUser",
    "IOAccounting",
    "IPAccounting",
    "LockPersonality",
    "MemoryAccounting",
    "MemoryDenyWriteExecute",
    "NoNewPrivileges",
    "PrivateDevices",
    "PrivateNetwork",
    "PrivateTmp",
    "ProtectControlGroups",
    "ProtectKernelModules",
    "ProtectKernelTunables",
    "RemainAfterExit",
    "RestrictRealtime",
    "RootDirectoryStartOnly",
    "SendSIGHUP",
    "SendSIGKILL",
    "TasksAccounting",
];

const INT_PROPERTIES: &[&str] = &[
    "CPUSchedulingPriority",
    "IOSchedulingPriority",
    "Nice",
    "OOMScoreAdjust",
];

const U64_PROPERTIES: &[&str] = &[
    "CPUWeight",
    "IOWeight",
    "MemoryHigh",
    "MemoryLow",
    "MemoryMax",
    "MemoryMin",
    "MemorySwapMax",
    "StartupCPUWeight",
    "StartupIOWeight",
];

const STRV_PROPERTIES: &[&str] = &[
    "Environment",
    "PassEnvironment",
    "SupplementaryGroups",
    "UnsetEnvironment",
];

/// A `-p` value after typing
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i32),
    U64(u64),
    Str(String),
    StrArray(Vec<String>),
}

impl From<PropertyValue> for Value<'static> {
    fn from(v: PropertyValue) -> Self {
        match v {
            PropertyValue::Bool(b) => Value::from(b),
            PropertyValue::Int(i) => Value::from(i),
            PropertyValue::U64(u) => Value::from(u),
            PropertyValue::Str(s) => Value::from(s),
            PropertyValue::StrArray(a) => Value::from(a),
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "yes" | "true" | "1" | "on" => Some(true),
        "no" | "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Type a `KEY=VALUE` assignment by key
pub fn parse_property_assignment(assignment: &str) -> Result<(String, PropertyValue), EncodeError> {
    let (key, raw) = assignment
        .split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| EncodeError::MalformedProperty(assignment.to_string()))?;

    let invalid = || EncodeError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    };

    let value = if BOOL_PROPERTIES.contains(&key) {
        PropertyValue::Bool(parse_bool(raw).ok_or_else(invalid)?)
    } else if INT_PROPERTIES.contains(&key) {
        PropertyValue::Int(raw.parse().map_err(|_| invalid())?)
    } else if U64_PROPERTIES.contains(&key) {
        if raw == "infinity" {
            PropertyValue::U64(u64::MAX)
        } else {
            PropertyValue::U64(raw.parse().map_err(|_| invalid())?)
        }
    } else if STRV_PROPERTIES.contains(&key) {
        PropertyValue::StrArray(shlex::split(raw).ok_or_else(invalid)?)
    } else {
        PropertyValue::Str(raw.to_string())
    };

    Ok((key.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TerminalInfo;
    use crate::units::ServiceType;

    fn config(command: &[&str]) -> RunConfig {
        RunConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_request_shape() {
        let call = encode_transient_service(&config(&["/bin/sleep", "5"]), "job-1.service", None)
            .unwrap();
        assert_eq!(call.name, "job-1.service");
        assert_eq!(call.mode, "fail");
        assert!(call.aux.is_empty());
        assert_eq!(call.keys().collect::<Vec<_>>(), ["Description", "ExecStart"]);
        assert_eq!(call.get("Description"), Some(&Value::from("/bin/sleep 5")));
    }

    #[test]
    fn test_exec_start_encoding() {
        let call = encode_transient_service(&config(&["/bin/echo", "hi there"]), "x.service", None)
            .unwrap();
        let expected: Vec<ExecCommand> = vec![(
            "/bin/echo".into(),
            vec!["/bin/echo".into(), "hi there".into()],
            false,
        )];
        assert_eq!(call.get("ExecStart"), Some(&Value::from(expected)));
        assert_eq!(call.get("ExecStart").unwrap().value_signature().to_string(), "a(sasb)");
    }

    #[test]
    fn test_empty_command_skips_exec_start() {
        let call = encode_transient_service(&config(&[]), "trigger.service", None).unwrap();
        assert_eq!(call.keys().collect::<Vec<_>>(), ["Description"]);
        assert_eq!(call.get("Description"), Some(&Value::from("trigger.service")));
    }

    #[test]
    fn test_full_property_order() {
        let mut cfg = config(&["/usr/bin/env"]);
        cfg.description = Some("env dump".into());
        cfg.collect = true;
        cfg.properties = vec!["CPUAccounting=yes".into(), "Slice=batch.slice".into()];
        cfg.wait = true;
        cfg.remain_after_exit = true;
        cfg.service_type = Some(ServiceType::Oneshot);
        cfg.exec_user = Some("nobody".into());
        cfg.exec_group = Some("nogroup".into());
        cfg.nice = Some(5);
        cfg.working_directory = Some("/tmp".into());
        cfg.stdio = StdioMode::Pty;
        cfg.terminal = TerminalInfo {
            term: Some("xterm-256color".into()),
            all_tty: true,
        };
        cfg.environment = vec!["A=1".into(), "B=2".into()];

        let call = encode_transient_service(&cfg, "env.service", Some("/dev/pts/7")).unwrap();
        assert_eq!(
            call.keys().collect::<Vec<_>>(),
            [
                "Description",
                "CollectMode",
                "CPUAccounting",
                "Slice",
                "AddRef",
                "RemainAfterExit",
                "Type",
                "User",
                "Group",
                "Nice",
                "WorkingDirectory",
                "StandardInput",
                "StandardOutput",
                "StandardError",
                "TTYPath",
                "Environment",
                "Environment",
                "ExecStart",
            ]
        );
        assert_eq!(call.get("CollectMode"), Some(&Value::from("inactive-or-failed")));
        assert_eq!(call.get("TTYPath"), Some(&Value::from("/dev/pts/7")));
        assert_eq!(call.get("Type"), Some(&Value::from("oneshot")));
        assert_eq!(call.get("Nice"), Some(&Value::from(5i32)));

        let term = &call.properties[15].1;
        assert_eq!(**term, Value::from(vec!["TERM=xterm-256color".to_string()]));
        assert_eq!(
            call.get("Environment"),
            Some(&Value::from(vec!["A=1".to_string(), "B=2".to_string()]))
        );
    }

    #[test]
    fn test_duplicate_user_properties_kept_in_order() {
        let mut cfg = config(&["true"]);
        cfg.properties = vec!["Slice=a.slice".into(), "Slice=b.slice".into()];
        let call = encode_transient_service(&cfg, "dup.service", None).unwrap();
        assert_eq!(call.keys().filter(|k| *k == "Slice").count(), 2);
        assert_eq!(call.get("Slice"), Some(&Value::from("b.slice")));
    }

    #[test]
    fn test_add_ref_only_when_monitoring() {
        let call = encode_transient_service(&config(&["true"]), "a.service", None).unwrap();
        assert!(call.get("AddRef").is_none());

        let mut cfg = config(&["true"]);
        cfg.wait = true;
        let call = encode_transient_service(&cfg, "a.service", None).unwrap();
        assert_eq!(call.get("AddRef"), Some(&Value::from(true)));
    }

    #[test]
    fn test_direct_stdio_passes_descriptors() {
        let mut cfg = config(&["cat"]);
        cfg.stdio = StdioMode::Direct;
        cfg.terminal.term = Some("vt100".into());
        let call = encode_transient_service(&cfg, "pipe.service", None).unwrap();
        let keys: Vec<_> = call.keys().collect();
        assert!(keys.contains(&"StandardInputFileDescriptor"));
        assert!(keys.contains(&"StandardOutputFileDescriptor"));
        assert!(keys.contains(&"StandardErrorFileDescriptor"));
        assert!(!keys.contains(&"TTYPath"));
        // the passed descriptors may still be a terminal
        assert_eq!(
            call.get("Environment"),
            Some(&Value::from(vec!["TERM=vt100".to_string()]))
        );
        assert_eq!(
            call.get("StandardInputFileDescriptor")
                .unwrap()
                .value_signature()
                .to_string(),
            "h"
        );
    }

    #[test]
    fn test_pty_without_path_fails() {
        let mut cfg = config(&["sh"]);
        cfg.stdio = StdioMode::Pty;
        assert!(matches!(
            encode_transient_service(&cfg, "sh.service", None),
            Err(EncodeError::MissingTtyPath)
        ));
    }

    #[test]
    fn test_malformed_property_aborts() {
        let mut cfg = config(&["true"]);
        cfg.properties = vec!["CPUAccounting=yes".into(), "NoEqualsSign".into()];
        assert!(matches!(
            encode_transient_service(&cfg, "bad.service", None),
            Err(EncodeError::MalformedProperty(p)) if p == "NoEqualsSign"
        ));
    }

    #[test]
    fn test_parse_property_assignment_types() {
        assert_eq!(
            parse_property_assignment("PrivateTmp=on").unwrap(),
            ("PrivateTmp".into(), PropertyValue::Bool(true))
        );
        assert_eq!(
            parse_property_assignment("Nice=-5").unwrap(),
            ("Nice".into(), PropertyValue::Int(-5))
        );
        assert_eq!(
            parse_property_assignment("MemoryMax=infinity").unwrap(),
            ("MemoryMax".into(), PropertyValue::U64(u64::MAX))
        );
        assert_eq!(
            parse_property_assignment("Environment=A=1 \"B=two words\"").unwrap(),
            (
                "Environment".into(),
                PropertyValue::StrArray(vec!["A=1".into(), "B=two words".into()])
            )
        );
        assert_eq!(
            parse_property_assignment("Slice=x=y.slice").unwrap(),
            ("Slice".into(), PropertyValue::Str("x=y.slice".into()))
        );
        assert!(matches!(
            parse_property_assignment("Nice=fast"),
            Err(EncodeError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_property_assignment("=1"),
            Err(EncodeError::MalformedProperty(_))
        ));
    }

    #[test]
    fn test_default_description_quotes_arguments() {
        let cmd = vec!["echo".to_string(), "a b".to_string()];
        assert_eq!(default_description(&cmd, "u.service"), "echo 'a b'");
        assert_eq!(default_description(&[], "u.service"), "u.service");
    }
}
