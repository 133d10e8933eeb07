//! Unit name handling
//!
//! Names given on the command line are mangled into valid unit names the
//! same way systemctl does it; names we pick ourselves are derived from the
//! bus connection's unique name.


/// Longest unit name the manager accepts
pub const UNIT_NAME_MAX: usize = 256;

const UNIT_SUFFIXES: &[&str] = &[
    ".service",
    ".socket",
    ".target",
    ".device",
    ".mount",
    ".automount",
    ".swap",
    ".timer",
    ".path",
    ".slice",
    ".scope",
];

#[derive(Debug, thiserror::Error)]
pub enum NameError {
    #[error("Unit name is empty")]
    Empty,

    #[error("Unit name too long: {0}")]
    TooLong(String),

    #[error("Unique name {0} has unexpected format")]
    UniqueName(String),
}

fn is_valid_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b':' | b'-' | b'_' | b'.' | b'\\')
}

fn unit_suffix(name: &str) -> Option<&'static str> {
    UNIT_SUFFIXES.iter().copied().find(|s| name.len() > s.len() && name.ends_with(s))
}

/// Check whether `name` is already a valid unit name with a type suffix
pub fn is_valid_unit_name(name: &str) -> bool {
    name.len() <= UNIT_NAME_MAX
        && unit_suffix(name).is_some()
        && !name.starts_with('.')
        && name.bytes().all(is_valid_char)
}

/// Turn arbitrary user input into a valid unit name.
///
/// Valid names are returned unchanged. Otherwise `/` becomes `-`, every other
/// byte outside the allowed set becomes `\xNN`, and `suffix` is appended
/// unless the result already ends in a unit type suffix.
pub fn mangle_unit_name(name: &str, suffix: &str) -> Result<String, NameError> {
    if name.is_empty() {
        return Err(NameError::Empty);
    }

    if is_valid_unit_name(name) {
        return Ok(name.to_string());
    }

    let mut mangled = String::with_capacity(name.len() + suffix.len());
    for b in name.bytes() {
        if b == b'/' {
            mangled.push('-');
        } else if is_valid_char(b) {
            mangled.push(b as char);
        } else {
            mangled.push_str(&format!("\\x{:02x}", b));
        }
    }

    if unit_suffix(&mangled).is_none() {
        mangled.push_str(suffix);
    }

    if mangled.len() > UNIT_NAME_MAX {
        return Err(NameError::TooLong(mangled));
    }

    if mangled != name {
        log::debug!("Mangled unit name {:?} to {}", name, mangled);
    }

    Ok(mangled)
}

/// Pick a name for a transient service.
///
/// e.g. unique name ":1.42" -> "run-u42.service". Without a unique name
/// (direct connection to the manager) a random id is used instead.
pub fn generate_unit_name(unique_name: Option<&str>) -> Result<String, NameError> {
    let Some(unique) = unique_name else {
        return Ok(format!("run-r{}.service", random_id()));
    };

    let id = unique
        .strip_prefix(":1.")
        .or_else(|| unique.strip_prefix(':'))
        .ok_or_else(|| NameError::UniqueName(unique.to_string()))?;

    Ok(format!("run-u{}.service", id))
}

/// 128 random bits as 32 lower-case hex characters
fn random_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
