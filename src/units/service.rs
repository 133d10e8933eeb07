//! Service settings that a transient unit can be created with

/// Service type determines startup notification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServiceType {
    #[default]
    Simple,       // Ready immediately after fork
    Exec,         // Ready after execve() succeeded
    Forking,      // Ready when main process exits
    Oneshot,      // Run once, no main process
    Dbus,         // Ready when D-Bus name acquired
    Notify,       // Ready on sd_notify READY=1
    NotifyReload, // Like notify, plus RELOADING=1 support
    Idle,         // Like simple, delayed until jobs are dispatched
}

impl ServiceType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "simple" => Some(Self::Simple),
            "exec" => Some(Self::Exec),
            "forking" => Some(Self::Forking),
            "oneshot" => Some(Self::Oneshot),
            "dbus" => Some(Self::Dbus),
            "notify" => Some(Self::Notify),
            "notify-reload" => Some(Self::NotifyReload),
            "idle" => Some(Self::Idle),
            _ => None,
        }
    }

    /// Value for the `Type=` property
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Exec => "exec",
            Self::Forking => "forking",
            Self::Oneshot => "oneshot",
            Self::Dbus => "dbus",
            Self::Notify => "notify",
            Self::NotifyReload => "notify-reload",
            Self::Idle => "idle",
        }
    }
}
