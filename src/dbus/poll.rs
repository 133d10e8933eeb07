//! Readiness and wait-bound computation for the bus connection
//!
//! The transport reports a timeout in microseconds (`u64::MAX` meaning it
//! has no timer pending). poll(2)-style waits take milliseconds in a signed
//! int, so the value is rounded up and saturated.

use std::os::fd::RawFd;
use std::time::Duration;

/// Transport has no pending timer
pub const NO_TIMEOUT: u64 = u64::MAX;

/// Largest wait poll(2) can express
pub const MAX_WAIT_MS: u32 = i32::MAX as u32;

/// How long the monitor may block before re-checking the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitBound {
    /// Something is already queued, drain without blocking
    Now,
    Millis(u32),
}

impl WaitBound {
    /// Convert a transport timeout into a wait bound.
    ///
    /// Rounds up so we never wake before the transport's deadline.
    pub fn from_usec(usec: u64) -> Self {
        if usec == 0 {
            return Self::Now;
        }
        if usec >= u64::MAX - 1000 {
            return Self::Millis(MAX_WAIT_MS);
        }
        let ms = usec.div_ceil(1000).min(MAX_WAIT_MS as u64);
        Self::Millis(ms as u32)
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            Self::Now => Duration::ZERO,
            Self::Millis(ms) => Duration::from_millis(u64::from(*ms)),
        }
    }

    /// The shorter of two bounds
    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Self::Millis(a), Self::Millis(b)) => Self::Millis(a.min(b)),
            _ => Self::Now,
        }
    }
}

/// Snapshot of what the connection is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollState {
    /// Underlying socket, when the transport exposes it
    pub fd: Option<RawFd>,
    /// poll(2) event mask, e.g. `libc::POLLIN`
    pub events: libc::c_short,
    /// Transport deadline in microseconds, [`NO_TIMEOUT`] if none
    pub timeout_usec: u64,
}

impl PollState {
    /// Readable, with nothing queued and no transport timer
    pub fn idle(fd: Option<RawFd>) -> Self {
        Self {
            fd,
            events: libc::POLLIN,
            timeout_usec: NO_TIMEOUT,
        }
    }

    /// Messages already queued locally
    pub fn ready(fd: Option<RawFd>) -> Self {
        Self {
            fd,
            events: libc::POLLIN,
            timeout_usec: 0,
        }
    }

    /// No event interest means there is nothing to block on
    pub fn wait_bound(&self) -> WaitBound {
        if self.events == 0 {
            return WaitBound::Now;
        }
        WaitBound::from_usec(self.timeout_usec)
    }
}
