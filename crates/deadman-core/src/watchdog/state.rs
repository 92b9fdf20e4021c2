use std::fmt;
use std::time::Duration;

use crate::config::Endpoint;

/// Upper bound for a single scheduled wait, so compounding backoff never
/// overflows deadline arithmetic.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Armed with the configured timeout, no notification sent since the
    /// last heartbeat.
    Waiting,
    /// At least one deadline was missed; each further miss is a repeat.
    Escalating,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Escalating => write!(f, "escalating"),
        }
    }
}

/// What a missed deadline counts as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Timeout,
    Repeat,
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::Repeat => write!(f, "Repeat"),
        }
    }
}

/// Read-only snapshot published by the watchdog loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogStatus {
    pub phase: Phase,
    /// The wait the current deadline was armed with.
    pub current_timeout: Duration,
}

/// Timer bookkeeping for one endpoint. Only the owning loop mutates it.
#[derive(Debug, Clone)]
pub struct WatchdogState {
    timeout: Duration,
    backoff_factor: f64,
    last_timeout: Duration,
    on_repeat: bool,
}

impl WatchdogState {
    pub fn new(timeout: Duration, backoff_factor: f64) -> Self {
        Self {
            timeout,
            backoff_factor,
            last_timeout: timeout,
            on_repeat: false,
        }
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self::new(endpoint.timeout, endpoint.backoff_factor)
    }

    /// A heartbeat arrived: back to the configured timeout.
    pub fn reset(&mut self) -> Duration {
        self.on_repeat = false;
        self.last_timeout = self.timeout;
        self.last_timeout
    }

    /// The deadline passed. Returns how to count it and the next wait,
    /// which compounds on the previous one.
    pub fn expire(&mut self) -> (Expiry, Duration) {
        let expiry = if self.on_repeat {
            Expiry::Repeat
        } else {
            Expiry::Timeout
        };
        self.on_repeat = true;
        self.last_timeout = next_wait(self.last_timeout, self.backoff_factor);
        (expiry, self.last_timeout)
    }

    pub fn phase(&self) -> Phase {
        if self.on_repeat {
            Phase::Escalating
        } else {
            Phase::Waiting
        }
    }

    pub fn current_timeout(&self) -> Duration {
        self.last_timeout
    }

    pub fn status(&self) -> WatchdogStatus {
        WatchdogStatus {
            phase: self.phase(),
            current_timeout: self.last_timeout,
        }
    }
}

/// `previous × factor`, clamped to `[0, MAX_WAIT]`.
pub fn next_wait(previous: Duration, factor: f64) -> Duration {
    let secs = previous.as_secs_f64() * factor;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    if secs >= MAX_WAIT.as_secs_f64() {
        return MAX_WAIT;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(MAX_WAIT)
}
