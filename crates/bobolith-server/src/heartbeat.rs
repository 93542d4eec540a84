//! Appliance liveness state machine.
//!
//! Pure logic: nothing here performs I/O or reads the clock on its own.
//! Sessions feed events and timer ticks in and persist what comes out.
//!
//! ```text
//!            connect / ping                 tick, stale
//!   Down ─────────────────────▶ Up ───────────────────────▶ Unresponsive
//!    ▲                          ▲                               │
//!    │ close                    └──────────── ping ─────────────┤
//!    └──────────────────── (any state) ◀── force close ◀── tick, stale
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Reported reachability of an appliance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApplianceStatus {
    Up,
    #[default]
    Down,
    Unresponsive,
}

impl ApplianceStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplianceStatus::Up => "UP",
            ApplianceStatus::Down => "DOWN",
            ApplianceStatus::Unresponsive => "UNRESPONSIVE",
        }
    }
}

impl fmt::Display for ApplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplianceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(ApplianceStatus::Up),
            "DOWN" => Ok(ApplianceStatus::Down),
            "UNRESPONSIVE" => Ok(ApplianceStatus::Unresponsive),
            other => Err(format!("unknown appliance status '{}'", other)),
        }
    }
}

/// The status fields of one appliance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub status: ApplianceStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// Lifecycle events driven by the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// The connection was accepted.
    Connected,
    /// A ping arrived.
    PingReceived,
    /// The connection closed, cleanly or not.
    Disconnected,
}

/// Result of a timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOutcome {
    /// Keep the connection, with this status.
    Status(ApplianceStatus),
    /// The peer stayed silent through a second window: close the connection.
    ForceClose,
}

impl StatusRecord {
    /// Apply a lifecycle event observed at `now`.
    pub fn apply(&mut self, event: HeartbeatEvent, now: DateTime<Utc>) {
        match event {
            HeartbeatEvent::Connected => {
                self.status = ApplianceStatus::Up;
                self.last_connected_at = Some(now);
            }
            HeartbeatEvent::PingReceived => {
                self.status = ApplianceStatus::Up;
                self.last_heartbeat_at = Some(now);
            }
            HeartbeatEvent::Disconnected => {
                self.status = ApplianceStatus::Down;
            }
        }
    }
}

/// Decide what a timer tick at `now` does to an appliance.
///
/// A heartbeat is stale once `last_heartbeat_at + timeout <= now`. Stale
/// demotes `Up` to `Unresponsive`; stale again while `Unresponsive` closes
/// the connection. An appliance that never sent a heartbeat is reported
/// `Unresponsive`.
pub fn evaluate(
    status: ApplianceStatus,
    last_heartbeat_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout: TimeDelta,
) -> TimerOutcome {
    let Some(last) = last_heartbeat_at else {
        return TimerOutcome::Status(ApplianceStatus::Unresponsive);
    };

    let stale = last + timeout <= now;
    if !stale {
        return TimerOutcome::Status(status);
    }

    match status {
        ApplianceStatus::Up => TimerOutcome::Status(ApplianceStatus::Unresponsive),
        ApplianceStatus::Unresponsive => TimerOutcome::ForceClose,
        ApplianceStatus::Down => TimerOutcome::Status(ApplianceStatus::Down),
    }
}

/// Validated heartbeat timeout.
///
/// The same duration is the check period, the demotion threshold and the
/// forced-close threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatPolicy {
    period: Duration,
    timeout: TimeDelta,
}

impl HeartbeatPolicy {
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        if timeout.is_zero() {
            return Err(ConfigError::InvalidHeartbeatTimeout(
                "timeout must be greater than zero".to_string(),
            ));
        }
        let delta = TimeDelta::from_std(timeout)
            .map_err(|e| ConfigError::InvalidHeartbeatTimeout(e.to_string()))?;

        Ok(Self {
            period: timeout,
            timeout: delta,
        })
    }

    /// How often the timer fires.
    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn timeout(&self) -> TimeDelta {
        self.timeout
    }

    /// Evaluate a record at `now` under this policy.
    pub fn evaluate(&self, record: &StatusRecord, now: DateTime<Utc>) -> TimerOutcome {
        evaluate(record.status, record.last_heartbeat_at, now, self.timeout)
    }
}

/// Source of wall-clock time for status timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
