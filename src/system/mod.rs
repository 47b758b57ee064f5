//! Access to facts about the running machine.
//!
//! Everything except the boot time is best-effort: a failed lookup is handed
//! back as [`Gathered::Degraded`] carrying the value to use instead.

mod host;
mod powershell;
mod windows;

use chrono::{DateTime, Utc};

use crate::{errors::BootMailError, model::LogEvent};

pub use host::machine_name;
pub use powershell::{PowerShell, ScriptRunner};
pub use windows::WindowsEventLog;

/// Result of a lookup that is not allowed to fail the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gathered<T> {
    Found(T),
    Degraded { value: T, reason: String },
}

impl<T> Gathered<T> {
    pub fn value(&self) -> &T {
        match self {
            Gathered::Found(value) | Gathered::Degraded { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Gathered::Found(value) | Gathered::Degraded { value, .. } => value,
        }
    }

    pub fn degraded_reason(&self) -> Option<&str> {
        match self {
            Gathered::Found(_) => None,
            Gathered::Degraded { reason, .. } => Some(reason),
        }
    }
}

pub trait SystemQueryAdapter {
    fn machine_name(&self) -> String;

    /// Active IPv4 addresses excluding loopback and link-local
    fn local_ipv4(&self) -> Gathered<Vec<String>>;

    /// The only essential query, failure ends the run
    fn boot_time_utc(&self) -> Result<DateTime<Utc>, BootMailError>;

    /// Latest event whose ID is one of [`crate::model::CRASH_EVENT_IDS`]
    fn latest_crash_marker(&self) -> Gathered<Option<LogEvent>>;

    /// Critical and Error events, ascending by time.
    ///
    /// With a `reference` only events in `[reference - hours_before, reference]`
    /// qualify, otherwise the latest `limit` overall are returned. An `Err` is
    /// reserved for failures the adapter could not absorb itself.
    fn recent_errors(
        &self,
        reference: Option<DateTime<Utc>>,
        hours_before: u32,
        limit: usize,
    ) -> anyhow::Result<Gathered<Vec<LogEvent>>>;
}
