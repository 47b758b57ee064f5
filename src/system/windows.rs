use std::net::Ipv4Addr;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Deserialize;

use super::{machine_name, Gathered, ScriptRunner, SystemQueryAdapter};
use crate::{
    errors::BootMailError,
    model::{iso_utc, LogEvent, CRASH_EVENT_IDS},
};

const CRASH_SCAN_MAX_EVENTS: usize = 200;
const WINDOWED_SCAN_MAX_EVENTS: usize = 1000;
const OVERALL_SCAN_MAX_EVENTS: usize = 500;

/// Projection shared by every event query, emits the time as ISO-8601 UTC
const SELECT_EVENT_FIELDS: &str = "Select-Object @{n='TimeCreated';e={$_.TimeCreated.ToUniversalTime().ToString('o')}},Id,ProviderName,Message";

/// Queries the Windows System event log and network stack through a [`ScriptRunner`]
pub struct WindowsEventLog<R: ScriptRunner> {
    runner: R,
    fallback_ip: Option<String>,
}

impl<R: ScriptRunner> WindowsEventLog<R> {
    pub fn new(runner: R, fallback_ip: Option<String>) -> Self {
        Self {
            runner,
            fallback_ip,
        }
    }

    pub fn boot_time_script() -> &'static str {
        "(Get-CimInstance Win32_OperatingSystem).LastBootUpTime.ToUniversalTime().ToString('o')"
    }

    pub fn ipv4_script() -> &'static str {
        "Get-NetIPAddress -AddressFamily IPv4 \
         | Where-Object { $_.InterfaceOperationalStatus -eq 'Up' -and $_.IPAddress -notlike '169.*' -and $_.IPAddress -ne '127.0.0.1' } \
         | Select-Object -ExpandProperty IPAddress"
    }

    pub fn crash_marker_script() -> String {
        let ids = CRASH_EVENT_IDS.map(|id| id.to_string()).join(",");
        format!(
            "Get-WinEvent -FilterHashtable @{{LogName='System'; Id={ids}}} -MaxEvents {CRASH_SCAN_MAX_EVENTS} -ErrorAction SilentlyContinue \
             | Sort-Object TimeCreated | {SELECT_EVENT_FIELDS} | Select-Object -Last 1 | ConvertTo-Json -Depth 3 -Compress"
        )
    }

    /// Latest `limit` Critical/Error events regardless of time
    pub fn overall_errors_script(limit: usize) -> String {
        format!(
            "Get-WinEvent -FilterHashtable @{{LogName='System'; Level=1,2}} -MaxEvents {OVERALL_SCAN_MAX_EVENTS} -ErrorAction SilentlyContinue \
             | Sort-Object TimeCreated | Select-Object -Last {limit} | {SELECT_EVENT_FIELDS} | ConvertTo-Json -Depth 3 -Compress"
        )
    }

    /// Latest `limit` Critical/Error events inside `[reference - hours_before, reference]`
    pub fn windowed_errors_script(
        reference: &DateTime<Utc>,
        hours_before: u32,
        limit: usize,
    ) -> String {
        let reference = iso_utc(reference);
        format!(
            "$t=[datetime]::Parse('{reference}', [System.Globalization.CultureInfo]::InvariantCulture, [System.Globalization.DateTimeStyles]::AdjustToUniversal); \
             $start=$t.AddHours(-{hours_before}); \
             Get-WinEvent -FilterHashtable @{{LogName='System'; Level=1,2}} -MaxEvents {WINDOWED_SCAN_MAX_EVENTS} -ErrorAction SilentlyContinue \
             | Where-Object {{ $_.TimeCreated.ToUniversalTime() -le $t -and $_.TimeCreated.ToUniversalTime() -ge $start }} \
             | Sort-Object TimeCreated | Select-Object -Last {limit} | {SELECT_EVENT_FIELDS} | ConvertTo-Json -Depth 3 -Compress"
        )
    }

    fn query_events(&self, script: &str) -> anyhow::Result<Vec<LogEvent>> {
        let out = self.runner.run(script)?;
        parse_events(&out)
    }

    fn primary_errors(
        &self,
        reference: Option<DateTime<Utc>>,
        hours_before: u32,
        limit: usize,
    ) -> anyhow::Result<Vec<LogEvent>> {
        match reference {
            Some(reference) => {
                let script = Self::windowed_errors_script(&reference, hours_before, limit);
                let events = self.query_events(&script)?;
                Ok(keep_window(events, reference, hours_before, limit))
            }
            None => {
                let mut events = self.query_events(&Self::overall_errors_script(limit))?;
                sort_and_keep_last(&mut events, limit);
                Ok(events)
            }
        }
    }
}

impl<R: ScriptRunner> SystemQueryAdapter for WindowsEventLog<R> {
    fn machine_name(&self) -> String {
        machine_name()
    }

    fn local_ipv4(&self) -> Gathered<Vec<String>> {
        let fallback: Vec<String> = self.fallback_ip.iter().cloned().collect();
        match self.runner.run(Self::ipv4_script()) {
            Ok(out) => {
                let detected = parse_ipv4_lines(&out);
                if detected.is_empty() {
                    Gathered::Degraded {
                        value: fallback,
                        reason: "no usable IPv4 address detected".to_string(),
                    }
                } else {
                    Gathered::Found(detected)
                }
            }
            Err(e) => Gathered::Degraded {
                value: fallback,
                reason: format!("IPv4 detection failed: {e:#}"),
            },
        }
    }

    fn boot_time_utc(&self) -> Result<DateTime<Utc>, BootMailError> {
        let out = self
            .runner
            .run(Self::boot_time_script())
            .map_err(|e| BootMailError::Query(format!("boot time query failed: {e:#}")))?;
        parse_utc(&out).ok_or_else(|| {
            BootMailError::Query(format!("boot time query returned unparsable value: {out:?}"))
        })
    }

    fn latest_crash_marker(&self) -> Gathered<Option<LogEvent>> {
        match self.query_events(&Self::crash_marker_script()) {
            Ok(events) => Gathered::Found(
                events
                    .into_iter()
                    .filter(LogEvent::is_crash_marker)
                    .max_by_key(|e| e.time_utc),
            ),
            Err(e) => Gathered::Degraded {
                value: None,
                reason: format!("crash marker query failed: {e:#}"),
            },
        }
    }

    fn recent_errors(
        &self,
        reference: Option<DateTime<Utc>>,
        hours_before: u32,
        limit: usize,
    ) -> anyhow::Result<Gathered<Vec<LogEvent>>> {
        let primary_err = match self.primary_errors(reference, hours_before, limit) {
            Ok(events) => return Ok(Gathered::Found(events)),
            Err(e) => e,
        };
        warn!("Recent errors query failed, falling back to latest events overall: {primary_err:#}");

        // Better something than nothing: the fallback ignores the window on purpose
        let result = match self.query_events(&Self::overall_errors_script(limit)) {
            Ok(mut events) => {
                sort_and_keep_last(&mut events, limit);
                Gathered::Degraded {
                    value: events,
                    reason: format!("windowed query failed, showing latest overall: {primary_err:#}"),
                }
            }
            Err(fallback_err) => Gathered::Degraded {
                value: Vec::new(),
                reason: format!("recent errors unavailable: {primary_err:#}; fallback: {fallback_err:#}"),
            },
        };
        Ok(result)
    }
}

/// Shape of one event as emitted by `ConvertTo-Json`
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "TimeCreated")]
    time_created: Option<String>,
    #[serde(rename = "Id", default)]
    id: u32,
    #[serde(rename = "ProviderName", default)]
    provider_name: Option<String>,
    #[serde(rename = "Message", default)]
    message: Option<String>,
}

/// `ConvertTo-Json` emits a bare object when there is exactly one result
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(RawEvent),
    Many(Vec<RawEvent>),
}

impl TryFrom<RawEvent> for LogEvent {
    type Error = anyhow::Error;

    fn try_from(raw: RawEvent) -> anyhow::Result<Self> {
        let time = raw.time_created.context("event has no TimeCreated")?;
        let time_utc =
            parse_utc(&time).with_context(|| format!("unparsable TimeCreated: {time:?}"))?;
        Ok(LogEvent {
            time_utc,
            id: raw.id,
            provider_name: raw.provider_name.unwrap_or_default(),
            message: raw.message.unwrap_or_default(),
        })
    }
}

/// Empty output means no matching events
fn parse_events(out: &str) -> anyhow::Result<Vec<LogEvent>> {
    let out = out.trim();
    if out.is_empty() {
        return Ok(Vec::new());
    }
    let raw = match serde_json::from_str::<OneOrMany>(out)
        .with_context(|| format!("failed to parse event JSON: {out:?}"))?
    {
        OneOrMany::One(event) => vec![event],
        OneOrMany::Many(events) => events,
    };
    let events = raw
        .into_iter()
        .filter_map(|raw| match LogEvent::try_from(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Dropping event: {e:#}");
                None
            }
        })
        .collect();
    Ok(events)
}

fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn parse_ipv4_lines(out: &str) -> Vec<String> {
    out.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<Ipv4Addr>() {
            Ok(addr) if addr.is_loopback() || addr.is_link_local() => {
                debug!("Ignoring address {addr}");
                None
            }
            Ok(addr) => Some(addr.to_string()),
            Err(e) => {
                warn!("Ignoring unexpected line in IPv4 output {line:?}: {e}");
                None
            }
        })
        .collect()
}

fn sort_and_keep_last(events: &mut Vec<LogEvent>, limit: usize) {
    events.sort_by_key(|e| e.time_utc);
    let excess = events.len().saturating_sub(limit);
    events.drain(..excess);
}

fn keep_window(
    mut events: Vec<LogEvent>,
    reference: DateTime<Utc>,
    hours_before: u32,
    limit: usize,
) -> Vec<LogEvent> {
    // A window reaching past the representable range simply starts at the beginning
    let start = Duration::try_hours(i64::from(hours_before))
        .and_then(|span| reference.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    events.retain(|e| e.time_utc >= start && e.time_utc <= reference);
    sort_and_keep_last(&mut events, limit);
    events
}
