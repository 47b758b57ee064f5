//! Renders the boot notification email.

use std::fmt::Write;

use chrono::{DateTime, Local, NaiveDateTime, Utc};

use crate::{
    model::{iso_utc, BootRecord, HostSnapshot, LogEvent},
    utils::{html_escape, make_single_line},
};

const SUBJECT_PREFIX: &str = "[BOOT]";
const NO_IPS_SUBJECT: &str = "no IPs";
const NO_IPS_BODY: &str = "(none detected)";
const EVENT_COLUMNS: [&str; 5] = ["UTC", "Local", "ID", "Provider", "Message"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub subject: String,
    pub html: String,
}

pub fn subject_line(host: &HostSnapshot) -> String {
    let ips = if host.local_ipv4.is_empty() {
        NO_IPS_SUBJECT.to_string()
    } else {
        host.local_ipv4.join(", ")
    };
    format!("{SUBJECT_PREFIX} {} is online — {ips}", host.machine_name)
}

/// Converts an ISO-8601 UTC timestamp to `YYYY-MM-DD HH:MM:SS <zone>` in the
/// local timezone. Returns the input unchanged when it cannot be parsed.
pub fn fmt_local(iso_utc: &str) -> String {
    let trimmed = iso_utc.trim();
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // No offset given, taken as UTC
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").map(|naive| naive.and_utc())
        });
    match parsed {
        Ok(utc) => utc
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S %Z")
            .to_string(),
        Err(_) => iso_utc.to_string(),
    }
}

pub fn render_report(
    host: &HostSnapshot,
    boot: &BootRecord,
    crash: Option<&LogEvent>,
    errors: &[LogEvent],
    generated_at: DateTime<Local>,
) -> Report {
    let boot_iso = iso_utc(&boot.boot_time_utc);
    let ip_html = if host.local_ipv4.is_empty() {
        NO_IPS_BODY.to_string()
    } else {
        host.local_ipv4
            .iter()
            .map(|ip| html_escape(ip))
            .collect::<Vec<_>>()
            .join("<br>")
    };

    let mut html = String::new();
    html.push_str("<h2>PC Boot Notification</h2>\n");
    // Writing to a String cannot fail
    let _ = writeln!(html, "<p><b>Machine:</b> {}</p>", html_escape(&host.machine_name));
    let _ = writeln!(html, "<p><b>Local IPv4:</b><br>{ip_html}</p>");
    let _ = writeln!(
        html,
        "<p><b>Boot Time (UTC):</b> {boot_iso}<br>\n<b>Boot Time (Local):</b> {}</p>",
        fmt_local(&boot_iso)
    );
    let _ = writeln!(
        html,
        "<p><i>Startup detected at:</i> {}</p>",
        generated_at.to_rfc2822()
    );
    if let Some(crash) = crash {
        html.push_str(&crash_block(crash));
    }
    html.push_str(&events_table(errors));

    Report {
        subject: subject_line(host),
        html,
    }
}

fn crash_block(crash: &LogEvent) -> String {
    let time = crash.time_iso();
    format!(
        "<h3>Most recent crash marker</h3>\n\
         <ul>\n\
         <li><b>Time (UTC):</b> {time}</li>\n\
         <li><b>Time (Local):</b> {}</li>\n\
         <li><b>Event ID:</b> {}</li>\n\
         <li><b>Provider:</b> {}</li>\n\
         <li><b>Message:</b><br><pre style=\"white-space:pre-wrap\">{}</pre></li>\n\
         </ul>\n",
        fmt_local(&time),
        crash.id,
        html_escape(&crash.provider_name),
        html_escape(&make_single_line(&crash.message)),
    )
}

fn events_table(events: &[LogEvent]) -> String {
    let mut s = String::new();
    s.push_str("<h3>Recent Critical/Error events</h3>\n");
    s.push_str("<table border=\"1\" cellpadding=\"6\" cellspacing=\"0\">\n<thead>\n<tr>");
    for column in EVENT_COLUMNS {
        let _ = write!(s, "<th>{column}</th>");
    }
    s.push_str("</tr>\n</thead>\n<tbody>");
    if events.is_empty() {
        let _ = write!(s, "<tr><td colspan='{}'>(none)</td></tr>", EVENT_COLUMNS.len());
    }
    for event in events {
        let time = event.time_iso();
        let _ = write!(
            s,
            "<tr><td>{time}</td><td>{}</td><td>{}</td><td>{}</td><td><pre style='white-space:pre-wrap'>{}</pre></td></tr>",
            fmt_local(&time),
            event.id,
            html_escape(&event.provider_name),
            html_escape(&make_single_line(&event.message)),
        );
    }
    s.push_str("</tbody>\n</table>\n");
    s
}
