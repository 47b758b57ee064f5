use chrono::{DateTime, SecondsFormat, Utc};

/// Event IDs in the System log that indicate the previous session ended badly:
/// 41 Kernel-Power, 6008 unexpected shutdown, 1001 BugCheck
pub const CRASH_EVENT_IDS: [u32; 3] = [41, 6008, 1001];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSnapshot {
    pub machine_name: String,
    pub local_ipv4: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootRecord {
    pub boot_time_utc: DateTime<Utc>,
}

/// One entry of the system event log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub time_utc: DateTime<Utc>,
    pub id: u32,
    pub provider_name: String,
    pub message: String,
}

impl LogEvent {
    pub fn is_crash_marker(&self) -> bool {
        CRASH_EVENT_IDS.contains(&self.id)
    }

    pub fn time_iso(&self) -> String {
        iso_utc(&self.time_utc)
    }
}

/// ISO-8601 with a `Z` suffix
pub fn iso_utc(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(41, true)]
    #[case(6008, true)]
    #[case(1001, true)]
    #[case(7000, false)]
    fn crash_ids(#[case] id: u32, #[case] expected: bool) {
        let event = LogEvent {
            time_utc: Utc::now(),
            id,
            provider_name: String::new(),
            message: String::new(),
        };
        assert_eq!(event.is_crash_marker(), expected);
    }

    #[test]
    fn iso_has_zulu_marker() {
        let time = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap();
        assert_eq!(iso_utc(&time), "2024-03-09T07:05:00Z");
    }
}
