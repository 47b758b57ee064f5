use anyhow::Context;
use chrono::Local;
use log::{debug, error, info, warn};

use crate::{
    model::{BootRecord, HostSnapshot},
    notification::{BodyKind, Mailer},
    report::render_report,
    state_management::RunState,
    system::SystemQueryAdapter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub hours_before: u32,
    pub event_limit: usize,
    /// Sends a plain probe email before the report
    pub debug: bool,
}

/// Gathers the boot data, renders the report and mails it.
///
/// Any error that ends the run is reported by email exactly once before it is
/// returned.
pub struct Runner<'a, S: SystemQueryAdapter, M: Mailer> {
    system: &'a S,
    mailer: &'a M,
    options: RunOptions,
    state: RunState,
}

impl<'a, S: SystemQueryAdapter, M: Mailer> Runner<'a, S, M> {
    /// The mail client already exists so the run starts at `ClientBuilt`
    pub fn new(system: &'a S, mailer: &'a M, options: RunOptions) -> Self {
        let mut state = RunState::new();
        state.advance(RunState::ClientBuilt);
        Self {
            system,
            mailer,
            options,
            state,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        match self.run_stages() {
            Ok(()) => {
                self.state.advance(RunState::Sent);
                Ok(())
            }
            Err(e) => {
                self.state.advance(RunState::Failed);
                error!("Run failed: {e:?}");
                notify_failure(self.mailer, &e);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> anyhow::Result<()> {
        let host = self.gather_host();
        let boot = BootRecord {
            boot_time_utc: self
                .system
                .boot_time_utc()
                .context("Failed to determine boot time")?,
        };
        debug!("BootUTC={}", boot.boot_time_utc);

        let crash = self.system.latest_crash_marker();
        if let Some(reason) = crash.degraded_reason() {
            warn!("No crash marker available: {reason}");
        }
        let crash = crash.into_value();
        debug!(
            "Crash marker={}",
            crash.as_ref().map_or("None".to_string(), |c| c.time_iso())
        );

        let reference = crash.as_ref().map(|c| c.time_utc);
        let errors = match self.system.recent_errors(
            reference,
            self.options.hours_before,
            self.options.event_limit,
        ) {
            Ok(gathered) => {
                if let Some(reason) = gathered.degraded_reason() {
                    warn!("Recent errors degraded: {reason}");
                }
                gathered.into_value()
            }
            Err(e) => {
                let e = e.context("Failed to fetch recent error events");
                warn!("{e:#}");
                notify_failure(self.mailer, &e);
                Vec::new()
            }
        };
        debug!("Fetched {} recent error/critical events", errors.len());
        self.state.advance(RunState::DataGathered);

        let report = render_report(&host, &boot, crash.as_ref(), &errors, Local::now());
        self.state.advance(RunState::ReportRendered);
        debug!("Composed email HTML");

        if self.options.debug {
            self.send_probe(&host);
        }

        self.mailer
            .send(&report.subject, &report.html, None, BodyKind::Html)
            .context("Failed to send boot email")?;
        info!("Boot email sent: {}", report.subject);
        Ok(())
    }

    fn gather_host(&self) -> HostSnapshot {
        let machine_name = self.system.machine_name();
        debug!("Machine={machine_name}");
        let ips = self.system.local_ipv4();
        if let Some(reason) = ips.degraded_reason() {
            warn!("Using fallback IPv4 list: {reason}");
        }
        let local_ipv4 = ips.into_value();
        debug!("IPs={local_ipv4:?}");
        HostSnapshot {
            machine_name,
            local_ipv4,
        }
    }

    fn send_probe(&self, host: &HostSnapshot) {
        let subject = format!("[BOOT-TEST] {}", host.machine_name);
        let body = format!("Probe. IPs={:?}", host.local_ipv4);
        match self.mailer.send(&subject, &body, None, BodyKind::Plain) {
            Ok(()) => debug!("Probe email sent"),
            Err(e) => {
                let e = anyhow::Error::new(e).context("Probe email failed");
                warn!("{e:#}");
                notify_failure(self.mailer, &e);
            }
        }
    }
}

/// One attempt, a failure here is logged and never replaces `err`
pub fn notify_failure<M: Mailer + ?Sized>(mailer: &M, err: &anyhow::Error) {
    match mailer.send_failure_report(err) {
        Ok(()) => debug!("Failure report sent"),
        Err(notify_err) => warn!("Failure report could not be sent: {notify_err}"),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::bail;
    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::{
        errors::BootMailError,
        model::LogEvent,
        notification::FAILURE_SUBJECT,
        system::Gathered,
    };

    #[derive(Default)]
    struct FakeSystem {
        boot_fails: bool,
        crash: Option<LogEvent>,
        errors_fail_hard: bool,
        errors: Vec<LogEvent>,
        references: RefCell<Vec<Option<DateTime<Utc>>>>,
    }

    impl SystemQueryAdapter for FakeSystem {
        fn machine_name(&self) -> String {
            "HOST1".to_string()
        }

        fn local_ipv4(&self) -> Gathered<Vec<String>> {
            Gathered::Found(vec!["10.0.0.5".to_string()])
        }

        fn boot_time_utc(&self) -> Result<DateTime<Utc>, BootMailError> {
            if self.boot_fails {
                Err(BootMailError::Query("no boot time".to_string()))
            } else {
                Ok(Utc.with_ymd_and_hms(2024, 5, 1, 6, 30, 0).unwrap())
            }
        }

        fn latest_crash_marker(&self) -> Gathered<Option<LogEvent>> {
            Gathered::Found(self.crash.clone())
        }

        fn recent_errors(
            &self,
            reference: Option<DateTime<Utc>>,
            _hours_before: u32,
            _limit: usize,
        ) -> anyhow::Result<Gathered<Vec<LogEvent>>> {
            self.references.borrow_mut().push(reference);
            if self.errors_fail_hard {
                bail!("event log unavailable");
            }
            Ok(Gathered::Found(self.errors.clone()))
        }
    }

    #[derive(Default)]
    struct FakeMailer {
        /// Subjects starting with this prefix fail to send
        fail_prefix: Option<&'static str>,
        attempts: RefCell<Vec<(String, String, BodyKind)>>,
    }

    impl FakeMailer {
        fn subjects(&self) -> Vec<String> {
            self.attempts.borrow().iter().map(|(s, _, _)| s.clone()).collect()
        }

        fn failure_reports(&self) -> usize {
            self.subjects().iter().filter(|s| *s == FAILURE_SUBJECT).count()
        }
    }

    impl Mailer for FakeMailer {
        fn send(
            &self,
            subject: &str,
            body: &str,
            _recipient: Option<&str>,
            kind: BodyKind,
        ) -> Result<(), BootMailError> {
            self.attempts
                .borrow_mut()
                .push((subject.to_string(), body.to_string(), kind));
            match self.fail_prefix {
                Some(prefix) if subject.starts_with(prefix) => {
                    Err(BootMailError::Delivery("connection refused".to_string()))
                }
                _ => Ok(()),
            }
        }
    }

    fn options(debug: bool) -> RunOptions {
        RunOptions {
            hours_before: 6,
            event_limit: 10,
            debug,
        }
    }

    fn crash_event() -> LogEvent {
        LogEvent {
            time_utc: Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap(),
            id: 41,
            provider_name: "Microsoft-Windows-Kernel-Power".to_string(),
            message: "The system has rebooted without cleanly shutting down first.".to_string(),
        }
    }

    #[test]
    fn sends_boot_email() {
        // Arrange
        let system = FakeSystem::default();
        let mailer = FakeMailer::default();
        let mut runner = Runner::new(&system, &mailer, options(false));

        // Act
        runner.run().unwrap();

        // Assert
        assert_eq!(runner.state(), RunState::Sent);
        let attempts = mailer.attempts.borrow();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].0, "[BOOT] HOST1 is online — 10.0.0.5");
        assert_eq!(attempts[0].2, BodyKind::Html);
        assert!(attempts[0].1.contains("(none)"));
    }

    #[test]
    fn no_crash_queries_without_reference() {
        let system = FakeSystem::default();
        let mailer = FakeMailer::default();

        Runner::new(&system, &mailer, options(false)).run().unwrap();

        assert_eq!(*system.references.borrow(), vec![None]);
    }

    #[test]
    fn crash_time_is_reference() {
        let system = FakeSystem {
            crash: Some(crash_event()),
            ..Default::default()
        };
        let mailer = FakeMailer::default();

        Runner::new(&system, &mailer, options(false)).run().unwrap();

        assert_eq!(*system.references.borrow(), vec![Some(crash_event().time_utc)]);
        assert!(mailer.attempts.borrow()[0].1.contains("Most recent crash marker"));
    }

    #[test]
    fn delivery_failure_reported_once_and_propagated() {
        // Arrange
        let system = FakeSystem::default();
        let mailer = FakeMailer {
            fail_prefix: Some("[BOOT] HOST1"),
            ..Default::default()
        };
        let mut runner = Runner::new(&system, &mailer, options(false));

        // Act
        let actual = runner.run().unwrap_err();

        // Assert
        assert_eq!(BootMailError::find_in(&actual).map(|e| e.kind()), Some("DeliveryError"));
        assert_eq!(mailer.failure_reports(), 1);
        assert_eq!(mailer.subjects().len(), 2);
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[test]
    fn failing_failure_report_does_not_mask_error() {
        let system = FakeSystem::default();
        let mailer = FakeMailer {
            fail_prefix: Some("[BOOT]"),
            ..Default::default()
        };

        let actual = Runner::new(&system, &mailer, options(false)).run().unwrap_err();

        assert!(format!("{actual:#}").contains("Failed to send boot email"));
        assert_eq!(mailer.failure_reports(), 1);
    }

    #[test]
    fn boot_time_failure_is_fatal_after_report() {
        let system = FakeSystem {
            boot_fails: true,
            ..Default::default()
        };
        let mailer = FakeMailer::default();
        let mut runner = Runner::new(&system, &mailer, options(false));

        let actual = runner.run().unwrap_err();

        assert_eq!(BootMailError::find_in(&actual).map(|e| e.kind()), Some("QueryError"));
        assert_eq!(mailer.subjects(), vec![FAILURE_SUBJECT.to_string()]);
        assert!(mailer.attempts.borrow()[0].1.contains("QueryError"));
        assert_eq!(runner.state(), RunState::Failed);
    }

    #[test]
    fn hard_error_query_failure_degrades_to_empty() {
        let system = FakeSystem {
            errors_fail_hard: true,
            ..Default::default()
        };
        let mailer = FakeMailer::default();

        Runner::new(&system, &mailer, options(false)).run().unwrap();

        assert_eq!(
            mailer.subjects(),
            vec![
                FAILURE_SUBJECT.to_string(),
                "[BOOT] HOST1 is online — 10.0.0.5".to_string()
            ]
        );
        assert!(mailer.attempts.borrow()[1].1.contains("(none)"));
    }

    #[test]
    fn debug_sends_probe_first() {
        let system = FakeSystem::default();
        let mailer = FakeMailer::default();

        Runner::new(&system, &mailer, options(true)).run().unwrap();

        let attempts = mailer.attempts.borrow();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].0, "[BOOT-TEST] HOST1");
        assert_eq!(attempts[0].1, r#"Probe. IPs=["10.0.0.5"]"#);
        assert_eq!(attempts[0].2, BodyKind::Plain);
    }

    #[test]
    fn failed_probe_does_not_stop_run() {
        let system = FakeSystem::default();
        let mailer = FakeMailer {
            fail_prefix: Some("[BOOT-TEST]"),
            ..Default::default()
        };

        Runner::new(&system, &mailer, options(true)).run().unwrap();

        assert_eq!(mailer.failure_reports(), 1);
        assert_eq!(mailer.subjects().last().unwrap(), "[BOOT] HOST1 is online — 10.0.0.5");
    }
}
