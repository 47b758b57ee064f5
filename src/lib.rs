mod cli;
mod config;
mod errors;
mod logging;
mod model;
mod notification;
mod report;
mod runner;
mod state_management;
mod system;
mod units;
mod utils;

use std::path::Path;

use log::{debug, info};

pub use cli::{Cli, LogLevel, DEFAULT_CONFIG_FILENAME};
pub use config::{Config, Environment, LoadedConfig, MailSettings};
pub use errors::BootMailError;
pub use logging::init_logging;
pub use model::{BootRecord, HostSnapshot, LogEvent, CRASH_EVENT_IDS};
pub use notification::{BodyKind, EmailClient, Mailer};
pub use report::{fmt_local, render_report, subject_line, Report};
pub use runner::{RunOptions, Runner};
pub use state_management::RunState;
pub use system::{Gathered, PowerShell, ScriptRunner, SystemQueryAdapter, WindowsEventLog};
pub(crate) use units::Seconds;

/// Query adapter used by the binaries
pub fn windows_system(config: &Config, env: &Environment) -> WindowsEventLog<PowerShell> {
    WindowsEventLog::new(
        PowerShell::new(config.powershell_path.clone(), config.query_timeout.into()),
        env.machine_ip.clone(),
    )
}

/// Loads the config file named on the command line, or the default one if present
pub fn load_config(cli: &Cli) -> anyhow::Result<LoadedConfig> {
    Config::resolve(
        cli.get_config_path().as_deref(),
        Path::new(DEFAULT_CONFIG_FILENAME),
    )
}

/// Without credentials there is nobody to tell about any failure, so this is
/// checked before anything else happens
pub fn build_client(config: &Config, env: &Environment) -> Result<EmailClient, BootMailError> {
    let mail = env.mail.clone().ok_or_else(|| {
        BootMailError::Configuration("EMAIL_ADDRESS/EMAIL_PASSWORD not set in environment".to_string())
    })?;
    Ok(EmailClient::new(
        config.smtp_server.clone(),
        config.smtp_port,
        config.smtp_timeout.into(),
        mail,
    ))
}

pub fn run(cli: &Cli, config: &Config, env: &Environment) -> anyhow::Result<()> {
    let client = build_client(config, env)?;
    debug!("Email client built. From={}", client.login());

    let system = windows_system(config, env);
    let options = RunOptions {
        hours_before: config.hours_before,
        event_limit: config.event_limit,
        debug: env.debug || cli.debug,
    };
    Runner::new(&system, &client, options).run()?;
    info!("Completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with_mail() -> Environment {
        Environment::from_lookup(|key| match key {
            "EMAIL_ADDRESS" => Some("me@example.com".to_string()),
            "EMAIL_PASSWORD" => Some("pw".to_string()),
            _ => None,
        })
    }

    #[test]
    fn client_built_from_credentials() {
        let client = build_client(&Config::default(), &env_with_mail()).unwrap();
        assert_eq!(client.login(), "me@example.com");
    }

    #[test]
    fn missing_credentials_is_configuration_error() {
        let env = Environment::from_lookup(|key| {
            (key == "EMAIL_ADDRESS").then(|| "me@example.com".to_string())
        });

        let actual = build_client(&Config::default(), &env).unwrap_err();

        assert_eq!(actual.kind(), "ConfigurationError");
    }

    #[test]
    fn run_aborts_before_gathering_without_credentials() {
        // Arrange
        let config = Config {
            // Any attempt to query the system would fail loudly with this
            powershell_path: "bootmail-no-such-shell".into(),
            ..Default::default()
        };

        // Act
        let actual = run(&Cli::default(), &config, &Environment::default()).unwrap_err();

        // Assert
        assert_eq!(
            BootMailError::find_in(&actual).map(|e| e.kind()),
            Some("ConfigurationError")
        );
        assert!(!format!("{actual:#}").contains("bootmail-no-such-shell"));
    }
}
