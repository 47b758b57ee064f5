use std::{
    fs,
    path::{Path, PathBuf},
};

use log::debug;
use serde::Deserialize;

use crate::{errors::BootMailError, Seconds};

/// Tuning that does not carry secrets. Every field is optional in the file.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// SMTP submission server (STARTTLS)
    pub smtp_server: String,

    pub smtp_port: u16,

    /// Upper bound for a single SMTP exchange
    pub smtp_timeout: Seconds,

    /// Upper bound for a single PowerShell invocation
    pub query_timeout: Seconds,

    /// Executable used to run system queries
    pub powershell_path: PathBuf,

    /// Size of the window before a crash marker searched for errors
    pub hours_before: u32,

    /// Maximum number of error events placed in the report
    pub event_limit: usize,

    /// Folder for the rolling log file
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smtp_server: "smtp.gmail.com".to_string(),
            smtp_port: 587,
            smtp_timeout: 30.into(),
            query_timeout: 60.into(),
            powershell_path: default_powershell_path(),
            hours_before: 6,
            event_limit: 10,
            log_dir: PathBuf::from("log"),
        }
    }
}

fn default_powershell_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\Windows\System32\WindowsPowerShell\v1.0\powershell.exe")
    } else {
        PathBuf::from("pwsh")
    }
}

impl Config {
    pub fn load_from(config_path: &Path) -> anyhow::Result<Config> {
        debug!("Loading Config from: {config_path:?}");
        let file_contents = fs::read_to_string(config_path).map_err(|e| {
            BootMailError::Configuration(format!("failed to read {config_path:?}: {e}"))
        })?;
        let result = serde_json::from_str(&file_contents).map_err(|e| {
            BootMailError::Configuration(format!("failed to parse {config_path:?}: {e}"))
        })?;
        Ok(result)
    }

    /// Loads `explicit` if given (must succeed), otherwise `implicit` if it
    /// exists, otherwise the defaults. An unusable implicit file falls back to
    /// the defaults and is handed back in [`LoadedConfig::ignored`].
    pub fn resolve(explicit: Option<&Path>, implicit: &Path) -> anyhow::Result<LoadedConfig> {
        match explicit {
            Some(path) => Ok(Self::load_from(path)?.into()),
            None if implicit.is_file() => match Self::load_from(implicit) {
                Ok(config) => Ok(config.into()),
                Err(e) => Ok(LoadedConfig {
                    config: Config::default(),
                    ignored: Some(e.context(format!("Ignored {implicit:?}, using defaults"))),
                }),
            },
            None => {
                debug!("No config file found, using defaults");
                Ok(Config::default().into())
            }
        }
    }
}

/// Config plus the problem with an implicit file that was skipped, if any.
/// Kept until logging is up so it can be reported.
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: Config,
    pub ignored: Option<anyhow::Error>,
}

impl From<Config> for LoadedConfig {
    fn from(config: Config) -> Self {
        Self {
            config,
            ignored: None,
        }
    }
}

/// Credentials and recipient for the mail client
#[derive(Clone, PartialEq, Eq)]
pub struct MailSettings {
    pub login: String,
    pub password: String,
    pub recipient: String,
}

impl std::fmt::Debug for MailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailSettings")
            .field("login", &self.login)
            .field("password", &"<redacted>")
            .field("recipient", &self.recipient)
            .finish()
    }
}

/// Everything read from the process environment
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    /// `None` unless both address and password are present
    pub mail: Option<MailSettings>,

    /// Used when live address detection fails
    pub machine_ip: Option<String>,

    pub debug: bool,
}

impl Environment {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mail = match (get("EMAIL_ADDRESS"), get("EMAIL_PASSWORD")) {
            (Some(login), Some(password)) => {
                let recipient = get("MAIN_EMAIL_ADDRESS").unwrap_or_else(|| login.clone());
                Some(MailSettings {
                    login,
                    password,
                    recipient,
                })
            }
            _ => None,
        };

        Self {
            mail,
            machine_ip: get("MACHINE_IP").map(|ip| ip.trim().to_string()),
            debug: get("BOOTMAIL_DEBUG").as_deref() == Some("1"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_of(pairs: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn address_without_password_gives_no_mail() {
        // Arrange / Act
        let env = env_of(&[("EMAIL_ADDRESS", "me@example.com")]);

        // Assert
        assert_eq!(env.mail, None);
    }

    #[test]
    fn empty_password_counts_as_unset() {
        let env = env_of(&[("EMAIL_ADDRESS", "me@example.com"), ("EMAIL_PASSWORD", "")]);
        assert_eq!(env.mail, None);
    }

    #[test]
    fn recipient_defaults_to_sender() {
        let env = env_of(&[("EMAIL_ADDRESS", "me@example.com"), ("EMAIL_PASSWORD", "pw")]);

        let mail = env.mail.unwrap();

        assert_eq!(mail.recipient, "me@example.com");
        assert_eq!(mail.login, "me@example.com");
    }

    #[test]
    fn recipient_overridden() {
        let env = env_of(&[
            ("EMAIL_ADDRESS", "me@example.com"),
            ("EMAIL_PASSWORD", "pw"),
            ("MAIN_EMAIL_ADDRESS", "admin@example.com"),
        ]);
        assert_eq!(env.mail.unwrap().recipient, "admin@example.com");
    }

    #[test]
    fn debug_and_fallback_ip() {
        let env = env_of(&[("BOOTMAIL_DEBUG", "1"), ("MACHINE_IP", " 10.0.0.9 ")]);
        assert!(env.debug);
        assert_eq!(env.machine_ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn debug_requires_exact_one() {
        let env = env_of(&[("BOOTMAIL_DEBUG", "yes")]);
        assert!(!env.debug);
    }

    #[test]
    fn password_not_in_debug_output() {
        let env = env_of(&[("EMAIL_ADDRESS", "me@example.com"), ("EMAIL_PASSWORD", "hunter2")]);
        assert!(!format!("{env:?}").contains("hunter2"));
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let actual: Config = serde_json::from_str(r#"{"hours_before": 12}"#).unwrap();
        assert_eq!(actual.hours_before, 12);
        assert_eq!(actual.event_limit, 10);
        assert_eq!(actual.smtp_port, 587);
    }

    #[test]
    fn missing_implicit_file_uses_defaults() {
        let actual = Config::resolve(None, Path::new("definitely/not/here/bootmail.json")).unwrap();
        assert_eq!(actual.config, Config::default());
        assert!(actual.ignored.is_none());
    }

    #[test]
    fn missing_explicit_file_is_configuration_error() {
        let err = Config::resolve(Some(Path::new("definitely/not/here.json")), Path::new("x"))
            .unwrap_err();
        assert_eq!(BootMailError::find_in(&err).map(|e| e.kind()), Some("ConfigurationError"));
    }

    fn temp_config(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("bootmail-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn malformed_implicit_file_falls_back_to_defaults() {
        // Arrange
        let path = temp_config("implicit.json", "{ not json");

        // Act
        let actual = Config::resolve(None, &path);

        // Assert
        let _ = fs::remove_file(&path);
        let actual = actual.unwrap();
        assert_eq!(actual.config, Config::default());
        let ignored = actual.ignored.expect("problem kept for logging");
        assert!(format!("{ignored:#}").contains("failed to parse"));
    }

    #[test]
    fn malformed_explicit_file_is_fatal() {
        let path = temp_config("explicit.json", "{ not json");

        let actual = Config::resolve(Some(&path), Path::new("x"));

        let _ = fs::remove_file(&path);
        let err = actual.unwrap_err();
        assert_eq!(BootMailError::find_in(&err).map(|e| e.kind()), Some("ConfigurationError"));
    }

    #[test]
    fn valid_implicit_file_is_used() {
        let path = temp_config("valid.json", r#"{"event_limit": 3}"#);

        let actual = Config::resolve(None, &path);

        let _ = fs::remove_file(&path);
        let actual = actual.unwrap();
        assert_eq!(actual.config.event_limit, 3);
        assert!(actual.ignored.is_none());
    }
}
