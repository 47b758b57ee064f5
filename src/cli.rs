use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use log::LevelFilter;

/// Config file looked for in the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILENAME: &str = "bootmail.json";

#[derive(Parser, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[command(
    author,
    version,
    about,
    long_about = "Sends an email when the machine boots with its addresses, the latest crash marker and recent system errors."
)]
pub struct Cli {
    /// Specify config file to use
    ///
    /// If not specified uses `bootmail.json` in the working directory when it
    /// exists, otherwise built in defaults
    #[arg(long = "config", short, value_name = "PATH")]
    pub config_filename: Option<String>,

    /// Set logging level to use
    #[arg(long, short, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Same as setting BOOTMAIL_DEBUG=1
    #[arg(long)]
    pub debug: bool,
}

impl Cli {
    pub fn get_config_path(&self) -> Option<PathBuf> {
        self.config_filename.as_ref().map(PathBuf::from)
    }

    /// Debug mode never logs below `Debug`
    pub fn effective_level(&self, debug: bool) -> LevelFilter {
        let level: LevelFilter = self.log_level.into();
        if debug {
            level.max(LevelFilter::Debug)
        } else {
            level
        }
    }
}

/// Exists to provide better help messages variants copied from LevelFilter as
/// that's the type that is actually needed
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Default)]
pub enum LogLevel {
    /// Nothing emitted in this mode
    #[default]
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
