// Copied and edited based on https://github.com/estk/log4rs/pull/295

use std::path::Path;

use anyhow::Context;
use log::LevelFilter;
use log4rs::Handle;
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

const LOG_FILE_SIZE_LIMIT: u64 = 2 * 1024 * 1024;
const LOG_ARCHIVE_COUNT: u32 = 10;

pub fn init_logging(level: LevelFilter, log_dir: &Path) -> anyhow::Result<Handle> {
    let file_path = log_dir.join("bootmail.log");
    let archive_pattern = log_dir.join("bootmail_{}.log");
    let archive_pattern = archive_pattern
        .to_str()
        .with_context(|| format!("Log folder is not valid UTF-8: {log_dir:?}"))?;

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("[BOOTMAIL] {l} - {m}{n}")))
        .build();

    // Pattern: https://docs.rs/log4rs/*/log4rs/append/rolling_file/policy/compound/roll/fixed_window/struct.FixedWindowRollerBuilder.html#method.build
    let trigger = SizeTrigger::new(LOG_FILE_SIZE_LIMIT);
    let roller = FixedWindowRoller::builder()
        .build(archive_pattern, LOG_ARCHIVE_COUNT)
        .context("Failed to create FixedWindowRoller")?;
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let log_file = RollingFileAppender::builder()
        // Pattern: https://docs.rs/log4rs/*/log4rs/encode/pattern/index.html
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} {l} - {m}\n",
        )))
        .build(&file_path, Box::new(policy))
        .with_context(|| format!("Failed to open log file {file_path:?}"))?;

    let config = Config::builder()
        .appender(Appender::builder().build("log_file", Box::new(log_file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(
            Root::builder()
                .appender("log_file")
                .appender("stderr")
                .build(level),
        )
        .context("Failed to configure logging")?;

    let handle = log4rs::init_config(config).context("Failed to init_config")?;

    Ok(handle)
}
