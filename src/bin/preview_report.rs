use bootmail::{
    load_config, render_report, BootRecord, Environment, HostSnapshot, SystemQueryAdapter,
};
use chrono::Local;
use clap::Parser;

#[derive(Parser, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
#[command(author, version, about)]
/// Gathers the boot data and prints the report that would be emailed, without sending it
struct Cli {
    /// Specify config file to use
    #[arg(long = "config", short, value_name = "PATH")]
    config_filename: Option<String>,

    /// Only print the subject line
    #[arg(long)]
    subject_only: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = load_config(&bootmail::Cli {
        config_filename: cli.config_filename.clone(),
        ..Default::default()
    })?;
    if let Some(e) = &loaded.ignored {
        eprintln!("{e:#}");
    }
    let config = loaded.config;
    let env = Environment::from_env();
    let system = bootmail::windows_system(&config, &env);

    let host = HostSnapshot {
        machine_name: system.machine_name(),
        local_ipv4: system.local_ipv4().into_value(),
    };
    let boot = BootRecord {
        boot_time_utc: system.boot_time_utc()?,
    };
    let crash = system.latest_crash_marker().into_value();
    let errors = system
        .recent_errors(
            crash.as_ref().map(|c| c.time_utc),
            config.hours_before,
            config.event_limit,
        )?
        .into_value();

    let report = render_report(&host, &boot, crash.as_ref(), &errors, Local::now());
    println!("{}", report.subject);
    if !cli.subject_only {
        println!("{}", report.html);
    }
    Ok(())
}
