use bootmail::{init_logging, load_config, run, Cli, Environment};
use clap::Parser;
use log::warn;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env = Environment::from_env();
    let loaded = load_config(&cli)?;
    let config = loaded.config;

    // The boot email matters more than the log file
    let _handle = match init_logging(cli.effective_level(env.debug || cli.debug), &config.log_dir) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("[BOOTMAIL] Logging disabled: {e:?}");
            None
        }
    };
    if let Some(e) = loaded.ignored {
        warn!("{e:#}");
    }

    run(&cli, &config, &env)?;
    Ok(())
}
