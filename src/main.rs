use std::process;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::LevelFilter;
use transmission_poller::{
    config::{build_config, Cli, FileConfigStore},
    watch,
};

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;
    init_logging(config.log_level);
    let mut store = FileConfigStore::new(config);
    if let Some(theme) = cli.set_theme {
        store.set_theme(theme)?;
        println!("theme set to {}", theme.as_str());
        return Ok(());
    }
    watch::run(&cli, store)
}

fn init_logging(level: LevelFilter) {
    let env = Env::default().default_filter_or(level.to_string());
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
