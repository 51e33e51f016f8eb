use anyhow::Result;
use clap::Parser;

use isolator::cli::{Cli, Commands};
use isolator::ops;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run() {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let load = || ops::load_target(cli.target.as_deref(), cli.config.as_deref(), cli.ask_password);

    match &cli.command {
        Commands::Dump { id } => {
            ops::do_dump(&load()?, id)?;
        }
        Commands::Restore { id } => {
            ops::do_restore(&load()?, id)?;
        }
        Commands::Discard { id } => {
            ops::do_discard(&load()?, id)?;
        }
        Commands::Plan { operation, id } => {
            ops::do_plan(&load()?, *operation, id)?;
        }
        Commands::Check => {
            ops::do_check(&load()?)?;
        }
        Commands::Name { id } => {
            ops::do_name(&load()?, id);
        }
        Commands::Variants => {
            ops::do_variants();
        }
        Commands::Version => {
            ops::do_version();
        }
    }

    Ok(())
}
