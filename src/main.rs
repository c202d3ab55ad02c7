use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use trackdeck::cli::args::{Cli, Commands};
use trackdeck::cli::commands;
use trackdeck::config::Paths;
use trackdeck::error::StoreError;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run() {
        eprintln!("{}: {}", "error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), StoreError> {
    let cli = Cli::parse();
    let paths = match cli.data_dir {
        Some(root) => Paths::with_root(root),
        None => Paths::new()?,
    };
    let format = cli.output;

    let output = match cli.command {
        Commands::Migrate => commands::migrate(&paths, format)?,
        Commands::Export { target } => commands::export(&paths, &target, format)?,
        Commands::Import { tree, profile } => commands::import(&paths, &tree, &profile, format)?,
        Commands::Sweep => commands::sweep(&paths, format)?,
        Commands::Status => commands::status(&paths, format)?,
    };

    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}
