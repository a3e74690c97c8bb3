mod commands;
mod config;
mod main_lib;

use clap::Parser;
use config::Cli;
use main_lib::init_tracing;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    let output = commands::run(&cli)?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}
