mod bridge;
mod commands;
mod config;
mod dope;
mod error;
mod fs;
mod logging;
mod store;
mod util;
mod volume;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = commands::Cli::parse();
    commands::run(cli)
}
