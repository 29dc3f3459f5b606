mod blockchain;
mod cli;
mod error;
mod store;

use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use std::env;

use blockchain::{DEFAULT_DIFFICULTY, Ledger};
use cli::{Cli, Commands};
use store::Store;

fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    env_logger::init();

    let cli = Cli::parse();

    let path = env::var("LEDGER_PATH").unwrap_or_else(|_| "ledger-db".to_string());
    let difficulty: u32 = env::var("DIFFICULTY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_DIFFICULTY);
    anyhow::ensure!(
        (1..256).contains(&difficulty),
        "DIFFICULTY must be between 1 and 255, got {difficulty}"
    );

    let store = Store::open(&path).with_context(|| format!("opening ledger store at {path}"))?;
    let ledger = Ledger::open(store, difficulty)?;

    let result = match cli.command {
        Commands::Add { data } => cli::add(&ledger, data),
        Commands::Print => cli::print(&ledger),
    };

    ledger.close()?;
    result?;
    Ok(())
}
