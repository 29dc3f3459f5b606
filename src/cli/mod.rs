use clap::{Parser, Subcommand};

use crate::blockchain::{Ledger, ProofOfWork};
use crate::error::LedgerError;

#[derive(Parser)]
#[command(
    name = "sealchain",
    about = "Append-only ledger of opaque records, each block sealed by proof-of-work",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Seal a new block over the given data and append it to the ledger
    Add {
        #[arg(long, help = "Payload to record in the new block")]
        data: String,
    },
    /// Walk the chain from newest to oldest, printing every block
    Print,
}

/// Handle `add`: seal one block and report its identity.
pub fn add(ledger: &Ledger, data: String) -> Result<(), LedgerError> {
    let block = ledger.append(data.into_bytes())?;
    println!("sealed block {}", hex::encode(&block.hash));
    println!("nonce: {}", block.nonce);
    Ok(())
}

/// Handle `print`: report every block from the tip back to genesis.
pub fn print(ledger: &Ledger) -> Result<(), LedgerError> {
    for (i, item) in ledger.iterator()?.enumerate() {
        let block = item?;
        let pow = ProofOfWork::new(&block, ledger.difficulty());

        println!();
        println!("Block {i}");
        println!("Data:          {}", String::from_utf8_lossy(&block.payload));
        println!("Hash:          {}", hex::encode(&block.hash));
        println!("Previous Hash: {}", hex::encode(&block.previous_hash));
        println!("Proof of Work: {}", pow.validate());
    }
    Ok(())
}
