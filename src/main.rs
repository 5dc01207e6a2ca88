//! The washost command line interface.

use anyhow::Result;
use clap::Parser;

mod commands;

/// Washost: a serverless host runtime for WebAssembly functions
#[derive(Parser)]
#[command(version, author)]
enum Washost {
    /// Run a worker process pulling function calls from the queue
    Worker(commands::WorkerCommand),
}

impl Washost {
    fn execute(self) -> Result<()> {
        match self {
            Self::Worker(c) => c.execute(),
        }
    }
}

fn main() -> Result<()> {
    Washost::parse().execute()
}
