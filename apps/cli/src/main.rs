//! itinera CLI — trip planning over a streaming chat bot.
//!
//! Sends a trip request upstream, reads the event-stream answer, and prints
//! the structured itinerary extracted from it.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
