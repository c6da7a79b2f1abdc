//! CLI entry point (spec §6.1). Parses arguments with `clap`, installs
//! structured logging, and creates the one `Session` this process uses.
//! Session creation is the only fatal condition the core defines (spec
//! §7); everywhere else, the binary is the only place allowed genuine
//! top-level failure, reported through `anyhow`.

mod cli;

use anyhow::Context;
use clap::Parser;
use eject_disks::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    eject_disks::init_tracing();
    let cli = cli::Cli::parse();
    let session = Session::new().context("failed to create disk arbitration session")?;
    cli::run(cli, &session).await;
    Ok(())
}
