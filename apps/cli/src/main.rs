//! rangemeld CLI: merge geo/IP reference data into mmdb-ready records.
//!
//! Reads CSV and IPFire inputs described by a TOML config, merges them per
//! output database and writes an NDJSON handoff file plus a build manifest.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli)
}
