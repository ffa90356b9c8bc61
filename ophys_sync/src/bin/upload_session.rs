//! Cluster job payload: upload the session at one index of the selected sessions table.

use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[command(version, about = "Upload one session to the document store")]
struct Cli {
    /// Index into the selected sessions.
    index: usize,
}

fn main() -> Result<()> {
    ophys_sync::logging::init_tracing();
    let cli = Cli::parse();
    let cfg = ophys_sync::config::load_config()?;
    for report in ophys_sync::pipeline::upload_index(&cfg, cli.index)? {
        println!("{report}");
    }
    Ok(())
}
