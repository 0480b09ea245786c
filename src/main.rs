use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cesso_uci::UciEngine;

fn main() -> Result<()> {
    // Route tracing output to stderr -- stdout is reserved for the UCI protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    info!("cesso starting");
    UciEngine::new().run()?;
    Ok(())
}
