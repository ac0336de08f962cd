//! Shardscript CLI
//!
//! Runs script files through a simulated server loop and inspects the
//! resolved configuration.

use shardscript_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
