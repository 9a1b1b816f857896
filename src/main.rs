//! Binary entry point for `txpublish`.

use std::process;

#[tokio::main]
async fn main() {
    if let Err(e) = txpublish::run_cli().await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
