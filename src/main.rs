// Proof-of-work ledger node - CLI

use clap::Parser;
use talant_chain::{Cli, CliHandler};

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let config = match cli.node_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut handler = CliHandler::new(config);
    if let Err(e) = handler.handle(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
