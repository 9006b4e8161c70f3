// UTXO ledger - CLI

use clap::Parser;
use utxo_ledger::{CancelToken, Cli, CliHandler};

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    // First Ctrl-C stops a running mine, a second one exits
    let cancel = CancelToken::new();
    let interrupt = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if interrupt.is_cancelled() {
            std::process::exit(130);
        }
        log::warn!("Interrupt received, stopping");
        interrupt.cancel();
    }) {
        log::warn!("Could not install Ctrl-C handler: {}", e);
    }

    let mut handler = match CliHandler::new(&cli, cancel) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error initializing: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = handler.handle(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
