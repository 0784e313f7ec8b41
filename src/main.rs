use clap::Parser;

use runsync::cli::Cli;
use runsync::commands::{EXIT_FATAL, handle_sync};
use runsync::logging::init_logging;

fn main() {
    let cli = Cli::parse();

    // guard flushes the file layer on drop
    let _guard = match init_logging(cli.verbose, cli.log_file.as_deref()) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("runsync: {:#}", e);
            std::process::exit(EXIT_FATAL);
        }
    };

    let code = match handle_sync(&cli) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            EXIT_FATAL
        }
    };
    drop(_guard);
    std::process::exit(code);
}
