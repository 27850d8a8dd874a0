//! ground-me CLI entrypoint

use anyhow::Result;
use clap::Parser;

use ground_me::cli::Cli;
use ground_me::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(error) = logging::init(&logging::log_path(&cli.data_dir()), cli.verbose) {
        eprintln!("logging disabled: {error}");
    }

    cli.execute()
}
