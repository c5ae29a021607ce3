//! dirsweep CLI entry point.

use anyhow::Result;
use clap::Parser;

use dirsweep::cli::{self, Cli};
use dirsweep::logging;
use dirsweep::Scanner;

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.quiet, cli.status);

    let config = cli::build_config(&cli)?;
    let hooks = cli::build_hooks(&cli);

    let mut scanner = Scanner::new(config)?.with_hooks(hooks);
    let report = scanner.scan()?;

    log::info!("{}", report.summary());
    Ok(())
}
