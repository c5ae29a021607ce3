//! Logging setup.
//!
//! Logging goes through the `log` facade with `env_logger` behind it.
//! Level selection, in priority order:
//!
//! 1. `RUST_LOG`, when set, wins outright.
//! 2. `--quiet`: errors only.
//! 3. `-v` / `-vv`: debug / trace.
//! 4. `--status`: info, printed bare — the concise `A path` / `O path`
//!    event stream.
//! 5. Default: warnings and errors.

use std::env;
use std::io::Write;

use env_logger::Builder;
use log::LevelFilter;

/// Initialize the logging subsystem once, before any scanning starts.
///
/// # Panics
///
/// Panics if called twice; `env_logger` installs a global logger.
pub fn init_logging(verbose: u8, quiet: bool, status: bool) {
    let mut builder = Builder::new();

    if env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
        builder.init();
        return;
    }

    let level = determine_level(verbose, quiet, status);
    builder.filter_level(level);

    if status && verbose == 0 {
        // Event-stream mode: bare messages, nothing else.
        builder.format(|buf, record| writeln!(buf, "{}", record.args()));
    } else if verbose > 0 {
        builder.format(|buf, record| {
            writeln!(buf, "[{}] {}", record.level(), record.args())
        });
    }

    builder.init();
}

/// Map CLI flags to a level filter.
fn determine_level(verbose: u8, quiet: bool, status: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 if status => LevelFilter::Info,
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}
