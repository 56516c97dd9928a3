//! Logging init for the binary: stderr, no ANSI, filter from `RUST_LOG` or
//! the `-v` count.

use tracing_subscriber::EnvFilter;

pub fn default_filter(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info,rangefetch=info",
        _ => "debug,rangefetch=debug",
    }
}

pub fn init_logging(verbosity: u8) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbosity)));

    // Ignore a second init (tests, embedding).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
