//! Logging setup for the devcards server.
//!
//! Structured logging via the `tracing` ecosystem. Verbosity is controlled
//! by `--verbose` / `--quiet`, with `RUST_LOG` as the escape hatch.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber.
///
/// Level resolution order: `--verbose` (debug), `--quiet` (errors only),
/// `RUST_LOG`, then the info default.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    let filter = if verbose {
        EnvFilter::new("devcards=debug,devcards_cli=debug")
    } else if quiet {
        EnvFilter::new("devcards_cli=error")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("devcards=info,devcards_cli=info"))
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    // tracing is global and can only be initialized once per process, so
    // these only cover filter construction.

    #[test]
    fn test_env_filter_construction() {
        let _verbose = EnvFilter::new("devcards=debug,devcards_cli=debug");
        let _quiet = EnvFilter::new("devcards_cli=error");
    }
}
