//! Command-line interface of the devcards server.
//!
//! The server takes no subcommands: it loads the config file, starts the
//! HTTP front end, and supervises the configured projects until it is
//! interrupted or restarted from the browser.

use clap::Parser;

/// Devcards, a live-reloading devcard server.
#[derive(Parser, Debug)]
#[command(
    name = "devcards",
    version,
    about = "Live-reloading devcard server",
    long_about = "Devcards serves interactive, live-reloading views of devcard-producing\n\
                  functions in your Rust projects. Point your browser at the server, edit\n\
                  your code, and watch the output update."
)]
pub struct Cli {
    /// Port for the devcards server (overrides the configured port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_override() {
        let cli = Cli::parse_from(["devcards", "--port", "8080"]);
        assert_eq!(cli.port, Some(8080));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["devcards"]);
        assert_eq!(cli.port, None);
        assert!(!cli.verbose);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_verbose_quiet_conflict() {
        assert!(Cli::try_parse_from(["devcards", "-v", "-q"]).is_err());
    }
}
