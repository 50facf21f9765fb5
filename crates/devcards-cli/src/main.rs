//! Devcards server entry point.

use clap::Parser;
use devcards_cli::{cli, error, logger, server};
use miette::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    logger::init_logger(args.verbose, args.quiet, args.no_color);

    server::run(args.port).await.map_err(error::to_miette)
}
