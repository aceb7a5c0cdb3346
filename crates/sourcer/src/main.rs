//! `regscore-sourcer-roulette` -- serves images from directories in
//! round-robin order over the sourcer plugin protocol.
//!
//! Launched by `regscore-server` through its `sourcerCmd` setting, e.g.
//! `sourcerCmd: regscore-sourcer-roulette /srv/images`. Running it by
//! hand fails the cookie check and exits.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use regscore_sourcer::protocol::HandshakeConfig;
use regscore_sourcer::roulette::RouletteSourcer;
use regscore_sourcer::serve;

#[derive(Parser)]
#[command(
    name = "regscore-sourcer-roulette",
    version,
    about = "Serve images from directories in round-robin order"
)]
struct Cli {
    /// Directories to pick images from
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries the plugin protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let handshake = HandshakeConfig::default();
    serve::check_cookie(&handshake)?;

    let mut sourcer = RouletteSourcer::from_dirs(&cli.dirs).context("creating sourcer")?;
    serve::serve_stdio(&mut sourcer, &handshake)?;

    Ok(())
}
