//! Entry point for `tftpd`.
//!
//! Parses CLI arguments and hands off to [`tftpd::Server`]. All protocol
//! work lives in the library modules; `main.rs` owns only process setup
//! (logging, argument parsing).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use tftpd::{ServeMode, Server, ServerConfig};

/// TFTP server with option negotiation and windowed transfers.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Address and port to listen on.
    #[arg(short, long, default_value = "0.0.0.0:69")]
    bind: SocketAddr,

    /// Directory files are served from and written into.
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Refuse write requests (serve files only).
    #[arg(long, conflicts_with = "write_only")]
    read_only: bool,

    /// Refuse read requests (accept uploads only).
    #[arg(long)]
    write_only: bool,

    /// Maximum number of simultaneous transfers.
    #[arg(long, default_value_t = 100)]
    max_connections: usize,

    /// Retransmits before a silent peer's session is dropped.
    #[arg(long, default_value_t = 5)]
    max_retry: u32,
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mode = match (cli.read_only, cli.write_only) {
        (true, _) => ServeMode::ReadOnly,
        (_, true) => ServeMode::WriteOnly,
        _ => ServeMode::ReadWrite,
    };

    let config = ServerConfig {
        bind: cli.bind,
        root: cli.root,
        mode,
        max_connections: cli.max_connections,
        max_retry: cli.max_retry,
    };

    let mut server = Server::bind(config)?;
    server.run()?;
    Ok(())
}
