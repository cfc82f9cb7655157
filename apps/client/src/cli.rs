use std::path::PathBuf;

use clap::Parser;

/// Fetch URLs over HTTP/2, resuming interrupted transfers over TCP Fast Open.
///
/// Press Ctrl-C during a transfer to switch every in-flight transfer to the
/// fallback path from the byte offset already received.
#[derive(Debug, Parser)]
#[command(name = "resumefetch-client", version)]
pub struct Cli {
    /// Enable debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Do not print response bodies.
    #[arg(short, long)]
    pub quiet: bool,

    /// Write TLS session secrets to this file (NSS key log format).
    #[arg(long, value_name = "PATH")]
    pub keylog: Option<PathBuf>,

    /// Skip server certificate verification.
    #[arg(long)]
    pub insecure: bool,

    /// Write a per-transfer event trace (client_<id>.qlog) to the current directory.
    #[arg(long)]
    pub qlog: bool,

    /// Send fallback requests to HOST:PORT instead of the URL's host.
    #[arg(long, value_name = "HOST:PORT")]
    pub fallback_origin: Option<String>,

    /// Configuration file (default: ~/.config/resumefetch/client.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// URLs to fetch concurrently.
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,
}
