//! Media ingest server.
//!
//! Accepts a media stream over a websocket, persists it when the stream ends,
//! and serves the stored bytes back over HTTP.

mod api;
mod config;
mod ingest;
mod openapi;
mod registry;
mod startup;
mod state;
mod store;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "media-ingest-server")]
pub(crate) struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// File the finished stream is written to
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Optional server config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,media_ingest_server=info")
        }))
        .init();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("MEDIA_INGEST_GIT_SHA"),
        build_date = env!("MEDIA_INGEST_BUILD_DATE"),
        "media-ingest-server build"
    );

    startup::run(args).await
}
