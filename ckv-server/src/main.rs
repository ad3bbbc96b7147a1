//! ClusterKV development server binary.

use std::time::Duration;

use anyhow::Context;
use ckv_server::{DevServer, ServerOptions};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// In-memory ClusterKV node for local development
#[derive(Parser, Debug)]
#[command(name = "ckv-server")]
#[command(version)]
struct Args {
    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:8087")]
    listen: String,

    /// Delay before answering each request, in milliseconds
    #[arg(short, long, default_value = "0")]
    delay_ms: u64,

    /// Keys per listing response message
    #[arg(short, long, default_value = "10")]
    key_chunk: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ckv_server=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    let options = ServerOptions {
        response_delay: Duration::from_millis(args.delay_ms),
        key_chunk: args.key_chunk,
        ..ServerOptions::default()
    };

    let server = DevServer::bind(args.listen.as_str(), options)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("received ctrl-c, shutting down");
    server.shutdown().await;
    Ok(())
}
