//! WebSocket signaling server for huddle calls
//!
//! Clients connect at `GET /ws?token=...`, speak the JSON frame protocol
//! defined in `protocol`, and receive call events pushed by the engine.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use huddle_signal_server::auth::StaticTokenAuthenticator;
use huddle_signal_server::config::ServerConfig;
use huddle_signal_server::server::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "huddle-signal-server", about = "Call signaling server")]
struct Args {
    /// Listen address
    #[arg(long, default_value = "127.0.0.1:8443")]
    bind: SocketAddr,

    /// SQLite database URL, e.g. sqlite://huddle.db (in-memory if omitted)
    #[arg(long)]
    database_url: Option<String>,

    /// Ring timeout in seconds
    #[arg(long, default_value_t = 45)]
    ring_timeout_secs: u64,

    /// Static auth tokens as comma separated user=token pairs
    #[arg(long, default_value = "")]
    tokens: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_signal_server=debug")),
        )
        .init();

    let args = Args::parse();

    let auth = Arc::new(
        StaticTokenAuthenticator::from_spec(&args.tokens).context("parsing --tokens")?,
    );

    let mut config = ServerConfig::default()
        .with_bind_addr(args.bind)
        .with_ring_timeout(Duration::from_secs(args.ring_timeout_secs));
    if let Some(url) = args.database_url {
        config = config.with_database_url(url);
    }

    SignalServer::builder()
        .with_config(config)
        .with_authenticator(auth)
        .build()
        .await?
        .run()
        .await
}
