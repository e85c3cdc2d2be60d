//! uplink server binary

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uplink_core::{content_addressed_namer, Ed25519UrlSigner};
use uplink_engine::{LocalStore, StoreLimits};
use uplink_server::{serve, AppState, ServerArgs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = args.upload_config().context("invalid upload configuration")?;

    info!("Data directory: {}", args.data_dir.display());
    info!("Bind address: {}", args.bind);

    if !args.data_dir.exists() {
        std::fs::create_dir_all(&args.data_dir)
            .with_context(|| format!("creating {}", args.data_dir.display()))?;
        info!("Created data directory: {}", args.data_dir.display());
    }

    let store = LocalStore::open(&args.data_dir, StoreLimits::from_config(&config))
        .context("failed to open local store")?;

    let signer = Ed25519UrlSigner::new(args.keypair()?, args.public_url());
    info!(key_id = %signer.key_id(), public_url = %signer.base_url(), "part URL signer ready");

    let namer = content_addressed_namer(args.key_prefix.clone());
    let state = AppState::new(store, signer, namer, config)?;

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;

    serve(listener, Arc::new(state), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    info!("Server shutdown gracefully");
    Ok(())
}
