//! Connection handling over HTTP/1.1 and HTTP/2

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::future::Future;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};
use uplink_core::{KeyNamer, UploadConfig, UploadOrchestrator};
use uplink_engine::LocalStore;

use crate::handlers::handle_request;

/// Shared per-process state behind every connection
pub struct AppState {
    pub orchestrator: UploadOrchestrator,
    pub store: Arc<LocalStore>,
    pub signer: Arc<uplink_core::Ed25519UrlSigner>,
    /// Largest request body accepted on the operation endpoint
    pub max_request_bytes: usize,
}

impl AppState {
    pub fn new(
        store: LocalStore,
        signer: uplink_core::Ed25519UrlSigner,
        namer: KeyNamer,
        config: UploadConfig,
    ) -> uplink_core::Result<Self> {
        let store = Arc::new(store);
        let signer = Arc::new(signer);
        let orchestrator = UploadOrchestrator::new(store.clone(), signer.clone(), namer, config)?;

        Ok(AppState {
            orchestrator,
            store,
            signer,
            max_request_bytes: 1024 * 1024,
        })
    }

    /// Largest part body accepted on a presigned upload
    pub fn max_part_bytes(&self) -> u64 {
        self.store.limits().max_part_size
    }
}

/// Accept connections until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    info!("uplink server listening on {}", listener.local_addr()?);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, remote_addr) = accepted?;
                debug!("New connection from {}", remote_addr);

                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        error!("Connection error from {}: {}", remote_addr, err);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting connections");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let state = state.clone();
        async move { handle_request(req, state).await }
    });

    auto::Builder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
}
