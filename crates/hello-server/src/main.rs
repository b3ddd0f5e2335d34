//! hello-server: serves `GET /` -> `hello world` over HTTP/1.1
//!
//! Configuration comes from `HOST`, `PORT`, `WORKERS` and
//! `SHUTDOWN_TIMEOUT_MS`; log filtering from `RUST_LOG` (default `info`).

use hello_core::{Responder, Server, ServerConfig};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> hello_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(
        host = %config.hostname,
        port = config.port,
        workers = config.workers,
        "starting hello-server"
    );

    let runtime = config.build_runtime()?;

    runtime.block_on(async {
        let server = Server::bind(Responder::new(), &config).await?;
        let drained = server.serve(shutdown_signal()).await?;
        if !drained {
            tracing::warn!("exiting with connections still open");
        }
        Ok::<(), hello_core::Error>(())
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received");
}
