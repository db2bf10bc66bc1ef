// src/http/server.rs

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum_server::{Handle, Server};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::services::ClaimEngine;
use crate::Error;

/// A running API server. Dropping this does not stop it; call `shutdown`.
pub struct HttpServerHandle {
    handle: Handle,
    task: JoinHandle<()>,
}

impl HttpServerHandle {
    /// Stops accepting connections and waits up to `grace` for in-flight
    /// requests.
    pub async fn shutdown(self, grace: Duration) -> Result<(), Error> {
        self.handle.graceful_shutdown(Some(grace));
        self.task.await?;
        Ok(())
    }

    /// Resolves when the server exits on its own.
    pub async fn wait(self) -> Result<(), Error> {
        self.task.await?;
        Ok(())
    }
}

pub async fn start_http_server(
    addr: SocketAddr,
    engine: ClaimEngine,
    trusted_proxies: Vec<IpAddr>,
) -> Result<HttpServerHandle, Error> {
    let app = super::router(engine, trusted_proxies);

    let handle = Handle::new();
    let server = Server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    info!("dealclaim API listening on http://{}", addr);

    let task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("API server error: {}", e);
        }
        info!("API server shut down.");
    });

    Ok(HttpServerHandle { handle, task })
}
