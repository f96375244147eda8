//! HTTP/1 server for the gateway.

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::handler::{handle_request, GatewayState};
use crate::{Error, Result};

/// Serves the gateway routes on one address.
pub struct GatewayServer {
    bind_address: SocketAddr,
    state: Arc<GatewayState>,
}

impl GatewayServer {
    pub fn new(bind_address: SocketAddr, state: Arc<GatewayState>) -> Self {
        Self {
            bind_address,
            state,
        }
    }

    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(self.bind_address).await.map_err(|e| {
            Error::Configuration(format!("failed to bind {}: {}", self.bind_address, e))
        })?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let local = listener.local_addr()?;
        info!(
            "Storage gateway listening on http://{} ({} backend(s))",
            local,
            self.state.registry.len()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("Connection from {}", addr);
                            let io = TokioIo::new(stream);
                            let state = Arc::clone(&self.state);

                            tokio::spawn(async move {
                                let service = service_fn(move |req| {
                                    let state = Arc::clone(&state);
                                    async move {
                                        Ok::<_, Infallible>(handle_request(req, state).await)
                                    }
                                });

                                if let Err(err) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    if !err.is_incomplete_message() {
                                        warn!("Error serving connection from {}: {}", addr, err);
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Storage gateway shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Serve until ctrl-c.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let (tx, rx) = broadcast::channel(1);

        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
            }
            let _ = tx.send(());
        });

        self.run(rx).await
    }
}
