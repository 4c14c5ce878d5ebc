//! Admin API server.

use crate::admin_api::router::route_request;
use crate::control::RuleService;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

/// Admin API server
pub struct AdminApiServer {
    addr: SocketAddr,
    service: Arc<RuleService>,
}

impl AdminApiServer {
    pub fn new(addr: SocketAddr, service: Arc<RuleService>) -> Self {
        Self { addr, service }
    }

    /// Bind the admin address. Binding up front lets a bad address fail
    /// startup instead of a background task.
    pub async fn bind(self) -> Result<BoundAdminApi, anyhow::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Admin API listening on http://{}", local_addr);
        Ok(BoundAdminApi {
            listener,
            local_addr,
            service: self.service,
        })
    }

    /// Bind and serve until `shutdown` flips to true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        self.bind().await?.serve(shutdown).await
    }
}

/// Admin API with its socket bound
pub struct BoundAdminApi {
    listener: TcpListener,
    local_addr: SocketAddr,
    service: Arc<RuleService>,
}

impl BoundAdminApi {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), anyhow::Error> {
        loop {
            let (stream, _) = tokio::select! {
                accepted = self.listener.accept() => accepted?,
                _ = shutdown.changed() => break,
            };
            let io = TokioIo::new(stream);
            let service = Arc::clone(&self.service);

            tokio::spawn(async move {
                let svc = service_fn(move |req| {
                    let service = Arc::clone(&service);
                    async move { route_request(req, service).await }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                    debug!("Admin API connection error: {}", e);
                }
            });
        }
        debug!("Admin API on {} stopped", self.local_addr);
        Ok(())
    }
}
