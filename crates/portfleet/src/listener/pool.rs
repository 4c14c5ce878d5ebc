//! ListenerPool - lifecycle management for per-port proxy listeners.
//!
//! Each started rule gets its own TCP listener and accept task. Every
//! accepted connection is served on its own task, so a failing request can
//! only ever take down its own connection.

use super::handler::{handle_proxy_request, ListenerContext};
use super::network::{create_listener, resolve_bind_addr};
use super::{ListenerError, ListenerState};
use crate::forwarder::UpstreamForwarder;
use crate::metrics;
use crate::request_log::RequestLog;
use crate::rules::ProxyRule;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// A running listener
struct ListenerHandle {
    rule: Arc<ProxyRule>,
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the live listeners, at most one per port
pub struct ListenerPool {
    bind_host: String,
    forwarder: UpstreamForwarder,
    log: Arc<RequestLog>,
    listeners: RwLock<HashMap<u16, ListenerHandle>>,
    /// Ports currently between `Stopped` and `Running`
    transitions: RwLock<HashMap<u16, ListenerState>>,
}

impl ListenerPool {
    pub fn new(
        bind_host: impl Into<String>,
        forwarder: UpstreamForwarder,
        log: Arc<RequestLog>,
    ) -> Self {
        Self {
            bind_host: bind_host.into(),
            forwarder,
            log,
            listeners: RwLock::new(HashMap::new()),
            transitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn log(&self) -> &Arc<RequestLog> {
        &self.log
    }

    pub fn bind_host(&self) -> &str {
        &self.bind_host
    }

    /// Bind `rule.local_port` and start serving.
    ///
    /// On failure the port stays `Stopped` and nothing else is touched.
    pub async fn start(&self, rule: Arc<ProxyRule>) -> Result<SocketAddr, ListenerError> {
        let port = rule.local_port;

        self.reserve(port)?;

        let result = self.bind_and_spawn(Arc::clone(&rule));
        self.transitions.write().remove(&port);

        match &result {
            Ok(addr) => {
                metrics::set_active_listeners(self.len());
                info!("Proxy running: {} -> {}", addr, rule.target_url);
            }
            Err(e) => {
                metrics::record_bind_failure(port);
                error!("Failed to start proxy for rule '{}': {}", rule.id, e);
            }
        }
        result
    }

    /// Move `port` from `Stopped` to `Starting` in one step. The `Starting`
    /// entry lives only for the synchronous bind, but it is the reservation
    /// that makes a concurrent `start` of the same port fail.
    fn reserve(&self, port: u16) -> Result<(), ListenerError> {
        let mut transitions = self.transitions.write();
        if transitions.contains_key(&port) || self.listeners.read().contains_key(&port) {
            return Err(ListenerError::PortUnavailable {
                port,
                reason: "already held by another rule in this fleet".to_string(),
            });
        }
        transitions.insert(port, ListenerState::Starting);
        Ok(())
    }

    fn bind_and_spawn(&self, rule: Arc<ProxyRule>) -> Result<SocketAddr, ListenerError> {
        let port = rule.local_port;
        let addr =
            resolve_bind_addr(&self.bind_host, port).ok_or_else(|| ListenerError::InvalidAddress {
                host: self.bind_host.clone(),
                port,
            })?;

        let listener = create_listener(addr).map_err(|e| ListenerError::PortUnavailable {
            port,
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr().unwrap_or(addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = Arc::new(ListenerContext {
            rule: Arc::clone(&rule),
            forwarder: self.forwarder.clone(),
            log: Arc::clone(&self.log),
        });
        let task = tokio::spawn(accept_loop(listener, ctx, shutdown_rx));

        self.listeners.write().insert(
            port,
            ListenerHandle {
                rule,
                local_addr,
                shutdown_tx,
                task,
            },
        );
        Ok(local_addr)
    }

    /// Close the listener on `port`. Connections already accepted finish
    /// their in-flight request, then close. Returns whether a listener was
    /// running; stopping a stopped port is a no-op.
    pub async fn stop(&self, port: u16) -> bool {
        let Some(handle) = self.listeners.write().remove(&port) else {
            return false;
        };
        self.transitions.write().insert(port, ListenerState::Stopping);

        let _ = handle.shutdown_tx.send(true);
        // The socket is closed once the accept task returns
        if let Err(e) = handle.task.await {
            if e.is_panic() {
                error!("Accept loop on port {} panicked", port);
            }
        }

        self.transitions.write().remove(&port);
        metrics::set_active_listeners(self.len());
        info!("Proxy stopped on port {}", port);
        true
    }

    /// Stop every listener
    pub async fn stop_all(&self) {
        for port in self.running_ports() {
            self.stop(port).await;
        }
    }

    pub fn state(&self, port: u16) -> ListenerState {
        if let Some(state) = self.transitions.read().get(&port) {
            return *state;
        }
        if self.listeners.read().contains_key(&port) {
            ListenerState::Running
        } else {
            ListenerState::Stopped
        }
    }

    /// Running ports, ascending
    pub fn running_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.read().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Rule served on `port`, if running
    pub fn rule(&self, port: u16) -> Option<Arc<ProxyRule>> {
        self.listeners.read().get(&port).map(|h| Arc::clone(&h.rule))
    }

    /// Port to rule map of every running listener
    pub fn running(&self) -> BTreeMap<u16, Arc<ProxyRule>> {
        self.listeners
            .read()
            .iter()
            .map(|(port, h)| (*port, Arc::clone(&h.rule)))
            .collect()
    }

    pub fn local_addr(&self, port: u16) -> Option<SocketAddr> {
        self.listeners.read().get(&port).map(|h| h.local_addr)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ListenerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let port = ctx.rule.local_port;
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!("Accepted {} on port {}", addr, port);
                        let ctx = Arc::clone(&ctx);
                        let conn_shutdown = shutdown_rx.clone();
                        tokio::spawn(serve_connection(stream, ctx, conn_shutdown));
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", port, e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                debug!("Accept loop on port {} shutting down", port);
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    ctx: Arc<ListenerContext>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let port = ctx.rule.local_port;
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let ctx = Arc::clone(&ctx);
        async move { handle_proxy_request(req, ctx).await }
    });

    let conn = http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service);
    tokio::pin!(conn);

    tokio::select! {
        result = conn.as_mut() => {
            if let Err(e) = result {
                debug!("Connection error on port {}: {}", port, e);
            }
        }
        _ = shutdown_rx.changed() => {
            conn.as_mut().graceful_shutdown();
            if let Err(e) = conn.await {
                debug!("Connection error on port {} during shutdown: {}", port, e);
            }
        }
    }
}
