//! Shared helpers for integration tests: stub upstreams and a wired fleet.

#![allow(dead_code)]

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use portfleet::config::UpstreamClientConfig;
use portfleet::{FleetManager, ListenerPool, LogEntry, RequestLog, UpstreamForwarder};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Reserve a port that is free right now
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

pub fn fleet() -> Arc<FleetManager> {
    let forwarder = UpstreamForwarder::new(&UpstreamClientConfig::default()).unwrap();
    let pool = ListenerPool::new("127.0.0.1", forwarder, Arc::new(RequestLog::new(500)));
    Arc::new(FleetManager::new(pool))
}

/// HTTP client that never follows redirects and ignores proxy env vars
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Wait until `log` holds at least `count` entries
pub async fn wait_for_logs(log: &RequestLog, count: usize) -> Vec<LogEntry> {
    for _ in 0..100 {
        if log.len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    log.snapshot()
}

async fn stub_handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().to_string();
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let host = req
        .headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let custom = req
        .headers()
        .get("x-custom")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = req
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    if path.starts_with("/redirect") {
        return Ok(Response::builder()
            .status(StatusCode::FOUND)
            .header("location", "/elsewhere")
            .body(Full::new(Bytes::new()))
            .unwrap());
    }
    if let Some(code) = path.strip_prefix("/status/") {
        let status = code.parse().unwrap_or(500);
        return Ok(Response::builder()
            .status(StatusCode::from_u16(status).unwrap())
            .body(Full::new(Bytes::from("upstream status")))
            .unwrap());
    }

    let json = serde_json::json!({
        "method": method,
        "path": path,
        "host": host,
        "custom": custom,
        "body": String::from_utf8_lossy(&body),
    });
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/json")
        .header("x-upstream", "stub");
    if path.starts_with("/upstream-cors") {
        builder = builder.header("access-control-allow-origin", "http://upstream.example");
    }
    Ok(builder
        .body(Full::new(Bytes::from(json.to_string())))
        .unwrap())
}

async fn serve_stub(stream: tokio::net::TcpStream) {
    let io = TokioIo::new(stream);
    let _ = http1::Builder::new()
        .serve_connection(io, service_fn(stub_handler))
        .await;
}

/// Echo upstream: answers with the request it saw as JSON
pub async fn spawn_upstream() -> SocketAddr {
    spawn_flaky_upstream(0).await.0
}

/// Upstream that closes the first `failures` connections without a response,
/// then behaves like [`spawn_upstream`]. Returns the accepted connection count.
pub async fn spawn_flaky_upstream(failures: usize) -> (SocketAddr, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < failures {
                drop(stream);
                continue;
            }
            tokio::spawn(serve_stub(stream));
        }
    });
    (addr, accepted)
}

/// Upstream that accepts connections and never answers
pub async fn spawn_silent_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Upstream that sends headers and part of the body, then hangs up
pub async fn spawn_truncating_upstream() -> SocketAddr {
    use tokio::io::AsyncWriteExt;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = tokio::io::AsyncReadExt::read(&mut stream, &mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100\r\n\r\npartial")
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });
    addr
}
