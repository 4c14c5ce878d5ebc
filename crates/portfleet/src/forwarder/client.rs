//! Shared upstream HTTP client.

use super::tls::{ensure_crypto_provider, NoVerifier};
use crate::config::UpstreamClientConfig;
use bytes::Bytes;
use http_body_util::Full;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Client used for every upstream call. Request bodies are buffered so an
/// attempt can be replayed on retry.
pub type HttpClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Build the pooled HTTP/1.1 client used by the forwarder.
pub fn create_http_client(config: &UpstreamClientConfig) -> Result<HttpClient, anyhow::Error> {
    ensure_crypto_provider();

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_nodelay(true);
    http_connector.set_keepalive(Some(Duration::from_secs(config.keepalive_secs)));
    if let Some(ms) = config.connect_timeout_ms {
        http_connector.set_connect_timeout(Some(Duration::from_millis(ms)));
    }

    let https_connector = if config.tls_skip_verify {
        warn!("Upstream TLS certificate verification is DISABLED");
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(
                rustls::ClientConfig::builder()
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(NoVerifier))
                    .with_no_client_auth(),
            )
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    } else {
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector)
    };

    let client = Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .pool_max_idle_per_host(config.max_idle_per_host)
        .build(https_connector);

    info!(
        "Upstream client configured: max_idle={}, idle_timeout={}s, tls_skip_verify={}",
        config.max_idle_per_host, config.pool_idle_timeout_secs, config.tls_skip_verify
    );

    Ok(client)
}
