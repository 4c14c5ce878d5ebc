//! Admin API tests against a live fleet and a JSON rule file.

mod common;

use common::*;
use portfleet::admin_api::AdminApiServer;
use portfleet::control::RuleService;
use portfleet::store::{JsonFileStore, RuleStore};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::watch;

struct Harness {
    base: String,
    service: Arc<RuleService>,
    store: JsonFileStore,
    _dir: TempDir,
    _shutdown: watch::Sender<bool>,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("data").join("config.json"));
        let service = Arc::new(RuleService::new(Arc::new(store.clone()), fleet()));
        service.initialize().await.unwrap();

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let admin = AdminApiServer::new(addr, Arc::clone(&service))
            .bind()
            .await
            .unwrap();
        let base = format!("http://{}", admin.local_addr());
        let (tx, rx) = watch::channel(false);
        tokio::spawn(admin.serve(rx));

        Self {
            base,
            service,
            store,
            _dir: dir,
            _shutdown: tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn status(&self) -> Value {
        client()
            .get(self.url("/api/status"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_health_and_metrics() {
    let h = Harness::start().await;
    let client = client();

    let resp = client.get(h.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["status"], "ok");

    let resp = client.get(h.url("/metrics")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.text().await.unwrap().contains("portfleet_active_listeners"));

    let resp = client.get(h.url("/nope")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_rule_lifecycle() {
    let h = Harness::start().await;
    let client = client();
    let upstream = spawn_upstream().await;
    let (port, moved) = (free_port(), free_port());

    // Add
    let resp = client
        .post(h.url("/api/config/rules"))
        .json(&json!({
            "localPort": port,
            "targetUrl": format!("http://{upstream}"),
            "cors": { "enabled": true, "origins": ["http://a.com"] },
            "timeout": 1000
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["rule"]["enabled"], true);
    let id = body["rule"]["id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());

    assert_eq!(h.status().await["runningPorts"], json!([port]));
    assert_eq!(h.store.load_rules().await.unwrap().len(), 1);

    // Traffic lands in the log
    let resp = client
        .get(format!("http://127.0.0.1:{port}/hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.bytes().await.unwrap();
    wait_for_logs(h.service.log(), 1).await;

    // Update moves the port
    let resp = client
        .put(h.url(&format!("/api/config/rules/{id}")))
        .json(&json!({ "localPort": moved }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(h.status().await["runningPorts"], json!([moved]));

    let config: Value = client
        .get(h.url("/api/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["rules"][0]["localPort"], moved);
    assert_eq!(config["rules"][0]["cors"]["origins"], json!(["http://a.com"]));
    assert_eq!(config["rules"][0]["timeout"], 1000);

    // Delete
    let resp = client
        .delete(h.url(&format!("/api/config/rules/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(h.status().await["runningPorts"], json!([]));
    assert!(h.store.load_rules().await.unwrap().is_empty());

    let resp = client
        .delete(h.url(&format!("/api/config/rules/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    h.service.shutdown().await;
}

#[tokio::test]
async fn test_add_rule_on_busy_port_rejected() {
    let h = Harness::start().await;
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let resp = client()
        .post(h.url("/api/config/rules"))
        .json(&json!({ "localPort": port, "targetUrl": "http://127.0.0.1:1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "Port unavailable");
    assert!(body["details"].as_str().unwrap().contains(&port.to_string()));
    assert!(h.service.rules().await.is_empty());
}

#[tokio::test]
async fn test_invalid_payloads_rejected() {
    let h = Harness::start().await;
    let client = client();

    let resp = client
        .post(h.url("/api/config"))
        .json(&json!({ "rules": "nope" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["error"], "Invalid rules format");

    let resp = client
        .post(h.url("/api/config/rules"))
        .json(&json!({ "localPort": free_port(), "targetUrl": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert_eq!(resp.json::<Value>().await.unwrap()["error"], "Invalid rule");

    let resp = client
        .put(h.url("/api/config/rules/missing"))
        .json(&json!({ "enabled": false }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_replace_config_and_logs() {
    let h = Harness::start().await;
    let client = client();
    let upstream = spawn_upstream().await;
    let (p1, p2) = (free_port(), free_port());
    let dead = free_port();

    let resp = client
        .post(h.url("/api/config"))
        .json(&json!({
            "rules": [
                { "id": "ok", "localPort": p1, "targetUrl": format!("http://{upstream}") },
                { "id": "bad", "localPort": p2, "targetUrl": format!("http://127.0.0.1:{dead}"), "timeout": 1000 }
            ]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.json::<Value>().await.unwrap()["message"], "Config saved");

    for port in [p1, p1, p2] {
        let resp = client
            .get(format!("http://127.0.0.1:{port}/"))
            .send()
            .await
            .unwrap();
        resp.bytes().await.unwrap();
    }
    wait_for_logs(h.service.log(), 3).await;

    let logs: Value = client
        .get(h.url(&format!("/api/logs?port={p1}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs["logs"].as_array().unwrap().len(), 2);
    assert_eq!(logs["stats"]["totalLogs"], 3);
    assert_eq!(logs["stats"]["errorCount"], 1);

    let logs: Value = client
        .get(h.url("/api/logs?statusCode=200&limit=1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = logs["logs"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["statusCode"], 200);
    assert_eq!(entries[0]["localPort"], p1);
    assert!(entries[0].get("errorMessage").is_none());

    let resp = client.get(h.url("/api/logs?port=abc")).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client.delete(h.url("/api/logs")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let status = h.status().await;
    assert_eq!(status["stats"]["totalLogs"], 0);

    h.service.shutdown().await;
}
