//! Control server tests: the router is served on an OS-assigned port, with a
//! wiremock server standing in for the upstream api.
//!
//! ```bash
//! cargo test -p keyrelay --test test_server
//! ```
#![cfg(feature = "server")]

use std::time::Duration;

use keyrelay::{
    prelude::*,
    server::{AppState, build_router},
};
use serde_json::{Value, json};
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SELLER_KEY: &str = "server-test-key";

struct TestServer {
    base: String,
    upstream: MockServer,
    http: reqwest::Client,
}

impl TestServer {
    fn url(&self, route: &str) -> String {
        format!("{}{route}", self.base)
    }

    async fn status(&self) -> Value {
        self.http
            .get(self.url("/api/restore/status"))
            .send()
            .await
            .expect("status request")
            .json()
            .await
            .expect("status json")
    }

    /// Polls status until the job is no longer running.
    async fn wait_finished(&self) -> Value {
        for _ in 0..200 {
            let status = self.status().await;
            if status["running"] == false {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("restore did not finish");
    }
}

/// Spin up the control server on an OS-assigned port.
async fn spawn_test_server(item_delay: Duration) -> TestServer {
    let upstream = MockServer::start().await;
    let client = KeyRelayClient::with_config(
        ClientConfig::default()
            .base_url(format!("{}/api/seller/", upstream.uri()))
            .seller_key(SELLER_KEY),
    )
    .expect("client");
    let state = AppState::new(client, RestoreConfig::no_delays().item_delay(item_delay));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    TestServer {
        base: format!("http://127.0.0.1:{port}"),
        upstream,
        http: reqwest::Client::new(),
    }
}

async fn mount_create_success(upstream: &MockServer) {
    Mock::given(method("GET"))
        .and(query_param("type", "add"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(upstream)
        .await;
}

fn licenses(count: usize) -> Value {
    let list: Vec<Value> = (0..count)
        .map(|index| json!({"key": format!("Soryn-{index:05}-1w"), "level": 1}))
        .collect();
    json!({ "licenses": list })
}

// =============================================================================
// Restore routes
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_restore_start_conflict_and_completion() {
    let server = spawn_test_server(Duration::from_millis(200)).await;
    mount_create_success(&server.upstream).await;

    let resp = server
        .http
        .post(server.url("/api/restore"))
        .json(&licenses(3))
        .send()
        .await
        .expect("start");
    assert_eq!(resp.status(), 202);
    let ack: Value = resp.json().await.expect("ack");
    assert_eq!(ack["total"], 3);

    let resp = server
        .http
        .post(server.url("/api/restore"))
        .json(&licenses(1))
        .send()
        .await
        .expect("second start");
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.expect("error body");
    assert!(body["error"].as_str().is_some_and(|msg| msg.contains("in progress")));

    let done = server.wait_finished().await;
    assert_eq!(done["phase"], "completed");
    assert_eq!(done["total"], 3);
    assert_eq!(done["succeeded"], 3);
    assert_eq!(done["current_key"], "Complete");

    let requests = server.upstream.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
}

#[test_log::test(tokio::test)]
async fn test_restore_rejects_invalid_bodies() {
    let server = spawn_test_server(Duration::ZERO).await;
    for body in [
        json!({"licenses": []}),
        json!({"licenses": "Soryn-A"}),
        json!({"licenses": [{"status": "Used"}]}),
        json!({"wipe": true}),
    ] {
        let resp = server
            .http
            .post(server.url("/api/restore"))
            .json(&body)
            .send()
            .await
            .expect("request");
        assert_eq!(resp.status(), 400, "{body}");
    }
    let status = server.status().await;
    assert_eq!(status["phase"], "idle");
    assert_eq!(status["running"], false);
}

#[test_log::test(tokio::test)]
async fn test_restore_stop() {
    let server = spawn_test_server(Duration::from_millis(100)).await;
    mount_create_success(&server.upstream).await;

    let resp = server
        .http
        .post(server.url("/api/restore"))
        .json(&licenses(50))
        .send()
        .await
        .expect("start");
    assert_eq!(resp.status(), 202);
    tokio::time::sleep(Duration::from_millis(250)).await;

    let resp = server
        .http
        .post(server.url("/api/restore/stop"))
        .send()
        .await
        .expect("stop");
    assert_eq!(resp.status(), 200);
    let ack: Value = resp.json().await.expect("stop ack");
    assert_eq!(ack, json!({"stopped": true}));

    let done = server.wait_finished().await;
    assert_eq!(done["phase"], "cancelled");
    assert_eq!(done["error"], "Stopped by user");
    assert!(done["processed"].as_u64().unwrap_or(50) < 50);
}

#[test_log::test(tokio::test)]
async fn test_stop_without_job_is_acknowledged() {
    let server = spawn_test_server(Duration::ZERO).await;
    let ack: Value = server
        .http
        .post(server.url("/api/restore/stop"))
        .send()
        .await
        .expect("stop")
        .json()
        .await
        .expect("json");
    assert_eq!(ack["stopped"], true);
}

#[test_log::test(tokio::test)]
async fn test_parse_backup_text() {
    let server = spawn_test_server(Duration::ZERO).await;
    let dump = "\
Key                  Status     Level
─────────────────────────────────────
Soryn-AAAAA-BBBBB    Used       2
Total: 1
";
    let body: Value = server
        .http
        .post(server.url("/api/restore/parse"))
        .body(dump)
        .send()
        .await
        .expect("parse")
        .json()
        .await
        .expect("json");
    assert_eq!(body["format"], "text");
    assert_eq!(body["count"], 1);
    assert_eq!(body["licenses"][0]["key"], "Soryn-AAAAA-BBBBB");
    assert_eq!(body["licenses"][0]["status"], "Used");
    assert_eq!(body["licenses"][0]["level"], 2);
}

// =============================================================================
// Proxy routes
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_list_licenses_proxy() {
    let server = spawn_test_server(Duration::ZERO).await;
    Mock::given(method("GET"))
        .and(query_param("type", "fetchallkeys"))
        .and(query_param("sellerkey", SELLER_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "keys": [{"key": "Soryn-AAAAA-1d", "status": "Used", "level": 1}]
        })))
        .mount(&server.upstream)
        .await;

    let resp = server
        .http
        .get(server.url("/api/licenses"))
        .send()
        .await
        .expect("licenses");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("json");
    assert_eq!(body[0]["key"], "Soryn-AAAAA-1d");

    let backup: Value = server
        .http
        .get(server.url("/api/backup"))
        .send()
        .await
        .expect("backup")
        .json()
        .await
        .expect("json");
    assert_eq!(backup["version"], 1);
    assert_eq!(backup["licenses"][0]["duration"], 86_400);
}

#[test_log::test(tokio::test)]
async fn test_upstream_rejection_maps_to_bad_gateway() {
    let server = spawn_test_server(Duration::ZERO).await;
    Mock::given(method("GET"))
        .and(query_param("type", "fetchallusers"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "Seller key is invalid"})),
        )
        .mount(&server.upstream)
        .await;

    let resp = server
        .http
        .get(server.url("/api/users"))
        .send()
        .await
        .expect("users");
    assert_eq!(resp.status(), 502);
    let body: Value = resp.json().await.expect("json");
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|msg| msg.contains("Seller key is invalid"))
    );
}
