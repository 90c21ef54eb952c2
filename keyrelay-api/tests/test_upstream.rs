//! Upstream client tests against a local wiremock server.
//!
//! ```bash
//! cargo test -p keyrelay --test test_upstream
//! ```

use std::time::Duration;

use keyrelay::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SELLER_KEY: &str = "test-seller-key";
const API_PATH: &str = "/api/seller/";

fn client_for(server: &MockServer) -> KeyRelayClient {
    let config = ClientConfig::default()
        .base_url(format!("{}{API_PATH}", server.uri()))
        .seller_key(SELLER_KEY)
        .request_timeout(Duration::from_secs(5));
    KeyRelayClient::with_config(config).expect("client")
}

fn operation(op: &str) -> Mock {
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("sellerkey", SELLER_KEY))
        .and(query_param("type", op))
        .and(query_param("format", "JSON"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
}

// =============================================================================
// Raw calls
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_invoke_sends_credentials_and_operation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(API_PATH))
        .and(query_param("sellerkey", SELLER_KEY))
        .and(query_param("type", "info"))
        .and(query_param("key", "Soryn-A"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "message": "ok", "status": "Used"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .invoke("info", &[("key", "Soryn-A".to_string())])
        .await
        .expect("invoke");
    assert!(result.success);
    assert_eq!(result.message.as_deref(), Some("ok"));
    assert_eq!(result.payload["status"], "Used");

    let metrics = client.http_metrics();
    assert_eq!(metrics.total_requests, 1);
    assert_eq!(metrics.successful_responses, 1);
}

#[test_log::test(tokio::test)]
async fn test_rejection_is_returned_not_raised() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "add"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "Key already exists"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let record = LicenseRecord::new("Soryn-DUP-1d");
    let reply = client
        .restore_license(&record, record.resolved_duration())
        .await
        .expect("well-formed reply");
    assert!(!reply.success);
    assert_eq!(reply.message.as_deref(), Some("Key already exists"));
    assert_eq!(
        classify_failure(reply.message.as_deref().unwrap_or_default()),
        FailureClass::Duplicate
    );

    let err = reply.into_result("add").unwrap_err();
    assert!(matches!(err, KeyRelayError::UpstreamRejection { .. }));
    assert_eq!(client.http_metrics().rejections, 1);
}

#[test_log::test(tokio::test)]
async fn test_error_status_with_json_body_is_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({"success": false, "message": "Rate limited"})),
        )
        .mount(&server)
        .await;

    let reply = client_for(&server).invoke("add", &[]).await.expect("decoded");
    assert!(!reply.success);
    assert_eq!(
        classify_failure(reply.message.as_deref().unwrap_or_default()),
        FailureClass::RateLimited
    );
}

#[test_log::test(tokio::test)]
async fn test_non_json_body_is_decode_error() {
    let server = MockServer::start().await;
    let body = format!("<html>{}</html>", "x".repeat(500));
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502).set_body_string(body))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.invoke("fetchallkeys", &[]).await.unwrap_err();
    match &err {
        KeyRelayError::Decode {
            operation, snippet, ..
        } => {
            assert_eq!(operation, "fetchallkeys");
            assert!(snippet.starts_with("<html>"));
            assert!(snippet.chars().count() <= 200);
        }
        other => panic!("expected decode error, got {other:?}"),
    }
    assert!(err.is_transient());
    assert_eq!(client.http_metrics().decode_errors, 1);
}

#[test_log::test(tokio::test)]
async fn test_connection_failure_is_transport_error() {
    // bind then drop to get a port with nothing listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let config = ClientConfig::default()
        .base_url(format!("http://127.0.0.1:{port}{API_PATH}"))
        .seller_key(SELLER_KEY);
    let client = KeyRelayClient::with_config(config).expect("client");
    let err = client.invoke("fetchallkeys", &[]).await.unwrap_err();
    assert!(matches!(err, KeyRelayError::Transport { .. }));
    assert!(err.is_transient());
    // the seller key travels in the query string and must not leak
    assert!(!err.to_string().contains(SELLER_KEY));
    assert!(!format!("{err:?}").contains(SELLER_KEY));
}

#[test_log::test(tokio::test)]
async fn test_missing_seller_key_is_validation_error() {
    let server = MockServer::start().await;
    let config = ClientConfig::default()
        .base_url(format!("{}{API_PATH}", server.uri()))
        .seller_key("");
    let client = KeyRelayClient::with_config(config).expect("client");
    let err = client.licenses().list().await.unwrap_err();
    assert!(matches!(err, KeyRelayError::Validation { .. }));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

// =============================================================================
// Licenses
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_list_licenses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "fetchallkeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "keys": [
                {"key": "Soryn-AAAAA-1m", "status": "Used", "level": "2", "expires": "2592000", "usedby": "bob"},
                {"key": "Soryn-BBBBB-lifetime", "status": "Not Used", "level": 1},
                {"status": "Used"}
            ]
        })))
        .mount(&server)
        .await;

    let licenses = client_for(&server).licenses().list().await.expect("list");
    assert_eq!(licenses.len(), 2);
    assert_eq!(licenses[0].key, "Soryn-AAAAA-1m");
    assert_eq!(licenses[0].status, LicenseStatus::Used);
    assert_eq!(licenses[0].level, 2);
    assert_eq!(licenses[0].used_by.as_deref(), Some("bob"));
    assert_eq!(licenses[1].status, LicenseStatus::Unused);
}

#[test_log::test(tokio::test)]
async fn test_create_license_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "add"))
        .and(query_param("mask", "Soryn-****-1w"))
        .and(query_param("amount", "2"))
        .and(query_param("level", "3"))
        .and(query_param("expiry", "604800"))
        .and(query_param("owner", "admin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "keys": ["Soryn-ABCD-1w", "Soryn-EFGH-1w"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let keys = client_for(&server)
        .new_licenses()
        .mask("Soryn-****-1w")
        .amount(2)
        .level(3)
        .expiry(LicenseDuration::from_secs(604_800))
        .owner("admin")
        .create()
        .await
        .expect("create");
    assert_eq!(keys, vec!["Soryn-ABCD-1w", "Soryn-EFGH-1w"]);
}

#[test_log::test(tokio::test)]
async fn test_restore_license_uses_exact_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "add"))
        .and(query_param("mask", "Soryn-XXXX-lifetime"))
        .and(query_param("amount", "1"))
        .and(query_param("expiry", "315360000"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "key": "Soryn-XXXX-lifetime"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let record = LicenseRecord::new("Soryn-XXXX-lifetime");
    let reply = client_for(&server)
        .restore_license(&record, record.resolved_duration())
        .await
        .expect("restore");
    assert!(reply.success);
}

#[test_log::test(tokio::test)]
async fn test_license_ban_and_delete() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "ban"))
        .and(query_param("key", "Soryn-A"))
        .and(query_param("reason", "chargeback"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("type", "del"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "message": "Key not found"})),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .license("Soryn-A")
        .ban("chargeback")
        .await
        .expect("ban");
    let err = client.license("Soryn-B").delete().await.unwrap_err();
    assert!(err.to_string().contains("Key not found"));

    let err = client.license("  ").unban().await.unwrap_err();
    assert!(matches!(err, KeyRelayError::Validation { .. }));
}

#[test_log::test(tokio::test)]
async fn test_delete_all_licenses_and_users() {
    let server = MockServer::start().await;
    operation("delalllicenses").expect(1).mount(&server).await;
    operation("delallusers").expect(1).mount(&server).await;

    let client = client_for(&server);
    client.licenses().delete_all().await.expect("licenses");
    client.users().delete_all().await.expect("users");
}

// =============================================================================
// Users and backup
// =============================================================================

#[test_log::test(tokio::test)]
async fn test_list_and_ban_users() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "fetchallusers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "users": [{"username": "alice", "ip": "10.0.0.1"}, {"username": "bob", "banned": "spam"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("type", "banuser"))
        .and(query_param("user", "alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let users = client.users().list().await.expect("users");
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].name, "alice");
    assert!(!users[0].is_banned());
    assert!(users[1].is_banned());
    client.user("alice").ban("abuse").await.expect("ban");
}

#[test_log::test(tokio::test)]
async fn test_export_backup_round_trips_through_parser() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("type", "fetchallkeys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "keys": [
                {"key": "Soryn-AAAAA-1w", "status": "Used", "level": 2},
                {"key": "Soryn-BBBBB", "status": "Not Used", "level": 1}
            ]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let document = client.export_backup().await.expect("export");
    assert_eq!(document.licenses.len(), 2);
    let text = document.to_json_pretty().expect("json");

    let (records, format) = client.backup_parser().parse(&text);
    assert_eq!(format, BackupFormat::Json);
    assert_eq!(records, document.licenses);
    assert_eq!(records[0].resolved_duration(), LicenseDuration::from_secs(604_800));
    assert!(records[1].resolved_duration().is_unlimited());
}
