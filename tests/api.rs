//! End-to-end tests of the HTTP API against an in-memory registry, with the
//! SSH check and the service manager replaced by fakes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use transitctl::cipher::CredentialKey;
use transitctl::probe::{ProbeError, Prober};
use transitctl::service::{ServiceAction, ServiceError, ServiceManager};
use transitctl::{AppState, Config, Store};

const API_KEY: &str = "test-key";

/// Accepts any host except those listed in `unreachable`.
#[derive(Default)]
struct FakeProber {
    unreachable: Vec<String>,
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(&self, host: &str, _: u16, _: &str, _: &str) -> Result<(), ProbeError> {
        if self.unreachable.iter().any(|h| h == host) {
            Err(ProbeError::Authentication)
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct FakeService {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl ServiceManager for FakeService {
    async fn control(&self, action: ServiceAction) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Failed {
                action: action.verb(),
                unit: "gost.service".into(),
                exit_code: 3,
                message: "inactive".into(),
            });
        }
        Ok(format!("{} gost.service successful.", action.verb()))
    }
}

struct Harness {
    app: Router,
    service: Arc<FakeService>,
    config_path: std::path::PathBuf,
    _dir: tempfile::TempDir,
}

async fn harness(unreachable: &[&str]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("gost_config.json");
    let mut config = Config::default();
    config.auth.api_key = API_KEY.into();
    config.relay.config_path = Some(config_path.display().to_string());

    let service = Arc::new(FakeService::default());
    let prober = Arc::new(FakeProber {
        unreachable: unreachable.iter().map(ToString::to_string).collect(),
    });
    let state = AppState::new(
        config,
        Store::in_memory().await.unwrap(),
        CredentialKey::from_bytes([3u8; 32]),
        prober,
        service.clone(),
    );
    Harness {
        app: transitctl::router(state),
        service,
        config_path,
        _dir: dir,
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {API_KEY}"));
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn server_body(name: &str, ip: &str) -> Value {
    json!({
        "name": name,
        "ip_address": ip,
        "ssh_username": "root",
        "ssh_password": "hunter2",
    })
}

fn transit_body(name: &str, a: i64, b: i64, proto: &str) -> Value {
    json!({
        "name": name,
        "server_a_id": a,
        "server_a_listen_port": 8443,
        "server_b_id": b,
        "server_b_connect_port": 443,
        "encryption_protocol": proto,
        "destination_ip": "10.0.0.5",
        "destination_port": 80,
    })
}

async fn add_two_servers(app: &Router) -> (i64, i64) {
    let (status, a) = call(app, "POST", "/api/servers", Some(server_body("a", "1.1.1.1"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, b) = call(app, "POST", "/api/servers", Some(server_body("b", "2.2.2.2"))).await;
    (
        a["server"]["id"].as_i64().unwrap(),
        b["server"]["id"].as_i64().unwrap(),
    )
}

#[tokio::test]
async fn health_is_public_everything_else_is_not() {
    let h = harness(&[]).await;

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .app
        .clone()
        .oneshot(Request::get("/api/servers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = h
        .app
        .clone()
        .oneshot(
            Request::get("/api/servers")
                .header("authorization", "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn server_lifecycle_hides_password() {
    let h = harness(&["9.9.9.9"]).await;
    let (a, _) = add_two_servers(&h.app).await;

    let (status, body) = call(&h.app, "GET", &format!("/api/servers/{a}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["server"]["connection_status"], "connected");
    assert!(body["server"].get("ssh_password").is_none());

    let (status, body) = call(&h.app, "POST", "/api/servers", Some(server_body("c", "1.1.1.1"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE");

    let (status, body) = call(&h.app, "POST", "/api/servers", Some(server_body("d", "9.9.9.9"))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "AUTH_FAILED");

    let (_, body) = call(&h.app, "GET", "/api/servers", None).await;
    let names: Vec<&str> = body["servers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["a", "b"]);

    let (status, body) = call(&h.app, "POST", &format!("/api/servers/{a}/probe"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reachable"], true);

    let (status, _) = call(&h.app, "GET", "/api/servers/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn transit_validation_and_delete_rules() {
    let h = harness(&[]).await;
    let (a, b) = add_two_servers(&h.app).await;

    let (status, body) =
        call(&h.app, "POST", "/api/transits", Some(transit_body("t", a, a, "tcp"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) =
        call(&h.app, "POST", "/api/transits", Some(transit_body("t", a, b, "wss"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["transit"]["status"], "pending");
    let t = body["transit"]["id"].as_i64().unwrap();

    let (status, body) = call(&h.app, "DELETE", &format!("/api/servers/{b}"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SERVER_IN_USE");

    let (status, _) = call(&h.app, "DELETE", &format!("/api/transits/{t}"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&h.app, "DELETE", &format!("/api/servers/{b}"), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn preview_then_apply_activates_transits() {
    let h = harness(&[]).await;
    let (a, b) = add_two_servers(&h.app).await;
    call(&h.app, "POST", "/api/transits", Some(transit_body("direct", a, b, "tcp"))).await;
    call(&h.app, "POST", "/api/transits", Some(transit_body("chained", a, b, "wss"))).await;

    let (status, body) = call(&h.app, "GET", "/api/config/preview", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["document"],
        json!({
            "Debug": true,
            "Retries": 0,
            "Routes": [
                {"ServeNodes": [
                    "tcp://:8443/10.0.0.5:80",
                    "udp://:8443/10.0.0.5:80"
                ]},
                {
                    "ServeNodes": ["tcp://:8443", "udp://:8443"],
                    "ChainNodes": ["relay+wss://2.2.2.2:443"]
                }
            ]
        })
    );
    assert!(!h.config_path.exists());
    assert_eq!(h.service.calls.load(Ordering::SeqCst), 0);

    let (status, body) = call(&h.app, "POST", "/api/config/apply", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["restarted"], true);
    assert_eq!(body["activated"].as_array().unwrap().len(), 2);
    assert!(h.config_path.exists());

    let (_, body) = call(&h.app, "GET", "/api/status", None).await;
    assert_eq!(body["transit_counts"]["active"], 2);
    assert_eq!(body["transits"][0]["server_b_name"], "b");

    let (_, body) = call(&h.app, "GET", "/api/activity?activity_type=config_apply", None).await;
    assert_eq!(body["entries"][0]["level"], "success");
}

#[tokio::test]
async fn restart_failure_marks_transits_error() {
    let h = harness(&[]).await;
    let (a, b) = add_two_servers(&h.app).await;
    call(&h.app, "POST", "/api/transits", Some(transit_body("t", a, b, "ws"))).await;
    h.service.fail.store(true, Ordering::SeqCst);

    let (status, body) = call(&h.app, "POST", "/api/config/apply", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], "SERVICE_FAILED");
    assert_eq!(body["written"], true);

    let (_, body) = call(&h.app, "GET", "/api/transits", None).await;
    assert_eq!(body["transits"][0]["status"], "error");
}

#[tokio::test]
async fn service_endpoints() {
    let h = harness(&[]).await;

    let (status, body) = call(&h.app, "POST", "/api/service/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["action"], "restart");

    let (status, _) = call(&h.app, "POST", "/api/service/reload", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    h.service.fail.store(true, Ordering::SeqCst);
    let (status, body) = call(&h.app, "GET", "/api/service/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
}
