//! End-to-end tests of the access pipeline behind the HTTP server.
//!
//! Each test starts the app on an ephemeral port with its own in-memory
//! stores and drives it with `reqwest`.

use std::net::{Ipv4Addr, SocketAddr};

use clinigate_access::audit::ACTION_EMERGENCY_ACCESS;
use clinigate_access::{Claims, JwtTokenValidator, RegionFlags, RegionPolicy};
use clinigate_db_memory::{AssignmentSeed, RoleSeed, SeedConfig};
use clinigate_server::{AppConfig, AppState, ServerBuilder};
use reqwest::StatusCode;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    state: AppState,
    tokens: JwtTokenValidator,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn token(&self, sub: &str, org_id: &str) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            org_id: org_id.to_string(),
            roles: Vec::new(),
            permissions: Vec::new(),
            exp: OffsetDateTime::now_utc().unix_timestamp() + 3600,
        };
        self.tokens.sign(&claims).expect("sign token")
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.access.jwt_secret = "integration-secret".to_string();
    // Plain HTTP in tests; HIPAA transport is asserted via X-Forwarded-Proto.
    cfg.access.trust_forwarded_headers = true;
    cfg.seed = SeedConfig {
        regions: vec![
            RegionPolicy::new("US"),
            RegionPolicy::new("EU").with_flags(RegionFlags {
                gdpr: true,
                ..RegionFlags::default()
            }),
            RegionPolicy::new("US-HIPAA").with_flags(RegionFlags {
                hipaa: true,
                ..RegionFlags::default()
            }),
            RegionPolicy::new("LIMITED").with_rate_limit(2),
        ],
        roles: vec![
            RoleSeed {
                name: "doctor".to_string(),
                organization_id: "org-a".to_string(),
                description: None,
                permissions: vec!["patient:read".to_string(), "patient:write".to_string()],
            },
            RoleSeed {
                name: "nurse".to_string(),
                organization_id: "org-a".to_string(),
                description: None,
                permissions: Vec::new(),
            },
        ],
        assignments: vec![
            AssignmentSeed {
                principal_id: "dr-1".to_string(),
                organization_id: "org-a".to_string(),
                role: "doctor".to_string(),
            },
            AssignmentSeed {
                principal_id: "dr-2".to_string(),
                organization_id: "org-a".to_string(),
                role: "doctor".to_string(),
            },
            AssignmentSeed {
                principal_id: "nurse-1".to_string(),
                organization_id: "org-a".to_string(),
                role: "nurse".to_string(),
            },
            AssignmentSeed {
                principal_id: "admin-1".to_string(),
                organization_id: "org-a".to_string(),
                role: "admin".to_string(),
            },
        ],
        ..SeedConfig::default()
    };
    cfg
}

/// An emergency request from `nurse-1` carrying the HIPAA trace headers.
fn emergency_request(
    server: &TestServer,
    method: reqwest::Method,
    path: &str,
    region: &str,
) -> reqwest::RequestBuilder {
    reqwest::Client::new()
        .request(method, server.url(path))
        .bearer_auth(server.token("nurse-1", "org-a"))
        .header("X-Forwarded-Proto", "https")
        .header("X-Region", region)
        .header("X-BAA-Version", "1.0")
        .header("X-Request-ID", "req-emergency")
        .header("X-Correlation-ID", "corr-1")
        .header("X-Emergency-Access", "true")
}

async fn start_server() -> TestServer {
    let cfg = test_config();
    let tokens = JwtTokenValidator::new(&cfg.access.jwt_secret);
    let server = ServerBuilder::new()
        .with_config(cfg)
        .build()
        .await
        .expect("build server");
    let state = server.state().clone();

    let listener = tokio::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = server
            .serve(listener, async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        state,
        tokens,
        shutdown: Some(tx),
        handle,
    }
}

#[tokio::test]
async fn test_healthz() {
    let server = start_server().await;
    let resp = reqwest::get(server.url("/healthz")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    server.stop().await;
}

#[tokio::test]
async fn test_doctor_reads_own_organization() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .get(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().contains_key("x-ratelimit-limit"));
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["organization_id"], "org-a");
    assert_eq!(body["region"], "US");
    assert_eq!(body["decision"], "granted");
    server.stop().await;
}

#[tokio::test]
async fn test_cross_organization_is_forbidden() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .get(server.url("/api/organizations/org-b/patients"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .header("X-Request-ID", "req-cross-org")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        resp.headers().get("x-request-id").unwrap(),
        "req-cross-org"
    );
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "forbidden");
    assert_eq!(body["trace_id"], "req-cross-org");
    server.stop().await;
}

#[tokio::test]
async fn test_missing_token_is_unauthenticated() {
    let server = start_server().await;
    let resp = reqwest::get(server.url("/api/organizations/org-a/patients"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(resp.headers().contains_key("www-authenticate"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unauthenticated");
    assert!(body["trace_id"].as_str().is_some_and(|id| !id.is_empty()));
    server.stop().await;
}

#[tokio::test]
async fn test_write_permission_is_checked_per_method() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let allowed = client
        .post(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .json(&json!({ "name": "Jane Doe" }))
        .send()
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::CREATED);

    let denied = client
        .post(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(server.token("nurse-1", "org-a"))
        .json(&json!({ "name": "Jane Doe" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let created = server.state.stores.audit.by_action("patient.create");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].actor_id(), "dr-1");
    assert_eq!(created[0].organization_id(), Some("org-a"));
    assert_eq!(created[0].changes(), Some(&json!({ "name": "Jane Doe" })));
    server.stop().await;
}

#[tokio::test]
async fn test_gdpr_region_requires_dpa_version() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .get(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .header("X-Region", "EU")
        .header("X-GDPR-Consent", "true")
        .header("X-Data-Transfer-Mechanism", "SCC")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "compliance_gdpr");
    assert!(body["message"].as_str().unwrap().contains("X-DPA-Version"));
    server.stop().await;
}

#[tokio::test]
async fn test_gdpr_region_with_signals_is_granted() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .get(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .header("X-Region", "EU")
        .header("X-GDPR-Consent", "true")
        .header("X-DPA-Version", "2.1")
        .header("X-Data-Transfer-Mechanism", "SCC")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["region"], "EU");
    server.stop().await;
}

#[tokio::test]
async fn test_emergency_access_bypasses_roles() {
    let server = start_server().await;
    let resp = emergency_request(
        &server,
        reqwest::Method::GET,
        "/api/organizations/org-b/patients",
        "US-HIPAA",
    )
    .header("X-Emergency-Reason", "CARDIAC_ARREST")
    .send()
    .await
    .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["decision"], "emergency_override");

    let records = server.state.stores.audit.by_action(ACTION_EMERGENCY_ACCESS);
    assert_eq!(records.len(), 1);
    assert!(records[0].is_emergency());
    assert_eq!(records[0].actor_id(), "nurse-1");
    assert_eq!(records[0].reason_code(), Some("CARDIAC_ARREST"));
    assert!(records[0].organization_id().is_none());
    server.stop().await;
}

#[tokio::test]
async fn test_emergency_without_reason_is_bad_request() {
    let server = start_server().await;
    let resp = emergency_request(
        &server,
        reqwest::Method::GET,
        "/api/organizations/org-a/patients",
        "US-HIPAA",
    )
    .send()
    .await
    .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(server
        .state
        .stores
        .audit
        .by_action(ACTION_EMERGENCY_ACCESS)
        .is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_emergency_does_not_open_role_management_or_other_regions() {
    let server = start_server().await;

    let resp = emergency_request(
        &server,
        reqwest::Method::GET,
        "/api/organizations/org-a/roles",
        "US-HIPAA",
    )
    .header("X-Emergency-Reason", "TRAUMA")
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = emergency_request(
        &server,
        reqwest::Method::GET,
        "/api/organizations/org-b/patients",
        "US",
    )
    .header("X-Emergency-Reason", "TRAUMA")
    .send()
    .await
    .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    assert!(server
        .state
        .stores
        .audit
        .by_action(ACTION_EMERGENCY_ACCESS)
        .is_empty());
    server.stop().await;
}

#[tokio::test]
async fn test_region_rate_limit_rejects_excess_requests() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let token = server.token("dr-2", "org-a");

    for _ in 0..2 {
        let resp = client
            .get(server.url("/api/organizations/org-a/patients"))
            .bearer_auth(&token)
            .header("X-Region", "LIMITED")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    let resp = client
        .get(server.url("/api/organizations/org-a/patients"))
        .bearer_auth(&token)
        .header("X-Region", "LIMITED")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(resp.headers().contains_key("retry-after"));
    assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "2");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "rate_limited");
    server.stop().await;
}

#[tokio::test]
async fn test_public_region_endpoint_needs_no_token() {
    let server = start_server().await;
    let resp = reqwest::get(server.url("/api/regions/current")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["region"], "US");
    assert_eq!(body["degraded"], false);
    server.stop().await;
}

#[tokio::test]
async fn test_role_management_requires_role_manage() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let created = client
        .post(server.url("/api/organizations/org-a/roles"))
        .bearer_auth(server.token("admin-1", "org-a"))
        .json(&json!({ "name": "receptionist", "permissions": ["appointment:read"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let role: Value = created.json().await.unwrap();
    assert_eq!(role["name"], "receptionist");
    assert_eq!(role["organization_id"], "org-a");

    let denied = client
        .post(server.url("/api/organizations/org-a/roles"))
        .bearer_auth(server.token("dr-1", "org-a"))
        .json(&json!({ "name": "intern" }))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::FORBIDDEN);

    let listed: Vec<Value> = client
        .get(server.url("/api/organizations/org-a/roles"))
        .bearer_auth(server.token("admin-1", "org-a"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed.iter().any(|role| role["name"] == "receptionist"));
    server.stop().await;
}

#[tokio::test]
async fn test_reserved_role_name_conflicts() {
    let server = start_server().await;
    let resp = reqwest::Client::new()
        .post(server.url("/api/organizations/org-a/roles"))
        .bearer_auth(server.token("admin-1", "org-a"))
        .json(&json!({ "name": "admin" }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CONFLICT);
    server.stop().await;
}
