mod helpers;

use std::sync::Arc;

use alphalabz_authz::authz::service::AuthzService;
use alphalabz_authz::authz::web;
use helpers::*;
use reqwest::StatusCode;
use serde_json::{json, Value};

/// Decision API bound to an ephemeral local port.
struct TestApi {
    base_url: String,
    client: reqwest::Client,
}

impl TestApi {
    async fn start(service: Arc<AuthzService>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("No local addr");
        tokio::spawn(async move {
            axum::serve(listener, web::router(service))
                .await
                .expect("Decision API failed");
        });
        Self {
            base_url: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .expect("request failed");
        let status = resp.status();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

async fn lab_api() -> (Arc<MockStore>, TestApi) {
    let store = Arc::new(MockStore::with_roles(lab_roles()));
    store.add_user("u1", "teacher");
    let service = connect(&store, &test_settings()).await;
    let api = TestApi::start(service).await;
    (store, api)
}

#[tokio::test]
async fn test_healthz() {
    let (_store, api) = lab_api().await;
    let resp = api
        .client
        .get(format!("{}/healthz", api.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_check_by_role() {
    let (_store, api) = lab_api().await;

    let (status, body) = api
        .post(
            "/v1/check",
            json!({ "role": "teacher", "resource": "lab_books", "action": "view", "scope": "own" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "granted": true, "via_wildcard": false }));

    let (_, body) = api
        .post(
            "/v1/check",
            json!({ "role": "admin", "resource": "lab_books", "action": "delete", "scope": "own" }),
        )
        .await;
    assert_eq!(body, json!({ "granted": true, "via_wildcard": true }));

    let (_, body) = api
        .post(
            "/v1/check",
            json!({ "role": "teacher", "resource": "lab_books", "action": "view", "scope": "shared" }),
        )
        .await;
    assert_eq!(body["granted"], json!(false));
}

#[tokio::test]
async fn test_check_by_credential() {
    let (_store, api) = lab_api().await;
    let query = json!({ "resource": "lab_books", "action": "update", "scope": "status" });

    let resp = api
        .client
        .post(format!("{}/v1/check/credential", api.base_url))
        .bearer_auth(fresh_credential_for("u1"))
        .json(&query)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["granted"], json!(true));

    // no header
    let (status, body) = api.post("/v1/check/credential", query.clone()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].as_str().unwrap().contains("authorization header"));

    // unknown subject
    let resp = api
        .client
        .post(format!("{}/v1/check/credential", api.base_url))
        .bearer_auth(fresh_credential_for("nobody"))
        .json(&query)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_scopes_and_no_scopes_found() {
    let (_store, api) = lab_api().await;

    let (status, body) = api
        .post(
            "/v1/scopes",
            json!({ "role": "reviewer", "resource": "lab_books", "action": "view" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "scopes": ["own", "shared"] }));

    let (status, body) = api
        .post(
            "/v1/scopes",
            json!({ "role": "teacher", "resource": "lab_books", "action": "delete" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("No scopes found"));
}

#[tokio::test]
async fn test_roles_granted() {
    let (_store, api) = lab_api().await;

    let (status, body) = api
        .post(
            "/v1/roles",
            json!({ "resource": "lab_books", "action": "view", "scope": "own" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "roles": ["reviewer", "teacher"] }));

    // scope omitted matches any scope
    let (_, body) = api
        .post("/v1/roles", json!({ "resource": "lab_books", "action": "view" }))
        .await;
    assert_eq!(body, json!({ "roles": ["admin", "reviewer", "teacher"] }));
}

#[tokio::test]
async fn test_reload_endpoint() {
    let (store, api) = lab_api().await;

    let (status, body) = api.post("/v1/reload", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roles"], json!(3));
    assert_eq!(body["dropped_entries"], json!(0));

    store.fail_list(true);
    let (status, body) = api.post("/v1/reload", json!({})).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].is_string());

    // still serving the last good set
    let (_, body) = api
        .post(
            "/v1/check",
            json!({ "role": "teacher", "resource": "lab_books", "action": "view", "scope": "own" }),
        )
        .await;
    assert_eq!(body["granted"], json!(true));
}
