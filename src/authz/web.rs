use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;

use crate::authz::errors::AuthzError;
use crate::authz::identity::bearer_token;
use crate::authz::service::AuthzService;
use crate::authz::types::{
    CheckRequest, CheckResponse, CredentialCheckRequest, PermissionQuery, ReloadResponse,
    RolesRequest, RolesResponse, ScopesRequest, ScopesResponse,
};
use crate::settings::Server;

pub fn router(service: Arc<AuthzService>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/check/credential", post(handle_check_credential))
        .route("/v1/scopes", post(handle_scopes))
        .route("/v1/roles", post(handle_roles))
        .route("/v1/reload", post(handle_reload))
        .route("/healthz", get(health))
        .with_state(service)
}

/// Serve the decision API until `shutdown` resolves.
pub async fn serve(
    service: Arc<AuthzService>,
    server: &Server,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", server.host, server.port)
        .parse()
        .map_err(|e| miette::miette!("bad decision API addr: {e}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, "Decision API listening");

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn handle_check(
    State(service): State<Arc<AuthzService>>,
    Json(req): Json<CheckRequest>,
) -> impl IntoResponse {
    let query = PermissionQuery::new(req.resource, req.action, req.scope);
    match service.verify_permission(&req.role, &query) {
        Ok(decision) => Json(CheckResponse::from(decision)).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_check_credential(
    State(service): State<Arc<AuthzService>>,
    headers: HeaderMap,
    Json(req): Json<CredentialCheckRequest>,
) -> Result<Json<CheckResponse>, AuthzError> {
    let token = bearer_token(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    )?;
    let query = PermissionQuery::new(req.resource, req.action, req.scope);
    let decision = service.verify_by_credential(token, &query).await?;
    Ok(Json(decision.into()))
}

async fn handle_scopes(
    State(service): State<Arc<AuthzService>>,
    Json(req): Json<ScopesRequest>,
) -> impl IntoResponse {
    match service.scopes_for(&req.role, &req.resource, &req.action) {
        Ok(scopes) => Json(ScopesResponse { scopes }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_roles(
    State(service): State<Arc<AuthzService>>,
    Json(req): Json<RolesRequest>,
) -> impl IntoResponse {
    match service.roles_granted(&req.resource, &req.action, &req.scope) {
        Ok(roles) => Json(RolesResponse { roles }).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn handle_reload(State(service): State<Arc<AuthzService>>) -> impl IntoResponse {
    match service.reload().await {
        Ok(outcome) => Json(ReloadResponse {
            roles: outcome.roles,
            tuples: outcome.tuples,
            dropped_entries: outcome.dropped_entries,
            dropped_records: outcome.dropped_records,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health(State(service): State<Arc<AuthzService>>) -> impl IntoResponse {
    if service.is_initialized() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not initialized")
    }
}
