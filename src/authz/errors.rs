use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::storage::StoreError;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Authorization engine is not initialized")]
    #[diagnostic(
        code(alphalabz::authz::not_initialized),
        help("No policy set has been loaded yet; check the record store connection and the first reload")
    )]
    NotInitialized,

    #[error("Failed to fetch policies from the record store")]
    #[diagnostic(
        code(alphalabz::authz::policy_fetch),
        help("The last known-good policy set stays active; the next reload tick will retry")
    )]
    PolicyFetch {
        #[source]
        source: StoreError,
    },

    #[error("Malformed role record: {0}")]
    #[diagnostic(code(alphalabz::authz::decode))]
    Decode(String),

    #[error("No scopes found for role `{role}` on `{resource}` / `{action}`")]
    #[diagnostic(
        code(alphalabz::authz::no_scopes),
        help("The role holds no permission for this resource and action")
    )]
    NoScopesFound {
        role: String,
        resource: String,
        action: String,
    },

    #[error("Invalid credential: {0}")]
    #[diagnostic(
        code(alphalabz::authz::credential_invalid),
        help("Send `Authorization: Bearer <token>` with a token issued by the record store")
    )]
    CredentialInvalid(String),

    #[error("Failed to resolve identity")]
    #[diagnostic(code(alphalabz::authz::identity_fetch))]
    IdentityFetch {
        #[source]
        source: StoreError,
    },

    #[error("Failed to renew the service session")]
    #[diagnostic(
        code(alphalabz::authz::session_renewal),
        help("The previous session credential stays in use until the record store rejects it")
    )]
    SessionRenewal {
        #[source]
        source: StoreError,
    },

    #[error("Scheduler error: {0}")]
    #[diagnostic(code(alphalabz::authz::scheduler))]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(alphalabz::authz::configuration))]
    Configuration(String),
}

impl AuthzError {
    pub fn no_scopes(role: &str, resource: &str, action: &str) -> Self {
        AuthzError::NoScopesFound {
            role: role.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthzError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            AuthzError::CredentialInvalid(_) => StatusCode::UNAUTHORIZED,
            AuthzError::NoScopesFound { .. } => StatusCode::NOT_FOUND,
            AuthzError::PolicyFetch { .. }
            | AuthzError::IdentityFetch { .. }
            | AuthzError::SessionRenewal { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
