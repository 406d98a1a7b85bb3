//! Client for the external record store (PocketBase-compatible REST API).
//!
//! The engine only talks to the record store through [`RecordStore`], so tests
//! can swap in an in-memory implementation.

use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::settings::Store as StoreCfg;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Record store unreachable: {0}")]
    #[diagnostic(code(alphalabz::store::transport))]
    Transport(#[from] reqwest::Error),

    #[error("Record store returned status {status} for {url}")]
    #[diagnostic(code(alphalabz::store::status))]
    Status { status: u16, url: String },

    #[error("Record store rejected the credential for {url}")]
    #[diagnostic(code(alphalabz::store::unauthorized))]
    Unauthorized { url: String },

    #[error("Record not found at {url}")]
    #[diagnostic(code(alphalabz::store::not_found))]
    NotFound { url: String },

    #[error("Failed to decode record store response: {0}")]
    #[diagnostic(code(alphalabz::store::decode))]
    Decode(String),

    #[error("Record store reports {total_pages} pages of roles, more than the {limit} the loader will walk")]
    #[diagnostic(
        code(alphalabz::store::page_limit),
        help("Raise store.page_size so the role collection fits in fewer pages")
    )]
    PageLimit { limit: u32, total_pages: u32 },

    #[error("Invalid record store URL: {0}")]
    #[diagnostic(
        code(alphalabz::store::invalid_url),
        help("Set store.base_url to an absolute URL such as http://localhost:8090")
    )]
    InvalidUrl(#[from] url::ParseError),
}

/// One page of the role collection. Items are left undecoded so the loader
/// can drop a single malformed record without failing the page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePage {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub per_page: u32,
    #[serde(default)]
    pub total_items: u64,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub items: Vec<Value>,
}

/// The parts of a user record the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    /// Role id the user is assigned to
    #[serde(default)]
    pub role: String,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch one page of role records using the service credential.
    async fn list_roles(
        &self,
        credential: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RolePage, StoreError>;

    /// Exchange an identity/password pair for a bearer credential.
    async fn authenticate(&self, identity: &str, password: &str) -> Result<String, StoreError>;

    /// Look up a user's id and role using the service credential.
    async fn lookup_user(&self, credential: &str, subject_id: &str)
        -> Result<UserRecord, StoreError>;

    async fn health(&self) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct PocketBaseStore {
    base_url: Url,
    auth_collection: String,
    http: reqwest::Client,
}

impl PocketBaseStore {
    pub fn new(cfg: &StoreCfg) -> Result<Self, StoreError> {
        let mut base = cfg.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            base_url,
            auth_collection: cfg.auth_collection.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }
}

/// Map a non-success response to the matching error variant.
fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::Unauthorized { url },
        StatusCode::NOT_FOUND => StoreError::NotFound { url },
        other => StoreError::Status {
            status: other.as_u16(),
            url,
        },
    })
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, StoreError> {
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| StoreError::Decode(e.to_string()))
}

#[derive(Serialize)]
struct PasswordAuthRequest<'a> {
    identity: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct PasswordAuthResponse {
    token: String,
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn list_roles(
        &self,
        credential: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RolePage, StoreError> {
        let url = self.endpoint("api/collections/roles/records")?;
        let resp = self
            .http
            .get(url)
            .query(&[("page", page), ("perPage", per_page)])
            .bearer_auth(credential)
            .send()
            .await?;
        decode(check_status(resp)?).await
    }

    async fn authenticate(&self, identity: &str, password: &str) -> Result<String, StoreError> {
        let url = self.endpoint(&format!(
            "api/collections/{}/auth-with-password",
            self.auth_collection
        ))?;
        let resp = self
            .http
            .post(url)
            .json(&PasswordAuthRequest { identity, password })
            .send()
            .await?;
        let body: PasswordAuthResponse = decode(check_status(resp)?).await?;
        if body.token.is_empty() {
            return Err(StoreError::Decode("empty token in auth response".into()));
        }
        Ok(body.token)
    }

    async fn lookup_user(
        &self,
        credential: &str,
        subject_id: &str,
    ) -> Result<UserRecord, StoreError> {
        let mut url = self.endpoint("api/collections/users/records/")?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Decode("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(subject_id);
        let resp = self
            .http
            .get(url)
            .query(&[("fields", "id,role")])
            .bearer_auth(credential)
            .send()
            .await?;
        decode(check_status(resp)?).await
    }

    async fn health(&self) -> Result<(), StoreError> {
        let url = self.endpoint("api/health")?;
        let resp = self.http.get(url).send().await?;
        check_status(resp)?;
        Ok(())
    }
}
