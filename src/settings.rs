use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Largest page the loader will request from the record store.
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub store: Store,
    pub authz: Authz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    /// Port for the decision API
    pub port: u16,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Store {
    /// Base URL of the record store, e.g. http://localhost:8090
    pub base_url: String,
    /// Identity of the elevated service account
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub password: String,
    /// Auth collection the service account lives in
    pub auth_collection: String,
    /// Role records requested per page (clamped to 1..=MAX_PAGE_SIZE)
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("base_url", &self.base_url)
            .field("identity", &self.identity)
            .field("password", &"<redacted>")
            .field("auth_collection", &self.auth_collection)
            .field("page_size", &self.page_size)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Timers for the background jobs. Zero disables the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    pub reload_interval_secs: u64,
    pub identity_cache_ttl_secs: u64,
    pub session_renewal_interval_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            identity: String::new(),
            password: String::new(),
            auth_collection: "_superusers".to_string(),
            page_size: 100,
            request_timeout_secs: 5,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            reload_interval_secs: 600,
            identity_cache_ttl_secs: 1800,
            session_renewal_interval_secs: 6 * 3600,
        }
    }
}

impl Store {
    pub fn page_size(&self) -> u32 {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

impl Authz {
    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn identity_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.identity_cache_ttl_secs)
    }

    pub fn session_renewal_interval(&self) -> Duration {
        Duration::from_secs(self.session_renewal_interval_secs)
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let store = Store::default();
        let authz = Authz::default();
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("store.base_url", store.base_url)
            .into_diagnostic()?
            .set_default("store.auth_collection", store.auth_collection)
            .into_diagnostic()?
            .set_default("store.page_size", store.page_size)
            .into_diagnostic()?
            .set_default("store.request_timeout_secs", store.request_timeout_secs)
            .into_diagnostic()?
            .set_default("authz.reload_interval_secs", authz.reload_interval_secs)
            .into_diagnostic()?
            .set_default("authz.identity_cache_ttl_secs", authz.identity_cache_ttl_secs)
            .into_diagnostic()?
            .set_default(
                "authz.session_renewal_interval_secs",
                authz.session_renewal_interval_secs,
            )
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: ALPHALABZ__STORE__PASSWORD=..., etc.
        builder =
            builder.add_source(config::Environment::with_prefix("ALPHALABZ").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let s: Settings = cfg.try_deserialize().into_diagnostic()?;
        Ok(s)
    }
}
