use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::authz::errors::AuthzError;
use crate::authz::types::SessionCredential;
use crate::storage::RecordStore;

/// Shared, swappable reference to the service credential.
///
/// Readers take an `Arc` snapshot; a renewal replaces the pointer and never
/// touches a credential that an in-flight request already holds.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<RwLock<Arc<SessionCredential>>>,
}

impl SessionHandle {
    pub fn new(credential: SessionCredential) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(credential))),
        }
    }

    pub fn current(&self) -> Arc<SessionCredential> {
        self.inner.read().clone()
    }

    fn replace(&self, credential: SessionCredential) {
        let previous = std::mem::replace(&mut *self.inner.write(), Arc::new(credential));
        drop(previous);
    }
}

/// Keeps the service's own record-store credential fresh.
pub struct SessionRenewer {
    store: Arc<dyn RecordStore>,
    identity: String,
    password: String,
    handle: SessionHandle,
    stopped: AtomicBool,
}

impl SessionRenewer {
    /// Authenticate once and build a renewer around the resulting credential.
    pub async fn login(
        store: Arc<dyn RecordStore>,
        identity: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, AuthzError> {
        let identity = identity.into();
        let password = password.into();
        if identity.is_empty() {
            return Err(AuthzError::Configuration(
                "store.identity must be set for the service account".into(),
            ));
        }

        let token = store
            .authenticate(&identity, &password)
            .await
            .map_err(|source| AuthzError::SessionRenewal { source })?;
        tracing::info!(identity = %identity, "Service session established");

        Ok(Self {
            store,
            identity,
            password,
            handle: SessionHandle::new(SessionCredential::new(token)),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Re-authenticate and swap the credential.
    ///
    /// On failure the previous credential stays in place.
    pub async fn renew(&self) -> Result<(), AuthzError> {
        match self.store.authenticate(&self.identity, &self.password).await {
            Ok(token) => {
                self.handle.replace(SessionCredential::new(token));
                tracing::info!(identity = %self.identity, "Service session renewed");
                Ok(())
            }
            Err(source) => {
                let age = chrono::Utc::now() - self.handle.current().obtained_at;
                tracing::error!(
                    identity = %self.identity,
                    credential_age_secs = age.num_seconds(),
                    error = %source,
                    "Failed to renew service session, keeping previous credential"
                );
                Err(AuthzError::SessionRenewal { source })
            }
        }
    }

    /// Timer entry point. Errors are logged by `renew` and swallowed here.
    pub async fn tick(&self) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.renew().await.is_ok()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SessionRenewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRenewer")
            .field("identity", &self.identity)
            .field("credential", &self.handle.current())
            .finish()
    }
}
