use std::sync::Arc;

use crate::authz::errors::AuthzError;
use crate::authz::identity::IdentityResolver;
use crate::authz::reloader::{AutoReloader, ReloadOutcome};
use crate::authz::session::{SessionHandle, SessionRenewer};
use crate::authz::store::PolicyStore;
use crate::authz::types::{Decision, PermissionQuery, RoleId};
use crate::settings::Settings;
use crate::storage::{PocketBaseStore, RecordStore};

/// The authorization service handed to every component that needs decisions.
///
/// Built once at start-up. Cloning the inner `Arc`s is how background jobs and
/// the HTTP layer share it.
pub struct AuthzService {
    policies: Arc<PolicyStore>,
    reloader: Arc<AutoReloader>,
    identities: Arc<IdentityResolver>,
    renewer: Arc<SessionRenewer>,
}

impl AuthzService {
    /// Connect to the configured PocketBase-compatible record store.
    pub async fn start(settings: &Settings) -> Result<Self, AuthzError> {
        let store = PocketBaseStore::new(&settings.store)
            .map_err(|e| AuthzError::Configuration(e.to_string()))?;
        Self::connect(Arc::new(store), settings).await
    }

    /// Log in with the service account and load the first policy set.
    ///
    /// Both steps must succeed; a service that cannot answer is not returned.
    pub async fn connect(
        records: Arc<dyn RecordStore>,
        settings: &Settings,
    ) -> Result<Self, AuthzError> {
        let renewer = SessionRenewer::login(
            records.clone(),
            settings.store.identity.clone(),
            settings.store.password.clone(),
        )
        .await?;
        let session = renewer.handle();

        let policies = Arc::new(PolicyStore::new());
        let reloader = AutoReloader::new(
            policies.clone(),
            records.clone(),
            session.clone(),
            settings.store.page_size(),
        );
        let identities =
            IdentityResolver::new(records, session, settings.authz.identity_cache_ttl());

        let outcome = reloader.reload().await?;
        tracing::info!(
            roles = outcome.roles,
            tuples = outcome.tuples,
            "Authorization service ready"
        );

        Ok(Self {
            policies,
            reloader: Arc::new(reloader),
            identities: Arc::new(identities),
            renewer: Arc::new(renewer),
        })
    }

    /// Decide for a role the caller already knows.
    pub fn verify_permission(
        &self,
        role: &str,
        query: &PermissionQuery,
    ) -> Result<Decision, AuthzError> {
        self.policies.decide(role, query)
    }

    /// Resolve the bearer credential to a role, then decide.
    pub async fn verify_by_credential(
        &self,
        credential: &str,
        query: &PermissionQuery,
    ) -> Result<Decision, AuthzError> {
        let identity = self.identities.resolve(credential).await?;
        let decision = self.policies.decide(&identity.role, query)?;
        tracing::debug!(
            subject = %identity.subject_id,
            role = %identity.role,
            resource = %query.resource,
            action = %query.action,
            scope = %query.scope,
            granted = decision.granted,
            "Checked permission"
        );
        Ok(decision)
    }

    pub async fn verify_by_subject(
        &self,
        subject_id: &str,
        query: &PermissionQuery,
    ) -> Result<Decision, AuthzError> {
        let identity = self.identities.resolve_subject(subject_id).await?;
        self.policies.decide(&identity.role, query)
    }

    /// Scopes the role holds for resource/action.
    ///
    /// An empty answer is reported as `NoScopesFound` so callers can tell
    /// "no access" apart from a store failure.
    pub fn scopes_for(
        &self,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let scopes = self.policies.scopes_for(role, resource, action)?;
        if scopes.is_empty() {
            return Err(AuthzError::no_scopes(role, resource, action));
        }
        Ok(scopes)
    }

    pub async fn scopes_by_credential(
        &self,
        credential: &str,
        resource: &str,
        action: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let identity = self.identities.resolve(credential).await?;
        self.scopes_for(&identity.role, resource, action)
    }

    /// Roles holding `scope` for resource/action. An empty scope matches any.
    pub fn roles_granted(
        &self,
        resource: &str,
        action: &str,
        scope: &str,
    ) -> Result<Vec<RoleId>, AuthzError> {
        self.policies.roles_granted(resource, action, scope)
    }

    /// Reload now, outside the timer.
    pub async fn reload(&self) -> Result<ReloadOutcome, AuthzError> {
        self.reloader.reload().await
    }

    pub fn is_initialized(&self) -> bool {
        self.policies.is_initialized()
    }

    pub fn policies(&self) -> &Arc<PolicyStore> {
        &self.policies
    }

    pub fn reloader(&self) -> &Arc<AutoReloader> {
        &self.reloader
    }

    pub fn identities(&self) -> &Arc<IdentityResolver> {
        &self.identities
    }

    pub fn renewer(&self) -> &Arc<SessionRenewer> {
        &self.renewer
    }

    pub fn session(&self) -> SessionHandle {
        self.renewer.handle()
    }

    /// Stop both timers. Reloads or renewals already running finish.
    pub fn stop(&self) {
        self.reloader.stop();
        self.renewer.stop();
    }
}
