#![allow(dead_code)]

pub mod builders;
pub mod mock_store;

use std::sync::Arc;

use alphalabz_authz::authz::service::AuthzService;
use alphalabz_authz::settings::Settings;

pub use builders::{credential_for, fresh_credential_for, lab_roles, test_settings, RoleBuilder};
pub use mock_store::MockStore;

/// Connect a service to `store`, panicking on failure.
pub async fn connect(store: &Arc<MockStore>, settings: &Settings) -> Arc<AuthzService> {
    Arc::new(
        AuthzService::connect(store.clone(), settings)
            .await
            .expect("Failed to connect authorization service"),
    )
}
