use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use alphalabz_authz::storage::{RecordStore, RolePage, StoreError, UserRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

/// In-memory record store with call counters and fault injection.
#[derive(Default)]
pub struct MockStore {
    roles: Mutex<Vec<Value>>,
    users: Mutex<HashMap<String, String>>,
    list_delay: Mutex<Option<Duration>>,
    last_list_credential: Mutex<Option<String>>,
    issued: AtomicUsize,
    list_calls: AtomicUsize,
    auth_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    fail_list: AtomicBool,
    fail_auth: AtomicBool,
    fail_lookup: AtomicBool,
}

impl MockStore {
    pub fn with_roles(roles: Vec<Value>) -> Self {
        let store = Self::default();
        store.set_roles(roles);
        store
    }

    pub fn set_roles(&self, roles: Vec<Value>) {
        *self.roles.lock() = roles;
    }

    pub fn add_user(&self, subject_id: &str, role: &str) {
        self.users
            .lock()
            .insert(subject_id.to_string(), role.to_string());
    }

    pub fn set_list_delay(&self, delay: Duration) {
        *self.list_delay.lock() = Some(delay);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookup(&self, fail: bool) {
        self.fail_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Credential presented by the most recent `list_roles` call.
    pub fn last_list_credential(&self) -> Option<String> {
        self.last_list_credential.lock().clone()
    }
}

fn unavailable(url: &str) -> StoreError {
    StoreError::Status {
        status: 503,
        url: url.to_string(),
    }
}

#[async_trait]
impl RecordStore for MockStore {
    async fn list_roles(
        &self,
        credential: &str,
        page: u32,
        per_page: u32,
    ) -> Result<RolePage, StoreError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_list_credential.lock() = Some(credential.to_string());

        let delay = *self.list_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(unavailable("mock://roles"));
        }

        let roles = self.roles.lock().clone();
        let per_page = per_page.max(1) as usize;
        let total_pages = roles.len().div_ceil(per_page) as u32;
        let start = (page.saturating_sub(1) as usize) * per_page;
        let items = roles.iter().skip(start).take(per_page).cloned().collect();

        Ok(RolePage {
            page,
            per_page: per_page as u32,
            total_items: roles.len() as u64,
            total_pages,
            items,
        })
    }

    async fn authenticate(&self, identity: &str, _password: &str) -> Result<String, StoreError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_auth.load(Ordering::SeqCst) {
            return Err(StoreError::Unauthorized {
                url: "mock://auth-with-password".to_string(),
            });
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{identity}-token-{n}"))
    }

    async fn lookup_user(
        &self,
        _credential: &str,
        subject_id: &str,
    ) -> Result<UserRecord, StoreError> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(unavailable("mock://users"));
        }
        match self.users.lock().get(subject_id) {
            Some(role) => Ok(UserRecord {
                id: subject_id.to_string(),
                role: role.clone(),
            }),
            None => Err(StoreError::NotFound {
                url: format!("mock://users/{subject_id}"),
            }),
        }
    }

    async fn health(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
