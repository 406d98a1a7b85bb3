use std::sync::Arc;

use parking_lot::RwLock;

use crate::authz::engine;
use crate::authz::errors::AuthzError;
use crate::authz::types::*;
use crate::authz::PolicySet;

/// Owner of the live policy set.
///
/// Every query clones the current `Arc<PolicySet>` under a short read lock and
/// then works on that snapshot only, so a concurrent `replace` can never be
/// observed half-applied.
#[derive(Debug, Default)]
pub struct PolicyStore {
    current: RwLock<Option<Arc<PolicySet>>>,
}

impl PolicyStore {
    /// A store with no policy loaded yet. Queries fail with `NotInitialized`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policies(set: PolicySet) -> Self {
        Self {
            current: RwLock::new(Some(Arc::new(set))),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn snapshot(&self) -> Result<Arc<PolicySet>, AuthzError> {
        self.current.read().clone().ok_or(AuthzError::NotInitialized)
    }

    /// Atomically substitute the whole policy set.
    pub fn replace(&self, set: PolicySet) -> Arc<PolicySet> {
        let set = Arc::new(set);
        // the previous set may be the last reference; free it after unlocking
        let previous = std::mem::replace(&mut *self.current.write(), Some(set.clone()));
        drop(previous);
        set
    }

    pub fn decide(&self, role: &str, query: &PermissionQuery) -> Result<Decision, AuthzError> {
        let state = self.snapshot()?;
        Ok(engine::decide(&state, role, query))
    }

    pub fn scopes_for(
        &self,
        role: &str,
        resource: &str,
        action: &str,
    ) -> Result<Vec<String>, AuthzError> {
        let state = self.snapshot()?;
        Ok(engine::scopes_for(&state, role, resource, action))
    }

    pub fn roles_granted(
        &self,
        resource: &str,
        action: &str,
        scope: &str,
    ) -> Result<Vec<RoleId>, AuthzError> {
        let state = self.snapshot()?;
        Ok(engine::roles_granted(&state, resource, action, scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn set_of(tuples: Vec<PolicyTuple>) -> PolicySet {
        PolicySet {
            tuples: tuples.into_iter().collect(),
            ..PolicySet::empty()
        }
    }

    #[test]
    fn test_uninitialized_store_reports_configuration_error() {
        let store = PolicyStore::new();
        assert!(!store.is_initialized());
        let err = store
            .decide("r", &PermissionQuery::new("lab_books", "view", "own"))
            .unwrap_err();
        assert!(matches!(err, AuthzError::NotInitialized));
    }

    #[test]
    fn test_replace_swaps_whole_set() {
        let store = PolicyStore::with_policies(set_of(vec![PolicyTuple::new(
            "r", "lab_books", "view", "own",
        )]));
        let old = store.snapshot().unwrap();

        store.replace(set_of(vec![PolicyTuple::new("r", "lab_books", "view", "shared")]));

        let q_own = PermissionQuery::new("lab_books", "view", "own");
        assert!(!store.decide("r", &q_own).unwrap().granted);
        // a snapshot taken earlier still answers from the old set
        assert!(engine::decide(&old, "r", &q_own).granted);
    }

    #[test]
    fn test_replace_releases_unreferenced_set() {
        let store = PolicyStore::with_policies(set_of(vec![PolicyTuple::new(
            "r", "lab_books", "view", "own",
        )]));
        let old = Arc::downgrade(&store.snapshot().unwrap());

        let held = store.replace(set_of(Vec::new()));
        assert!(old.upgrade().is_none());
        assert!(Arc::ptr_eq(&held, &store.snapshot().unwrap()));
        // the lock is free again once replace returns
        assert!(store.current.try_write().is_some());
    }

    #[test]
    fn test_concurrent_decide_sees_old_or_new_set_only() {
        // Every answer must be the one set A or set B would give on its own.
        let set_a = || set_of(vec![PolicyTuple::new("r", "lab_books", "view", "own")]);
        let set_b = || set_of(vec![PolicyTuple::new("r", "lab_books", "view", "*")]);

        let store = Arc::new(PolicyStore::with_policies(set_a()));
        let writer = {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..2_000 {
                    store.replace(if i % 2 == 0 { set_b() } else { set_a() });
                }
            })
        };

        let q = PermissionQuery::new("lab_books", "view", "own");
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let q = q.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        let d = store.decide("r", &q).unwrap();
                        assert!(d == Decision::EXACT || d == Decision::WILDCARD, "{d:?}");
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
