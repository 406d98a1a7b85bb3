use std::collections::BTreeSet;

use crate::authz::types::*;
use crate::authz::PolicySet;

/// Decide whether `role` may perform `query` against this policy set.
///
/// The `*` scope is checked first and wins outright; otherwise the requested
/// scope must be held exactly. Both checks read the same `PolicySet`.
pub fn decide(state: &PolicySet, role: &str, query: &PermissionQuery) -> Decision {
    let scopes = state.tuples.scopes_for(role, &query.resource, &query.action);

    if scopes.iter().any(|s| s == WILDCARD_SCOPE) {
        return Decision::WILDCARD;
    }
    if scopes.iter().any(|s| *s == query.scope) {
        return Decision::EXACT;
    }
    Decision::DENIED
}

/// Every scope `role` holds for resource/action, de-duplicated and sorted.
/// An empty result means no access.
pub fn scopes_for(state: &PolicySet, role: &str, resource: &str, action: &str) -> Vec<String> {
    state
        .tuples
        .scopes_for(role, resource, action)
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Every role holding a tuple for (resource, action, scope), de-duplicated
/// and sorted. An empty `scope` matches any scope.
pub fn roles_granted(state: &PolicySet, resource: &str, action: &str, scope: &str) -> Vec<RoleId> {
    let roles: BTreeSet<RoleId> = if scope.is_empty() {
        state
            .tuples
            .roles_for_any_scope(resource, action)
            .cloned()
            .collect()
    } else {
        state
            .tuples
            .roles_for(resource, action, scope)
            .iter()
            .cloned()
            .collect()
    };
    roles.into_iter().collect()
}
