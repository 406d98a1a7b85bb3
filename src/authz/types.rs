use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Opaque role identifier as issued by the record store.
pub type RoleId = String;

/// Scope token that grants an action regardless of the requested scope.
pub const WILDCARD_SCOPE: &str = "*";

/// Scope given to a permission string that names an action only.
pub const DEFAULT_SCOPE: &str = "all";

/// A single (role, resource, action, scope) fact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTuple {
    pub role: RoleId,
    pub resource: String,
    pub action: String,
    pub scope: String,
}

impl PolicyTuple {
    pub fn new(
        role: impl Into<RoleId>,
        resource: impl Into<String>,
        action: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            resource: resource.into(),
            action: action.into(),
            scope: scope.into(),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.scope == WILDCARD_SCOPE
    }
}

impl std::fmt::Display for PolicyTuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}, {}, {}, {}",
            self.role, self.resource, self.action, self.scope
        )
    }
}

/// Indexed collection of policy tuples.
///
/// The forward index (role, resource, action) -> scopes and the reverse
/// index (resource, action, scope) -> roles are only ever built together
/// in `insert`, so a given index never disagrees with itself.
#[derive(Debug, Clone, Default)]
pub struct TupleIndex {
    tuples: Vec<PolicyTuple>,
    /// (role, resource, action) -> scopes
    by_role: HashMap<(String, String, String), Vec<String>>,
    /// (resource, action, scope) -> roles
    by_grant: HashMap<(String, String, String), Vec<RoleId>>,
}

impl TupleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tuple: PolicyTuple) {
        self.by_role
            .entry((
                tuple.role.clone(),
                tuple.resource.clone(),
                tuple.action.clone(),
            ))
            .or_default()
            .push(tuple.scope.clone());

        self.by_grant
            .entry((
                tuple.resource.clone(),
                tuple.action.clone(),
                tuple.scope.clone(),
            ))
            .or_default()
            .push(tuple.role.clone());

        self.tuples.push(tuple);
    }

    /// All scopes (duplicates included) the role holds for resource/action.
    pub fn scopes_for(&self, role: &str, resource: &str, action: &str) -> &[String] {
        self.by_role
            .get(&(role.to_string(), resource.to_string(), action.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All roles (duplicates included) holding exactly this scope.
    pub fn roles_for(&self, resource: &str, action: &str, scope: &str) -> &[RoleId] {
        self.by_grant
            .get(&(resource.to_string(), action.to_string(), scope.to_string()))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All roles holding any scope for resource/action.
    pub fn roles_for_any_scope<'a>(
        &'a self,
        resource: &'a str,
        action: &'a str,
    ) -> impl Iterator<Item = &'a RoleId> + 'a {
        self.tuples
            .iter()
            .filter(move |t| t.resource == resource && t.action == action)
            .map(|t| &t.role)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PolicyTuple> {
        self.tuples.iter()
    }

    pub fn tuple_count(&self) -> usize {
        self.tuples.len()
    }
}

impl FromIterator<PolicyTuple> for TupleIndex {
    fn from_iter<I: IntoIterator<Item = PolicyTuple>>(iter: I) -> Self {
        let mut idx = TupleIndex::new();
        for tuple in iter {
            idx.insert(tuple);
        }
        idx
    }
}

/// Role record as served by the record store. Only ever used as compiler input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRoleRecord {
    pub id: RoleId,
    #[serde(default)]
    pub name: String,
    /// resource -> list of "action[:scope,scope...]" strings. Values are kept
    /// loosely typed so a malformed entry can be dropped on its own.
    #[serde(default, alias = "permission", deserialize_with = "null_as_empty")]
    pub permissions: BTreeMap<String, Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// What the caller intends to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionQuery {
    pub resource: String,
    pub action: String,
    pub scope: String,
}

impl PermissionQuery {
    pub fn new(
        resource: impl Into<String>,
        action: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            scope: scope.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub granted: bool,
    /// Granted through the `*` scope rather than an exact scope match.
    pub via_wildcard: bool,
}

impl Decision {
    pub const DENIED: Decision = Decision {
        granted: false,
        via_wildcard: false,
    };
    pub const EXACT: Decision = Decision {
        granted: true,
        via_wildcard: false,
    };
    pub const WILDCARD: Decision = Decision {
        granted: true,
        via_wildcard: true,
    };
}

/// Identity resolved from a bearer credential, kept until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedIdentity {
    pub subject_id: String,
    pub role: RoleId,
    pub expires_at: DateTime<Utc>,
}

impl CachedIdentity {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// The service's own elevated credential for calling the record store.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionCredential {
    pub token: String,
    pub obtained_at: DateTime<Utc>,
}

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            obtained_at: Utc::now(),
        }
    }
}

impl std::fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredential")
            .field("token", &"<redacted>")
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// e.g. "r_teacher"
    pub role: RoleId,
    pub resource: String,
    pub action: String,
    pub scope: String,
}

#[derive(Debug, Deserialize)]
pub struct CredentialCheckRequest {
    pub resource: String,
    pub action: String,
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub granted: bool,
    pub via_wildcard: bool,
}

impl From<Decision> for CheckResponse {
    fn from(d: Decision) -> Self {
        Self {
            granted: d.granted,
            via_wildcard: d.via_wildcard,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ScopesRequest {
    pub role: RoleId,
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScopesResponse {
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RolesRequest {
    pub resource: String,
    pub action: String,
    /// Empty matches every scope.
    #[serde(default)]
    pub scope: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RolesResponse {
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReloadResponse {
    pub roles: usize,
    pub tuples: usize,
    pub dropped_entries: usize,
    pub dropped_records: usize,
}
