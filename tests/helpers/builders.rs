use alphalabz_authz::settings::Settings;
use base64ct::{Base64UrlUnpadded, Encoding};
use serde_json::{json, Map, Value};

/// Builder for role records as the record store serves them
pub struct RoleBuilder {
    id: String,
    permissions: Map<String, Value>,
}

impl RoleBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            permissions: Map::new(),
        }
    }

    pub fn grant(mut self, resource: &str, entries: &[&str]) -> Self {
        self.permissions
            .insert(resource.to_string(), json!(entries));
        self
    }

    /// Store an arbitrary value for a resource, malformed ones included.
    pub fn raw(mut self, resource: &str, value: Value) -> Self {
        self.permissions.insert(resource.to_string(), value);
        self
    }

    pub fn build(self) -> Value {
        json!({
            "id": self.id,
            "name": self.id,
            "permissions": self.permissions,
        })
    }
}

/// The roles used across the end-to-end tests.
pub fn lab_roles() -> Vec<Value> {
    vec![
        RoleBuilder::new("teacher")
            .grant("lab_books", &["view:own", "update:status"])
            .build(),
        RoleBuilder::new("admin")
            .grant("lab_books", &["view:*", "update:*", "delete:*"])
            .grant("users", &["view"])
            .build(),
        RoleBuilder::new("reviewer")
            .grant("lab_books", &["view:own,shared"])
            .build(),
    ]
}

/// An unsigned JWT-shaped credential carrying the given subject.
pub fn credential_for(subject_id: &str, exp: Option<i64>) -> String {
    let mut claims = json!({ "id": subject_id, "collectionName": "users" });
    if let Some(exp) = exp {
        claims["exp"] = json!(exp);
    }
    let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
    format!("{header}.{payload}.signature")
}

/// A credential valid for another hour.
pub fn fresh_credential_for(subject_id: &str) -> String {
    credential_for(subject_id, Some(chrono::Utc::now().timestamp() + 3600))
}

/// Settings pointing at nothing in particular, with every timer disabled.
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.store.identity = "svc@alphalabz.test".to_string();
    settings.store.password = "svc-password".to_string();
    settings.authz.reload_interval_secs = 0;
    settings.authz.session_renewal_interval_secs = 0;
    settings
}
