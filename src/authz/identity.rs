use std::sync::Arc;
use std::time::Duration;

use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;

use crate::authz::errors::AuthzError;
use crate::authz::session::SessionHandle;
use crate::authz::types::CachedIdentity;
use crate::storage::{RecordStore, StoreError};

/// Claims read from a bearer credential without verifying its signature.
#[derive(Debug, Deserialize)]
struct CredentialClaims {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Subject identifier carried by a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSubject {
    pub subject_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Pull the subject out of a JWT-shaped credential.
///
/// This is a structural decode only; whether the record store still accepts
/// the credential is settled by the identity lookup.
pub fn decode_credential(credential: &str) -> Result<CredentialSubject, AuthzError> {
    let mut parts = credential.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthzError::CredentialInvalid(
            "credential is not a three-part token".into(),
        ));
    };

    let bytes = Base64UrlUnpadded::decode_vec(payload.trim_end_matches('='))
        .map_err(|_| AuthzError::CredentialInvalid("credential payload is not base64url".into()))?;
    let claims: CredentialClaims = serde_json::from_slice(&bytes)
        .map_err(|e| AuthzError::CredentialInvalid(format!("credential claims: {e}")))?;

    let subject_id = claims
        .id
        .or(claims.sub)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AuthzError::CredentialInvalid("credential has no subject".into()))?;
    let expires_at = claims
        .exp
        .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));

    Ok(CredentialSubject {
        subject_id,
        expires_at,
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthzError> {
    let header =
        header.ok_or_else(|| AuthzError::CredentialInvalid("missing authorization header".into()))?;
    let token = header.strip_prefix("Bearer ").ok_or_else(|| {
        AuthzError::CredentialInvalid("invalid authorization header format".into())
    })?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthzError::CredentialInvalid(
            "empty token after Bearer prefix".into(),
        ));
    }
    Ok(token)
}

/// Resolves bearer credentials to roles, caching results per subject for a
/// fixed TTL.
pub struct IdentityResolver {
    store: Arc<dyn RecordStore>,
    session: SessionHandle,
    ttl: chrono::Duration,
    cache: DashMap<String, CachedIdentity>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn RecordStore>, session: SessionHandle, ttl: Duration) -> Self {
        Self {
            store,
            session,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            cache: DashMap::new(),
        }
    }

    /// Resolve a bearer credential to the subject's current role.
    ///
    /// The credential's signature is never checked here, and the record
    /// store only sees the subject id it claims. Callers must treat the
    /// result as trusted only behind a layer that has verified the token.
    pub async fn resolve(&self, credential: &str) -> Result<CachedIdentity, AuthzError> {
        let subject = decode_credential(credential)?;
        if let Some(exp) = subject.expires_at {
            if exp <= Utc::now() {
                return Err(AuthzError::CredentialInvalid("credential has expired".into()));
            }
        }
        self.resolve_subject(&subject.subject_id).await
    }

    /// Resolve a subject id that the caller already trusts.
    pub async fn resolve_subject(&self, subject_id: &str) -> Result<CachedIdentity, AuthzError> {
        let now = Utc::now();
        if let Some(hit) = self.cache.get(subject_id) {
            if hit.is_fresh(now) {
                return Ok(hit.value().clone());
            }
        }

        let session = self.session.current();
        let user = self
            .store
            .lookup_user(&session.token, subject_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { .. } => {
                    AuthzError::CredentialInvalid(format!("unknown subject `{subject_id}`"))
                }
                source => AuthzError::IdentityFetch { source },
            })?;
        if user.role.is_empty() {
            return Err(AuthzError::CredentialInvalid(format!(
                "subject `{subject_id}` has no role"
            )));
        }

        let identity = CachedIdentity {
            subject_id: subject_id.to_string(),
            role: user.role,
            expires_at: Utc::now()
                .checked_add_signed(self.ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        if self.ttl > chrono::Duration::zero() {
            self.cache.insert(subject_id.to_string(), identity.clone());
        }
        tracing::debug!(subject = %subject_id, role = %identity.role, "Resolved identity");
        Ok(identity)
    }

    /// Drop entries that are already past their expiry. Returns how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.cache.len();
        self.cache.retain(|_, ident| ident.is_fresh(now));
        before.saturating_sub(self.cache.len())
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn token(claims: serde_json::Value) -> String {
        let header = Base64UrlUnpadded::encode_string(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = Base64UrlUnpadded::encode_string(claims.to_string().as_bytes());
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn test_decode_credential_reads_id_claim() {
        let subject = decode_credential(&token(json!({ "id": "u1", "exp": 4102444800i64 })))
            .unwrap();
        assert_eq!(subject.subject_id, "u1");
        assert!(subject.expires_at.is_some());
    }

    #[test]
    fn test_decode_credential_falls_back_to_sub() {
        let subject = decode_credential(&token(json!({ "sub": "u2" }))).unwrap();
        assert_eq!(subject.subject_id, "u2");
        assert_eq!(subject.expires_at, None);
    }

    #[test]
    fn test_decode_credential_rejects_garbage() {
        for bad in ["", "abc", "a.b", "a.!!!.c", "a.b.c.d"] {
            assert!(
                matches!(decode_credential(bad), Err(AuthzError::CredentialInvalid(_))),
                "{bad:?}"
            );
        }
        assert!(matches!(
            decode_credential(&token(json!({ "exp": 1 }))),
            Err(AuthzError::CredentialInvalid(_))
        ));
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(Some("Bearer   abc  ")).unwrap(), "abc");
        assert!(bearer_token(None).is_err());
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer   ")).is_err());
    }
}
