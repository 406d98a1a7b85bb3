use serde_json::Value;
use thiserror::Error;

use crate::authz::types::*;

/// One `action[:scope,scope...]` permission string after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSpec {
    pub action: String,
    pub scopes: Vec<String>,
}

/// Why a permission entry was left out of the compiled tuple set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DropReason {
    #[error("permissions for resource are not a list")]
    NotAList,
    #[error("permission entry is not a string: {0}")]
    NotAString(String),
    #[error("permission `{0}` has more than one `:`")]
    TooManyColons(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedEntry {
    pub role: RoleId,
    pub resource: String,
    pub reason: DropReason,
}

/// Tuples produced for one role record, plus whatever had to be skipped.
#[derive(Debug, Clone, Default)]
pub struct CompiledRole {
    pub tuples: Vec<PolicyTuple>,
    pub dropped: Vec<DroppedEntry>,
}

/// Parse a permission string such as `"view"`, `"update:own,shared"` or
/// `"delete:*"`.
///
/// Scope tokens are trimmed and kept as they are, empty ones included. Only a
/// string with more than one `:` is rejected.
pub fn parse_permission(raw: &str) -> Result<PermissionSpec, DropReason> {
    let mut parts = raw.split(':');
    let action = parts.next().unwrap_or_default().trim();
    let scope_list = parts.next();
    if parts.next().is_some() {
        return Err(DropReason::TooManyColons(raw.to_string()));
    }

    let scopes = match scope_list {
        None => vec![DEFAULT_SCOPE.to_string()],
        Some(list) => list.split(',').map(|s| s.trim().to_string()).collect(),
    };

    Ok(PermissionSpec {
        action: action.to_string(),
        scopes,
    })
}

/// Expand one role record into policy tuples.
///
/// Malformed entries are skipped and listed in `dropped`; they never stop the
/// rest of the record from compiling.
pub fn compile_role(record: &RawRoleRecord) -> CompiledRole {
    let mut out = CompiledRole::default();

    for (resource, specs) in &record.permissions {
        let Value::Array(specs) = specs else {
            out.dropped.push(DroppedEntry {
                role: record.id.clone(),
                resource: resource.clone(),
                reason: DropReason::NotAList,
            });
            continue;
        };

        for spec in specs {
            let Some(raw) = spec.as_str() else {
                out.dropped.push(DroppedEntry {
                    role: record.id.clone(),
                    resource: resource.clone(),
                    reason: DropReason::NotAString(spec.to_string()),
                });
                continue;
            };

            match parse_permission(raw) {
                Ok(parsed) => {
                    for scope in parsed.scopes {
                        out.tuples.push(PolicyTuple::new(
                            record.id.clone(),
                            resource.clone(),
                            parsed.action.clone(),
                            scope,
                        ));
                    }
                }
                Err(reason) => out.dropped.push(DroppedEntry {
                    role: record.id.clone(),
                    resource: resource.clone(),
                    reason,
                }),
            }
        }
    }

    out
}
