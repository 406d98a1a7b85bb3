use chrono::Utc;

use crate::authz::errors::AuthzError;
use crate::authz::policy::compile_role;
use crate::authz::types::*;
use crate::authz::PolicySet;
use crate::storage::{RecordStore, StoreError};

/// Hard stop for pagination. A collection that needs more pages than this
/// fails the load rather than loading a truncated set.
pub const MAX_PAGES: u32 = 1_000;

/// Fetch every role record from the record store and compile the records
/// into a fresh `PolicySet`.
///
/// Any transport, status or page-decode failure aborts the whole load; the
/// caller never sees a partial result. A single role record that fails to
/// decode is dropped and counted instead.
pub async fn load_policies(
    store: &dyn RecordStore,
    credential: &SessionCredential,
    page_size: u32,
) -> Result<PolicySet, AuthzError> {
    let mut records = Vec::new();
    let mut dropped_records = 0;
    let mut page = 1;

    loop {
        let resp = store
            .list_roles(&credential.token, page, page_size)
            .await
            .map_err(|source| AuthzError::PolicyFetch { source })?;

        let fetched = resp.items.len();
        for item in resp.items {
            match serde_json::from_value::<RawRoleRecord>(item) {
                Ok(record) => records.push(record),
                Err(e) => {
                    let err = AuthzError::Decode(e.to_string());
                    tracing::warn!(page, error = %err, "Dropping undecodable role record");
                    dropped_records += 1;
                }
            }
        }

        if fetched == 0 || page >= resp.total_pages {
            break;
        }
        if page >= MAX_PAGES {
            return Err(AuthzError::PolicyFetch {
                source: StoreError::PageLimit {
                    limit: MAX_PAGES,
                    total_pages: resp.total_pages,
                },
            });
        }
        page += 1;
    }

    let mut state = compile_policies(records);
    state.dropped_records = dropped_records;

    tracing::info!(
        pages = page,
        roles = state.roles,
        tuples = state.tuples.tuple_count(),
        dropped_entries = state.dropped_entries,
        dropped_records = state.dropped_records,
        "Loaded authorization policies"
    );

    Ok(state)
}

/// Compile role records into a single `PolicySet`.
pub fn compile_policies(records: Vec<RawRoleRecord>) -> PolicySet {
    let mut tuples = TupleIndex::new();
    let mut dropped_entries = 0;

    for record in &records {
        let compiled = compile_role(record);
        for dropped in &compiled.dropped {
            tracing::warn!(
                role = %dropped.role,
                resource = %dropped.resource,
                reason = %dropped.reason,
                "Dropping malformed permission entry"
            );
        }
        dropped_entries += compiled.dropped.len();
        for tuple in compiled.tuples {
            tuples.insert(tuple);
        }
    }

    PolicySet {
        tuples,
        roles: records.len(),
        dropped_entries,
        dropped_records: 0,
        loaded_at: Utc::now(),
    }
}
