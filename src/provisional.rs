//! Provisional directories: per-user placeholders for directories a client
//! has created locally but not committed yet.

use crate::db::{Mutation, StoreReader, Transaction};
use crate::error::{Result, VaultError};
use crate::names::{child_directories_in, location_winner_in};
use crate::scope::Scope;
use crate::types::{BranchId, ProvisionalDirectoryId, ProvisionalDirectoryLocation, UserId};
use tracing::debug;

/// Canonical `a/b/c` form of a path below a branch root.
pub(crate) fn normalize_path(path: &str) -> String {
    path.split('/')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Provisional directory of `user` at `appended_path`, if any.
pub fn find_provisional_directory<S>(
    store: &S,
    user_id: UserId,
    appended_path: &str,
) -> Result<Option<ProvisionalDirectoryLocation>>
where
    S: StoreReader + ?Sized,
{
    let wanted = normalize_path(appended_path);
    Ok(store
        .provisional_for_user(user_id)?
        .into_iter()
        .find(|row| row.appended_path == wanted))
}

/// Stage provisional rows for every segment of `appended_path` that has no
/// committed directory yet. Returns the row for the full path.
pub(crate) fn stage_provisional_directory(
    tx: &mut Transaction<'_>,
    user_id: UserId,
    branch_id: BranchId,
    appended_path: &str,
) -> Result<ProvisionalDirectoryLocation> {
    let store = tx.store();
    let segments: Vec<&str> = appended_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(VaultError::InvalidOperation("empty provisional path".into()));
    }

    let scope = Scope::resolve(store, branch_id, None)?;
    let root_id = scope.target().root_directory_id;
    let mut committed = location_winner_in(store, &scope, root_id)?
        .filter(|loc| !loc.deleted)
        .ok_or_else(|| VaultError::not_found(format!("root directory of branch {}", branch_id)))?;

    // Follow committed directories as far as they go.
    let mut depth = 0;
    while depth < segments.len() {
        let next = child_directories_in(store, &scope, &committed)?
            .into_iter()
            .find(|loc| loc.segment_name == segments[depth]);
        match next {
            Some(loc) => {
                committed = loc;
                depth += 1;
            }
            None => break,
        }
    }
    if depth == segments.len() {
        return Err(VaultError::DuplicateName(format!(
            "directory '{}' already exists",
            normalize_path(appended_path)
        )));
    }

    let existing = store.provisional_for_user(user_id)?;
    let mut parent: Option<ProvisionalDirectoryId> = None;
    let mut last = None;

    for end in depth..segments.len() {
        let path = segments[..=end].join("/");
        let row = match existing.iter().find(|row| row.appended_path == path) {
            Some(row) => row.clone(),
            None => {
                let row = ProvisionalDirectoryLocation {
                    id: tx.alloc_provisional(),
                    user_id,
                    branch_id,
                    parent_location_id: parent.is_none().then_some(committed.id),
                    provisional_parent_id: parent,
                    segment_name: segments[end].to_string(),
                    appended_path: path,
                };
                tx.push(Mutation::InsertProvisional(row.clone()));
                row
            }
        };
        parent = Some(row.id);
        last = Some(row);
    }

    debug!(user = %user_id, branch = %branch_id, path = appended_path, "staged provisional directory");
    last.ok_or_else(|| VaultError::InvalidOperation("empty provisional path".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/src//lib/"), "src/lib");
        assert_eq!(normalize_path(""), "");
    }
}
