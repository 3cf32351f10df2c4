//! Directory listings.

use super::name_winner_in;
use crate::db::StoreReader;
use crate::error::Result;
use crate::revisions::tip_revision_in;
use crate::scope::Scope;
use crate::types::{BranchId, CommitId, DirectoryEntry, DirectoryId, FileId};
use std::collections::BTreeSet;

/// Files visible in `directory` on `branch`, ordered by name.
///
/// A file is listed when its visible name places it in this directory, is
/// not a deletion, and at least one revision is visible.
pub fn list_directory<S>(
    store: &S,
    branch_id: BranchId,
    directory_id: DirectoryId,
    bound: Option<CommitId>,
) -> Result<Vec<DirectoryEntry>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;

    let mut files: BTreeSet<FileId> = BTreeSet::new();
    for branch in scope.ancestry() {
        files.extend(
            store
                .file_names_on_branch(branch.id)?
                .into_iter()
                .filter(|n| n.directory_id == directory_id)
                .map(|n| n.file_id),
        );
        if scope.consults_history() {
            files.extend(
                store
                    .file_name_history_on_branch(branch.id)?
                    .into_iter()
                    .filter(|h| h.directory_id == directory_id)
                    .map(|h| h.file_id),
            );
        }
    }

    let mut entries = Vec::new();
    for file_id in files {
        let Some(file_name) = name_winner_in(store, &scope, file_id)? else {
            continue;
        };
        if file_name.deleted || file_name.directory_id != directory_id {
            continue;
        }
        let Some(tip) = tip_revision_in(store, &scope, file_id)? else {
            continue;
        };
        entries.push(DirectoryEntry {
            file_id,
            file_name,
            tip: tip.revision,
            revision_count: tip.revision_count,
        });
    }

    entries.sort_by(|a, b| a.file_name.name.cmp(&b.file_name.name));
    Ok(entries)
}
