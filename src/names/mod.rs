//! Name and location resolution.
//!
//! A file's name and a directory's location are per-branch rows. The
//! visible version is picked from candidates gathered along the ancestry:
//! the nearest branch with an admissible row wins, and within one branch
//! the newest commit wins. Archived rows only compete when the view is
//! bounded in time.

mod listing;

pub use listing::list_directory;

use crate::ancestry::writable_descendants_of;
use crate::db::StoreReader;
use crate::error::{Result, VaultError};
use crate::scope::Scope;
use crate::types::{
    BranchId, CommitId, CreatedForReason, DirectoryCoordinateIds, DirectoryId, DirectoryLocation,
    DirectoryLocationId, FileId, FileName,
};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Generation of a live row. Archived rows use their history id.
const LIVE_GENERATION: u64 = u64::MAX;

/// A row competing to be the visible version.
#[derive(Clone, Debug)]
pub(crate) struct Candidate<T> {
    pub rank: usize,
    pub commit: CommitId,
    pub generation: u64,
    pub row: T,
}

impl<T> Candidate<T> {
    fn precedence(&self) -> (usize, Reverse<CommitId>, Reverse<u64>) {
        (self.rank, Reverse(self.commit), Reverse(self.generation))
    }
}

fn sort_by_precedence<T>(candidates: &mut [Candidate<T>]) {
    candidates.sort_by_key(|c| c.precedence());
}

// --- File names ---

/// Visible name of `file` on `branch`, or `None` if it is not visible there.
pub fn visible_name<S>(
    store: &S,
    file_id: FileId,
    branch_id: BranchId,
    bound: Option<CommitId>,
) -> Result<Option<FileName>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;
    Ok(name_winner_in(store, &scope, file_id)?.filter(|name| !name.deleted))
}

/// Every admissible name row, best first. Deleted rows included.
pub(crate) fn name_candidates_in<S>(
    store: &S,
    scope: &Scope,
    file_id: FileId,
) -> Result<Vec<Candidate<FileName>>>
where
    S: StoreReader + ?Sized,
{
    let mut candidates = Vec::new();

    for (rank, branch) in scope.ranked() {
        let live = store.file_name_on_branch(branch.id, file_id)?;

        if let Some(live) = live {
            // A promoted name now lives on the parent.
            if scope.masks_promoted() && live.promoted {
                continue;
            }
            if scope.admits(rank, live.commit_id) {
                candidates.push(Candidate {
                    rank,
                    commit: live.commit_id,
                    generation: LIVE_GENERATION,
                    row: live,
                });
            }
        }

        if scope.consults_history() {
            for archived in store.file_name_history(branch.id, file_id)? {
                if !scope.admits(rank, archived.commit_id) {
                    continue;
                }
                candidates.push(Candidate {
                    rank,
                    commit: archived.commit_id,
                    generation: archived.id.0,
                    row: archived.to_file_name(),
                });
            }
        }
    }

    sort_by_precedence(&mut candidates);
    Ok(candidates)
}

/// The winning name row, which may be a deletion.
pub(crate) fn name_winner_in<S>(store: &S, scope: &Scope, file_id: FileId) -> Result<Option<FileName>>
where
    S: StoreReader + ?Sized,
{
    Ok(name_candidates_in(store, scope, file_id)?
        .into_iter()
        .next()
        .map(|c| c.row))
}

/// Whether `file` is deleted as seen from `branch`.
///
/// True when the winning row is a deletion, or when an ancestor recorded a
/// deletion newer than the winning row.
pub fn was_file_deleted_on_branch<S>(store: &S, file_id: FileId, branch_id: BranchId) -> Result<bool>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, None)?;
    let candidates = name_candidates_in(store, &scope, file_id)?;
    let Some(winner) = candidates.first() else {
        return Ok(false);
    };
    if winner.row.deleted {
        return Ok(true);
    }
    Ok(candidates
        .iter()
        .skip(1)
        .any(|c| c.row.deleted && c.commit > winner.commit))
}

/// Whether a feature branch and its parent disagree on a file's name or
/// directory.
///
/// Advisory only: the vault never reconciles diverging names.
pub fn is_file_name_different<S>(store: &S, file_id: FileId, branch_id: BranchId) -> Result<bool>
where
    S: StoreReader + ?Sized,
{
    let branch = store
        .branch(branch_id)?
        .ok_or_else(|| VaultError::not_found(format!("branch {}", branch_id)))?;
    let Some(parent) = branch.parent else {
        return Ok(false);
    };

    let ours = visible_name(store, file_id, branch_id, None)?;
    let theirs = visible_name(store, file_id, parent, None)?;

    Ok(match (ours, theirs) {
        (Some(a), Some(b)) => a.name != b.name || a.directory_id != b.directory_id,
        _ => false,
    })
}

/// Whether `file` was first created on `branch`.
pub fn file_created_on_branch<S>(store: &S, file_id: FileId, branch_id: BranchId) -> Result<bool>
where
    S: StoreReader + ?Sized,
{
    let created = |reason: Option<CreatedForReason>| reason == Some(CreatedForReason::Create);

    if let Some(live) = store.file_name_on_branch(branch_id, file_id)? {
        if created(live.created_for) {
            return Ok(true);
        }
    }
    Ok(store
        .file_name_history(branch_id, file_id)?
        .iter()
        .any(|h| created(h.created_for)))
}

// --- Directory locations ---

pub(crate) fn location_candidates_in<S>(
    store: &S,
    scope: &Scope,
    directory_id: DirectoryId,
) -> Result<Vec<Candidate<DirectoryLocation>>>
where
    S: StoreReader + ?Sized,
{
    let mut candidates = Vec::new();

    for (rank, branch) in scope.ranked() {
        if let Some(live) = store.directory_location_on_branch(branch.id, directory_id)? {
            if scope.admits(rank, live.commit_id) {
                candidates.push(Candidate {
                    rank,
                    commit: live.commit_id,
                    generation: LIVE_GENERATION,
                    row: live,
                });
            }
        }

        if scope.consults_history() {
            for archived in store.location_history_on_branch(branch.id)? {
                let loc = archived.location;
                if loc.directory_id != directory_id || !scope.admits(rank, loc.commit_id) {
                    continue;
                }
                candidates.push(Candidate {
                    rank,
                    commit: loc.commit_id,
                    generation: archived.id.0,
                    row: loc,
                });
            }
        }
    }

    sort_by_precedence(&mut candidates);
    Ok(candidates)
}

/// The winning location row of a directory, which may be a deletion.
pub(crate) fn location_winner_in<S>(
    store: &S,
    scope: &Scope,
    directory_id: DirectoryId,
) -> Result<Option<DirectoryLocation>>
where
    S: StoreReader + ?Sized,
{
    Ok(location_candidates_in(store, scope, directory_id)?
        .into_iter()
        .next()
        .map(|c| c.row))
}

/// Visible location of a directory on `branch`.
pub fn visible_location<S>(
    store: &S,
    directory_id: DirectoryId,
    branch_id: BranchId,
    bound: Option<CommitId>,
) -> Result<Option<DirectoryLocation>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;
    Ok(location_winner_in(store, &scope, directory_id)?.filter(|loc| !loc.deleted))
}

/// Location ids that stand for `directory_id` anywhere along the ancestry.
fn location_ids_of<S>(store: &S, scope: &Scope, directory_id: DirectoryId) -> Result<HashSet<DirectoryLocationId>>
where
    S: StoreReader + ?Sized,
{
    let mut ids = HashSet::new();
    for branch in scope.ancestry() {
        if let Some(loc) = store.directory_location_on_branch(branch.id, directory_id)? {
            ids.insert(loc.id);
        }
    }
    Ok(ids)
}

/// Visible child directories of `parent`, ordered by segment name.
pub fn child_directories<S>(
    store: &S,
    branch_id: BranchId,
    parent_location_id: DirectoryLocationId,
    bound: Option<CommitId>,
) -> Result<Vec<DirectoryLocation>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;
    let parent = store
        .directory_location(parent_location_id)?
        .ok_or_else(|| VaultError::not_found(format!("directory location {}", parent_location_id)))?;
    child_directories_in(store, &scope, &parent)
}

pub(crate) fn child_directories_in<S>(
    store: &S,
    scope: &Scope,
    parent: &DirectoryLocation,
) -> Result<Vec<DirectoryLocation>>
where
    S: StoreReader + ?Sized,
{
    let mut parent_ids = location_ids_of(store, scope, parent.directory_id)?;
    parent_ids.insert(parent.id);

    let mut discovered = BTreeSet::new();
    for branch in scope.ancestry() {
        for pid in &parent_ids {
            for loc in store.child_locations_on_branch(branch.id, *pid)? {
                discovered.insert(loc.directory_id);
            }
        }
        if scope.consults_history() {
            for archived in store.location_history_on_branch(branch.id)? {
                if archived
                    .location
                    .parent_location_id
                    .is_some_and(|p| parent_ids.contains(&p))
                {
                    discovered.insert(archived.location.directory_id);
                }
            }
        }
    }

    // Nearest branch wins per segment name.
    let mut by_segment: BTreeMap<String, Candidate<DirectoryLocation>> = BTreeMap::new();
    for directory_id in discovered {
        let Some(winner) = location_candidates_in(store, scope, directory_id)?.into_iter().next() else {
            continue;
        };
        let stays_here = winner
            .row
            .parent_location_id
            .is_some_and(|p| parent_ids.contains(&p));
        if winner.row.deleted || !stays_here {
            continue;
        }

        match by_segment.get(&winner.row.segment_name) {
            Some(existing) if existing.precedence() <= winner.precedence() => {}
            _ => {
                by_segment.insert(winner.row.segment_name.clone(), winner);
            }
        }
    }

    Ok(by_segment.into_values().map(|c| c.row).collect())
}

/// Resolve `(project, branch, path)` to directory ids.
///
/// `appended_path` is a `/`-separated path below the branch root; an empty
/// path names the root itself.
pub fn directory_coordinates<S>(
    store: &S,
    project_name: &str,
    branch_name: &str,
    appended_path: &str,
) -> Result<DirectoryCoordinateIds>
where
    S: StoreReader + ?Sized,
{
    let project = store
        .project_by_name(project_name)?
        .ok_or_else(|| VaultError::InvalidCoordinate(format!("no project named '{}'", project_name)))?;
    let branch = store.branch_by_name(project.id, branch_name)?.ok_or_else(|| {
        VaultError::InvalidCoordinate(format!(
            "no branch '{}' in project '{}'",
            branch_name, project_name
        ))
    })?;

    let scope = Scope::resolve(store, branch.id, None)?;
    let mut current = location_winner_in(store, &scope, branch.root_directory_id)?
        .filter(|loc| !loc.deleted)
        .ok_or_else(|| {
            VaultError::InvalidCoordinate(format!("branch '{}' has no visible root", branch_name))
        })?;

    for segment in appended_path.split('/').filter(|s| !s.is_empty()) {
        current = child_directories_in(store, &scope, &current)?
            .into_iter()
            .find(|loc| loc.segment_name == segment)
            .ok_or_else(|| {
                VaultError::InvalidCoordinate(format!(
                    "no directory '{}' in '{}' on branch '{}'",
                    segment, appended_path, branch_name
                ))
            })?;
    }

    let mut writable_branches = writable_descendants_of(store, branch.id)?;
    writable_branches.insert(branch.id, branch.name.clone());

    debug!(
        project = project_name,
        branch = branch_name,
        path = appended_path,
        directory = %current.directory_id,
        "resolved directory coordinate"
    );

    Ok(DirectoryCoordinateIds {
        project_id: project.id,
        branch_id: branch.id,
        directory_id: current.directory_id,
        directory_location_id: current.id,
        writable_branches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Mutation, Tables};
    use crate::types::{Branch, BranchKind, FileNameId, ProjectId};

    fn branch(id: u64, parent: Option<u64>, kind: BranchKind, commit: u64) -> Mutation {
        Mutation::InsertBranch(Branch {
            id: BranchId(id),
            parent: parent.map(BranchId),
            project_id: ProjectId(1),
            name: format!("b{}", id),
            kind,
            tag_id: None,
            root_directory_id: DirectoryId(1),
            commit_id: CommitId(commit),
            deleted: false,
        })
    }

    fn name(id: u64, branch: u64, text: &str, commit: u64) -> FileName {
        FileName {
            id: FileNameId(id),
            file_id: FileId(1),
            branch_id: BranchId(branch),
            directory_id: DirectoryId(1),
            commit_id: CommitId(commit),
            name: text.to_string(),
            deleted: false,
            promoted: false,
            promotion_commit_id: None,
            created_for: Some(CreatedForReason::Create),
        }
    }

    fn location(id: u64, dir: u64, branch: u64, parent: Option<u64>, segment: &str, commit: u64) -> DirectoryLocation {
        DirectoryLocation {
            id: DirectoryLocationId(id),
            directory_id: DirectoryId(dir),
            branch_id: BranchId(branch),
            parent_location_id: parent.map(DirectoryLocationId),
            commit_id: CommitId(commit),
            segment_name: segment.to_string(),
            deleted: false,
            created_for: Some(CreatedForReason::Create),
        }
    }

    fn two_branches() -> Tables {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            branch(2, Some(1), BranchKind::Feature, 2),
        ]);
        t
    }

    #[test]
    fn test_nearest_branch_wins() {
        let mut t = two_branches();
        t.apply_all(&[
            Mutation::PutFileName(name(1, 1, "trunk.txt", 3)),
            Mutation::PutFileName(name(2, 2, "feature.txt", 4)),
        ]);
        // A newer trunk rename does not beat the feature's own row.
        let mut renamed = name(1, 1, "trunk-renamed.txt", 9);
        renamed.created_for = Some(CreatedForReason::Rename);
        t.apply_all(&[Mutation::PutFileName(renamed)]);

        let seen = visible_name(&t, FileId(1), BranchId(2), None).unwrap().unwrap();
        assert_eq!(seen.name, "feature.txt");

        let trunk = visible_name(&t, FileId(1), BranchId(1), None).unwrap().unwrap();
        assert_eq!(trunk.name, "trunk-renamed.txt");
    }

    #[test]
    fn test_bound_consults_history() {
        let mut t = two_branches();
        t.apply_all(&[Mutation::PutFileName(name(1, 1, "old.txt", 3))]);
        t.apply_all(&[Mutation::PutFileName(name(1, 1, "new.txt", 7))]);

        let at_5 = visible_name(&t, FileId(1), BranchId(1), Some(CommitId(5))).unwrap().unwrap();
        assert_eq!(at_5.name, "old.txt");
        let at_7 = visible_name(&t, FileId(1), BranchId(1), Some(CommitId(7))).unwrap().unwrap();
        assert_eq!(at_7.name, "new.txt");
        assert!(visible_name(&t, FileId(1), BranchId(1), Some(CommitId(2))).unwrap().is_none());
    }

    #[test]
    fn test_deleted_winner_is_invisible() {
        let mut t = two_branches();
        t.apply_all(&[Mutation::PutFileName(name(1, 1, "a.txt", 3))]);
        let mut gone = name(1, 1, "a.txt", 5);
        gone.deleted = true;
        t.apply_all(&[Mutation::PutFileName(gone)]);

        assert!(visible_name(&t, FileId(1), BranchId(1), None).unwrap().is_none());
        assert!(was_file_deleted_on_branch(&t, FileId(1), BranchId(1)).unwrap());
    }

    #[test]
    fn test_ancestor_deletion_newer_than_winner() {
        let mut t = two_branches();
        t.apply_all(&[
            Mutation::PutFileName(name(1, 1, "a.txt", 3)),
            Mutation::PutFileName(name(2, 2, "b.txt", 4)),
        ]);
        let mut gone = name(1, 1, "a.txt", 6);
        gone.deleted = true;
        t.apply_all(&[Mutation::PutFileName(gone)]);

        assert!(visible_name(&t, FileId(1), BranchId(2), None).unwrap().is_some());
        assert!(was_file_deleted_on_branch(&t, FileId(1), BranchId(2)).unwrap());
    }

    #[test]
    fn test_name_difference_is_advisory() {
        let mut t = two_branches();
        t.apply_all(&[Mutation::PutFileName(name(1, 1, "a.txt", 3))]);
        assert!(!is_file_name_different(&t, FileId(1), BranchId(2)).unwrap());

        t.apply_all(&[Mutation::PutFileName(name(2, 2, "b.txt", 4))]);
        assert!(is_file_name_different(&t, FileId(1), BranchId(2)).unwrap());
        assert!(file_created_on_branch(&t, FileId(1), BranchId(1)).unwrap());
    }

    #[test]
    fn test_child_directories_masked_by_segment() {
        let mut t = two_branches();
        t.apply_all(&[
            Mutation::PutDirectoryLocation(location(1, 1, 1, None, "", 1)),
            Mutation::PutDirectoryLocation(location(2, 2, 1, Some(1), "src", 3)),
            Mutation::PutDirectoryLocation(location(3, 3, 2, Some(1), "src", 4)),
            Mutation::PutDirectoryLocation(location(4, 4, 1, Some(1), "docs", 5)),
        ]);

        let on_feature = child_directories(&t, BranchId(2), DirectoryLocationId(1), None).unwrap();
        let seen: Vec<(String, u64)> = on_feature
            .iter()
            .map(|l| (l.segment_name.clone(), l.directory_id.0))
            .collect();
        assert_eq!(seen, vec![("docs".to_string(), 4), ("src".to_string(), 3)]);

        let on_trunk = child_directories(&t, BranchId(1), DirectoryLocationId(1), None).unwrap();
        assert_eq!(on_trunk.len(), 2);
        assert!(on_trunk.iter().any(|l| l.directory_id == DirectoryId(2)));
    }

    #[test]
    fn test_moved_directory_leaves_old_parent() {
        let mut t = two_branches();
        t.apply_all(&[
            Mutation::PutDirectoryLocation(location(1, 1, 1, None, "", 1)),
            Mutation::PutDirectoryLocation(location(2, 2, 1, Some(1), "a", 2)),
            Mutation::PutDirectoryLocation(location(3, 3, 1, Some(1), "b", 2)),
        ]);
        // Move "b" under "a" on the feature branch.
        t.apply_all(&[Mutation::PutDirectoryLocation(location(4, 3, 2, Some(2), "b", 5))]);

        let root_children = child_directories(&t, BranchId(2), DirectoryLocationId(1), None).unwrap();
        assert_eq!(root_children.len(), 1);
        assert_eq!(root_children[0].segment_name, "a");

        let a_children = child_directories(&t, BranchId(2), DirectoryLocationId(2), None).unwrap();
        assert_eq!(a_children.len(), 1);
        assert_eq!(a_children[0].directory_id, DirectoryId(3));

        // Trunk is untouched.
        let trunk_root = child_directories(&t, BranchId(1), DirectoryLocationId(1), None).unwrap();
        assert_eq!(trunk_root.len(), 2);
    }
}
