//! Revision visibility.
//!
//! Revisions are scanned child-first along the ancestry, newest first per
//! branch. The resulting lists keep that scan order: the first element is
//! the tip.

use crate::db::StoreReader;
use crate::error::Result;
use crate::scope::{Scope, VisibilityStrategy};
use crate::types::{BranchId, CommitId, FileId, FileRevision, TipRevision};
use tracing::trace;

/// Revisions of `file` visible on `branch`, tip first.
pub fn visible_revisions<S>(
    store: &S,
    file_id: FileId,
    branch_id: BranchId,
    bound: Option<CommitId>,
) -> Result<Vec<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;
    visible_revisions_in(store, &scope, file_id)
}

/// The visible tip of `file` on `branch` with the number of visible revisions.
pub fn tip_revision<S>(
    store: &S,
    file_id: FileId,
    branch_id: BranchId,
    bound: Option<CommitId>,
) -> Result<Option<TipRevision>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, bound)?;
    tip_revision_in(store, &scope, file_id)
}

/// Newest revision anywhere on the lineage, ignoring every filter.
///
/// This is the revision a new commit on `branch` builds on.
pub fn branch_tip_revision<S>(store: &S, file_id: FileId, branch_id: BranchId) -> Result<Option<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    let scope = Scope::resolve(store, branch_id, None)?;
    lineage_tip_in(store, &scope, file_id)
}

pub(crate) fn lineage_tip_in<S>(store: &S, scope: &Scope, file_id: FileId) -> Result<Option<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    for branch in scope.ancestry() {
        if let Some(rev) = store.revisions_on_branch(branch.id, file_id)?.into_iter().next() {
            return Ok(Some(rev));
        }
    }
    Ok(None)
}

pub(crate) fn tip_revision_in<S>(store: &S, scope: &Scope, file_id: FileId) -> Result<Option<TipRevision>>
where
    S: StoreReader + ?Sized,
{
    let mut visible = visible_revisions_in(store, scope, file_id)?;
    let revision_count = visible.len();
    if visible.is_empty() {
        return Ok(None);
    }
    Ok(Some(TipRevision {
        revision: visible.swap_remove(0),
        revision_count,
    }))
}

pub(crate) fn visible_revisions_in<S>(store: &S, scope: &Scope, file_id: FileId) -> Result<Vec<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    let bound = scope.bound();
    let mut scanned: Vec<(usize, FileRevision)> = Vec::new();

    for (rank, branch) in scope.ranked() {
        if scope.strategy() == VisibilityStrategy::Trunk && rank > 0 {
            break;
        }
        for rev in store.revisions_on_branch(branch.id, file_id)? {
            if bound.map_or(true, |b| rev.commit_id <= b) {
                scanned.push((rank, rev));
            }
        }
    }

    let visible: Vec<FileRevision> = match scope.strategy() {
        VisibilityStrategy::Feature => {
            let mut rows = scanned.into_iter();
            let Some((_, baseline)) = rows.next() else {
                return Ok(Vec::new());
            };
            let pivot = baseline.commit_id;

            // The baseline is kept even when it is promoted.
            let mut kept = vec![baseline];
            kept.extend(
                rows.filter(|(rank, rev)| !rev.promoted && (*rank == 0 || rev.commit_id < pivot))
                    .map(|(_, rev)| rev),
            );
            kept
        }
        _ => scanned
            .into_iter()
            .filter(|(rank, rev)| scope.admits(*rank, rev.commit_id))
            .map(|(_, rev)| rev)
            .collect(),
    };

    trace!(
        file = %file_id,
        branch = %scope.target().id,
        visible = visible.len(),
        "resolved revisions"
    );
    Ok(visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Mutation, Tables};
    use crate::types::{
        Branch, BranchKind, ContentDigest, DirectoryId, FileRevisionId, ProjectId, Tag, TagId,
        Timestamp,
    };

    fn branch(id: u64, parent: Option<u64>, kind: BranchKind, commit: u64) -> Mutation {
        Mutation::InsertBranch(Branch {
            id: BranchId(id),
            parent: parent.map(BranchId),
            project_id: ProjectId(1),
            name: format!("b{}", id),
            kind,
            tag_id: (kind == BranchKind::TagAnchored).then_some(TagId(1)),
            root_directory_id: DirectoryId(1),
            commit_id: CommitId(commit),
            deleted: false,
        })
    }

    fn rev(id: u64, branch: u64, commit: u64, promoted: bool) -> Mutation {
        Mutation::InsertFileRevision(FileRevision {
            id: FileRevisionId(id),
            branch_id: BranchId(branch),
            file_id: FileId(1),
            ancestor_revision_id: None,
            reverse_delta_revision_id: None,
            commit_id: CommitId(commit),
            workfile_edit_date: Timestamp(0),
            digest: ContentDigest::from_bytes(&id.to_le_bytes()),
            size: 8,
            promoted,
        })
    }

    fn ids(revs: &[FileRevision]) -> Vec<u64> {
        revs.iter().map(|r| r.id.0).collect()
    }

    #[test]
    fn test_trunk_newest_first() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            rev(3, 1, 3, false),
            rev(7, 1, 7, false),
            rev(12, 1, 12, false),
        ]);

        let revs = visible_revisions(&t, FileId(1), BranchId(1), None).unwrap();
        assert_eq!(ids(&revs), vec![12, 7, 3]);

        let tip = tip_revision(&t, FileId(1), BranchId(1), Some(CommitId(8))).unwrap().unwrap();
        assert_eq!(tip.revision.id, FileRevisionId(7));
        assert_eq!(tip.revision_count, 2);
    }

    #[test]
    fn test_feature_masks_newer_parent_rows() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            branch(2, Some(1), BranchKind::Feature, 4),
            rev(1, 1, 2, false),
            rev(2, 2, 5, false),
            rev(3, 1, 6, false),
        ]);

        // Scan order: feature rev 2 (baseline, commit 5), trunk 3 (commit 6, too new), trunk 1.
        let revs = visible_revisions(&t, FileId(1), BranchId(2), None).unwrap();
        assert_eq!(ids(&revs), vec![2, 1]);
    }

    #[test]
    fn test_feature_hides_promoted_rows_after_baseline() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            branch(2, Some(1), BranchKind::Feature, 2),
            rev(1, 2, 3, true),
            rev(2, 2, 4, false),
        ]);

        let revs = visible_revisions(&t, FileId(1), BranchId(2), None).unwrap();
        assert_eq!(ids(&revs), vec![2]);
    }

    #[test]
    fn test_release_frozen_at_creation() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            rev(1, 1, 2, false),
            branch(2, Some(1), BranchKind::Release, 5),
            rev(2, 1, 6, false),
        ]);

        let revs = visible_revisions(&t, FileId(1), BranchId(2), None).unwrap();
        assert_eq!(ids(&revs), vec![1]);
    }

    #[test]
    fn test_tag_anchored_ignores_promoted_flag() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            rev(1, 1, 2, true),
            rev(2, 1, 4, false),
            Mutation::InsertTag(Tag {
                id: TagId(1),
                branch_id: BranchId(1),
                commit_id: CommitId(4),
                moveable: false,
                text: "v1".into(),
                description: String::new(),
            }),
            branch(3, Some(1), BranchKind::TagAnchored, 9),
        ]);

        let revs = visible_revisions(&t, FileId(1), BranchId(3), None).unwrap();
        assert_eq!(ids(&revs), vec![1]);
    }

    #[test]
    fn test_no_revisions_is_empty() {
        let mut t = Tables::new();
        t.apply_all(&[branch(1, None, BranchKind::Trunk, 1)]);

        assert!(visible_revisions(&t, FileId(1), BranchId(1), None).unwrap().is_empty());
        assert!(tip_revision(&t, FileId(1), BranchId(1), None).unwrap().is_none());
    }

    #[test]
    fn test_branch_tip_ignores_filters() {
        let mut t = Tables::new();
        t.apply_all(&[
            branch(1, None, BranchKind::Trunk, 1),
            branch(2, Some(1), BranchKind::Feature, 2),
            rev(1, 1, 3, false),
            rev(2, 1, 9, false),
        ]);

        let tip = branch_tip_revision(&t, FileId(1), BranchId(2)).unwrap().unwrap();
        assert_eq!(tip.id, FileRevisionId(2));
    }
}
