//! Promotion of feature-branch work onto the parent branch.

use crate::db::{Mutation, StoreReader, Transaction};
use crate::error::{Result, VaultError};
use crate::names::location_winner_in;
use crate::revisions::lineage_tip_in;
use crate::scope::Scope;
use crate::types::{
    Branch, BranchId, BranchKind, CommitId, ContentDigest, CreatedForReason, DirectoryLocation,
    FileId, FileName, FileRevision, FileRevisionId,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// How a file's feature work relates to the parent's current content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PromotionPlan {
    /// The feature built directly on the parent's tip.
    FastForward,
    /// Both sides hold the same content.
    Identical,
    /// The parent has not moved since the common ancestor.
    ParentUnchanged,
    /// Both sides changed; the caller must supply merged content.
    MergeRequired {
        common_ancestor: Option<FileRevision>,
        parent_tip: FileRevision,
        feature_tip: FileRevision,
    },
}

/// Content written to the destination branch.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PromotedContent {
    pub digest: ContentDigest,
    pub size: u64,
}

/// `from` must be a feature branch and `to` its parent.
fn validate_pair<S>(store: &S, from: BranchId, to: BranchId) -> Result<(Branch, Branch)>
where
    S: StoreReader + ?Sized,
{
    let source = store
        .branch(from)?
        .ok_or_else(|| VaultError::not_found(format!("branch {}", from)))?;
    let target = store
        .branch(to)?
        .ok_or_else(|| VaultError::not_found(format!("branch {}", to)))?;

    if source.kind != BranchKind::Feature {
        return Err(VaultError::InvalidOperation(format!(
            "branch '{}' is not a feature branch",
            source.name
        )));
    }
    if source.parent != Some(to) {
        return Err(VaultError::InvalidOperation(format!(
            "branch '{}' is not the parent of '{}'",
            target.name, source.name
        )));
    }
    Ok((source, target))
}

/// Newest unpromoted revision of each file on `from`, ordered by file id.
pub fn find_promotion_candidates<S>(store: &S, from: BranchId, to: BranchId) -> Result<Vec<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    validate_pair(store, from, to)?;

    let mut newest: BTreeMap<FileId, FileRevision> = BTreeMap::new();
    for rev in store.branch_revisions(from)? {
        if !rev.promoted {
            newest.entry(rev.file_id).or_insert(rev);
        }
    }
    Ok(newest.into_values().collect())
}

/// Newest revision of `file` on `to` whose id is at or below both ids.
pub fn find_common_ancestor_revision<S>(
    store: &S,
    to: BranchId,
    newest_on_from_ancestor: FileRevisionId,
    newest_on_to_ancestor: FileRevisionId,
    file_id: FileId,
) -> Result<Option<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    let limit = newest_on_from_ancestor.min(newest_on_to_ancestor);
    Ok(store
        .revisions_on_branch(to, file_id)?
        .into_iter()
        .find(|rev| rev.id <= limit))
}

/// Newest revision on `to` that the feature's work already incorporates.
pub fn deduce_common_ancestor<S>(
    store: &S,
    file_id: FileId,
    from: BranchId,
    to: BranchId,
) -> Result<Option<FileRevision>>
where
    S: StoreReader + ?Sized,
{
    validate_pair(store, from, to)?;

    let on_target = |id: Option<FileRevisionId>| -> Result<Option<FileRevisionId>> {
        let Some(id) = id else { return Ok(None) };
        Ok(store
            .file_revision(id)?
            .filter(|rev| rev.branch_id == to)
            .map(|rev| rev.id))
    };

    // Branch-point ancestors, plus destinations of earlier promotions.
    let mut seen: Option<FileRevisionId> = None;
    for rev in store.revisions_on_branch(from, file_id)? {
        let mut links = vec![on_target(rev.ancestor_revision_id)?];
        if rev.promoted {
            links.push(on_target(rev.reverse_delta_revision_id)?);
        }
        for id in links.into_iter().flatten() {
            seen = Some(seen.map_or(id, |s| s.max(id)));
        }
    }

    let Some(from_side) = seen else {
        return Ok(None);
    };
    let Some(parent_tip) = store.revisions_on_branch(to, file_id)?.into_iter().next() else {
        return Ok(None);
    };

    find_common_ancestor_revision(store, to, from_side, parent_tip.id, file_id)
}

/// Decide how `file` can be promoted from `from` onto `to`.
pub fn plan_promotion<S>(store: &S, file_id: FileId, from: BranchId, to: BranchId) -> Result<PromotionPlan>
where
    S: StoreReader + ?Sized,
{
    validate_pair(store, from, to)?;

    let feature_tip = store
        .revisions_on_branch(from, file_id)?
        .into_iter()
        .find(|rev| !rev.promoted)
        .ok_or_else(|| {
            VaultError::not_found(format!(
                "unpromoted revisions of file {} on branch {}",
                file_id, from
            ))
        })?;

    let Some(parent_tip) = store.revisions_on_branch(to, file_id)?.into_iter().next() else {
        return Ok(PromotionPlan::FastForward);
    };

    if feature_tip.ancestor_revision_id == Some(parent_tip.id) {
        return Ok(PromotionPlan::FastForward);
    }
    if feature_tip.digest == parent_tip.digest {
        return Ok(PromotionPlan::Identical);
    }

    let common_ancestor = deduce_common_ancestor(store, file_id, from, to)?;
    if common_ancestor.as_ref().map(|rev| rev.id) == Some(parent_tip.id) {
        return Ok(PromotionPlan::ParentUnchanged);
    }

    Ok(PromotionPlan::MergeRequired {
        common_ancestor,
        parent_tip,
        feature_tip,
    })
}

/// Stage the promotion of `file` from `from` onto `to` under `commit_id`.
///
/// Returns the revision written on `to`. A second promotion of the same
/// work finds nothing left to promote and fails with
/// [`VaultError::ConcurrentPromotionConflict`].
pub(crate) fn stage_promotion(
    tx: &mut Transaction<'_>,
    file_id: FileId,
    from: BranchId,
    to: BranchId,
    commit_id: CommitId,
    merged: Option<PromotedContent>,
) -> Result<FileRevision> {
    let store = tx.store();
    validate_pair(store, from, to)?;

    let revisions = store.revisions_on_branch(from, file_id)?;
    if revisions.is_empty() {
        return Err(VaultError::not_found(format!(
            "revisions of file {} on branch {}",
            file_id, from
        )));
    }
    let unpromoted: Vec<FileRevision> = revisions.into_iter().filter(|rev| !rev.promoted).collect();
    let Some(feature_tip) = unpromoted.first().cloned() else {
        warn!(file = %file_id, branch = %from, "promotion found nothing left to promote");
        return Err(VaultError::ConcurrentPromotionConflict {
            file: file_id,
            branch: from,
        });
    };

    for rev in &unpromoted {
        tx.push(Mutation::MarkRevisionPromoted { id: rev.id });
    }

    let content = merged.unwrap_or(PromotedContent {
        digest: feature_tip.digest,
        size: feature_tip.size,
    });

    let target_scope = Scope::resolve(store, to, None)?;
    let ancestor = lineage_tip_in(store, &target_scope, file_id)?;
    let destination = FileRevision {
        id: tx.alloc_file_revision(),
        branch_id: to,
        file_id,
        ancestor_revision_id: ancestor.as_ref().map(|rev| rev.id),
        reverse_delta_revision_id: None,
        commit_id,
        workfile_edit_date: feature_tip.workfile_edit_date,
        digest: content.digest,
        size: content.size,
        promoted: false,
    };
    tx.push(Mutation::InsertFileRevision(destination.clone()));

    if let Some(ancestor) = ancestor {
        if ancestor.branch_id == to && ancestor.reverse_delta_revision_id.is_none() {
            tx.push(Mutation::SetReverseDelta {
                id: ancestor.id,
                newer: destination.id,
            });
        }
    }
    // The feature tip is superseded by its promoted copy.
    tx.push(Mutation::SetReverseDelta {
        id: feature_tip.id,
        newer: destination.id,
    });

    if let Some(feature_name) = store.file_name_on_branch(from, file_id)? {
        if !feature_name.promoted {
            stage_name_promotion(tx, &feature_name, to, commit_id)?;
            rehome_directories(tx, &target_scope, &feature_name, from, to, commit_id)?;
        }
    }

    info!(
        file = %file_id,
        from = %from,
        to = %to,
        commit = %commit_id,
        revisions = unpromoted.len(),
        "staged promotion"
    );
    Ok(destination)
}

fn stage_name_promotion(
    tx: &mut Transaction<'_>,
    feature_name: &FileName,
    to: BranchId,
    commit_id: CommitId,
) -> Result<()> {
    tx.push(Mutation::MarkFileNamePromoted {
        id: feature_name.id,
        promotion_commit_id: commit_id,
    });

    let existing = tx.store().file_name_on_branch(to, feature_name.file_id)?;
    let id = match &existing {
        Some(row) => row.id,
        None => tx.alloc_file_name(),
    };

    tx.push(Mutation::PutFileName(FileName {
        id,
        file_id: feature_name.file_id,
        branch_id: to,
        directory_id: feature_name.directory_id,
        commit_id,
        name: feature_name.name.clone(),
        deleted: feature_name.deleted,
        promoted: false,
        promotion_commit_id: None,
        created_for: Some(CreatedForReason::Promotion),
    }));
    Ok(())
}

/// Move directory locations that exist only on the feature branch onto the
/// parent, walking up from the file's directory until the parent already
/// sees the directory.
fn rehome_directories(
    tx: &mut Transaction<'_>,
    target_scope: &Scope,
    feature_name: &FileName,
    from: BranchId,
    to: BranchId,
    commit_id: CommitId,
) -> Result<()> {
    let store = tx.store();
    let mut directory_id = feature_name.directory_id;

    loop {
        let Some(location) = store.directory_location_on_branch(from, directory_id)? else {
            break;
        };
        let visible_on_target = location_winner_in(store, target_scope, directory_id)?
            .is_some_and(|loc| !loc.deleted);
        if visible_on_target {
            break;
        }

        debug!(directory = %directory_id, from = %from, to = %to, "re-homing directory");
        let parent = location.parent_location_id;
        tx.push(Mutation::PutDirectoryLocation(DirectoryLocation {
            branch_id: to,
            commit_id,
            created_for: Some(CreatedForReason::Promotion),
            ..location
        }));

        let Some(parent_id) = parent else { break };
        let Some(parent_location) = store.directory_location(parent_id)? else {
            break;
        };
        directory_id = parent_location.directory_id;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::types::{Commit, DirectoryId, FileNameId, ProjectId, Timestamp, UserId};

    fn seed(db: &Database, mutations: Vec<Mutation>) {
        let mut tx = db.begin().unwrap();
        for m in mutations {
            tx.push(m);
        }
        tx.commit().unwrap();
    }

    fn branch(id: u64, parent: Option<u64>, kind: BranchKind) -> Mutation {
        Mutation::InsertBranch(Branch {
            id: BranchId(id),
            parent: parent.map(BranchId),
            project_id: ProjectId(1),
            name: format!("b{}", id),
            kind,
            tag_id: None,
            root_directory_id: DirectoryId(1),
            commit_id: CommitId(1),
            deleted: false,
        })
    }

    fn rev(id: u64, branch: u64, ancestor: Option<u64>, commit: u64, content: &[u8]) -> Mutation {
        Mutation::InsertFileRevision(FileRevision {
            id: FileRevisionId(id),
            branch_id: BranchId(branch),
            file_id: FileId(1),
            ancestor_revision_id: ancestor.map(FileRevisionId),
            reverse_delta_revision_id: None,
            commit_id: CommitId(commit),
            workfile_edit_date: Timestamp(0),
            digest: ContentDigest::from_bytes(content),
            size: content.len() as u64,
            promoted: false,
        })
    }

    fn promote(db: &Database, commit: u64) -> Result<FileRevision> {
        let mut tx = db.begin()?;
        tx.push(Mutation::InsertCommit(Commit {
            id: CommitId(commit),
            user_id: UserId(1),
            timestamp: Timestamp::now(),
            message: "promote".into(),
        }));
        let dest = stage_promotion(&mut tx, FileId(1), BranchId(2), BranchId(1), CommitId(commit), None)?;
        tx.commit()?;
        Ok(dest)
    }

    fn fixture() -> Database {
        let db = Database::in_memory();
        seed(
            &db,
            vec![
                branch(1, None, BranchKind::Trunk),
                branch(2, Some(1), BranchKind::Feature),
                rev(1, 1, None, 2, b"base"),
                rev(2, 2, Some(1), 3, b"feature edit"),
            ],
        );
        db
    }

    #[test]
    fn test_candidates_require_feature_child() {
        let db = fixture();
        let found = find_promotion_candidates(&db, BranchId(2), BranchId(1)).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, FileRevisionId(2));

        assert!(matches!(
            find_promotion_candidates(&db, BranchId(1), BranchId(2)),
            Err(VaultError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_promote_then_conflict() {
        let db = fixture();
        let dest = promote(&db, 10).unwrap();
        assert_eq!(dest.branch_id, BranchId(1));
        assert_eq!(dest.ancestor_revision_id, Some(FileRevisionId(1)));
        assert_eq!(dest.digest, ContentDigest::from_bytes(b"feature edit"));

        let base = db.file_revision(FileRevisionId(1)).unwrap().unwrap();
        assert_eq!(base.reverse_delta_revision_id, Some(dest.id));
        assert!(db.file_revision(FileRevisionId(2)).unwrap().unwrap().promoted);

        let err = promote(&db, 11).unwrap_err();
        assert!(err.is_benign());
        assert!(find_promotion_candidates(&db, BranchId(2), BranchId(1)).unwrap().is_empty());
    }

    #[test]
    fn test_promotion_marks_name_and_writes_destination() {
        let db = fixture();
        seed(
            &db,
            vec![Mutation::PutFileName(FileName {
                id: FileNameId(5),
                file_id: FileId(1),
                branch_id: BranchId(2),
                directory_id: DirectoryId(1),
                commit_id: CommitId(3),
                name: "renamed.txt".into(),
                deleted: false,
                promoted: false,
                promotion_commit_id: None,
                created_for: Some(CreatedForReason::Rename),
            })],
        );

        promote(&db, 10).unwrap();

        let feature_row = db.file_name_on_branch(BranchId(2), FileId(1)).unwrap().unwrap();
        assert!(feature_row.promoted);
        assert_eq!(feature_row.promotion_commit_id, Some(CommitId(10)));

        let trunk_row = db.file_name_on_branch(BranchId(1), FileId(1)).unwrap().unwrap();
        assert_eq!(trunk_row.name, "renamed.txt");
        assert_eq!(trunk_row.created_for, Some(CreatedForReason::Promotion));
    }

    #[test]
    fn test_plan_fast_forward_and_merge() {
        let db = fixture();
        assert_eq!(
            plan_promotion(&db, FileId(1), BranchId(2), BranchId(1)).unwrap(),
            PromotionPlan::FastForward
        );

        // The parent moves on independently.
        seed(&db, vec![rev(3, 1, Some(1), 4, b"trunk edit")]);
        match plan_promotion(&db, FileId(1), BranchId(2), BranchId(1)).unwrap() {
            PromotionPlan::MergeRequired {
                common_ancestor,
                parent_tip,
                feature_tip,
            } => {
                assert_eq!(common_ancestor.map(|r| r.id), Some(FileRevisionId(1)));
                assert_eq!(parent_tip.id, FileRevisionId(3));
                assert_eq!(feature_tip.id, FileRevisionId(2));
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn test_common_ancestor_bounded_by_both_ids() {
        let db = fixture();
        seed(&db, vec![rev(3, 1, Some(1), 4, b"trunk edit")]);

        let found = find_common_ancestor_revision(&db, BranchId(1), FileRevisionId(2), FileRevisionId(3), FileId(1))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, FileRevisionId(1));
        assert!(
            find_common_ancestor_revision(&db, BranchId(1), FileRevisionId(0), FileRevisionId(3), FileId(1))
                .unwrap()
                .is_none()
        );
    }
}
