//! Tests for promoting feature work onto parent branches.

use branchvault::{
    BranchId, DirectoryId, EventFilter, FileId, PromotionPlan, SubscriptionConfig, UserId, Vault,
    VaultConfig, VaultError, VaultEvent,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

const USER: UserId = UserId(7);

fn test_config(dir: &TempDir) -> VaultConfig {
    VaultConfig {
        path: dir.path().join("vault"),
        content_cache_size: 100,
        create_if_missing: true,
        checkpoint_interval: 0,
    }
}

fn add_file(vault: &Vault, branch: BranchId, directory: DirectoryId, name: &str, content: &[u8]) -> FileId {
    let mut commit = vault.begin_commit(USER, "add").unwrap();
    let file = commit.add_file(branch, directory, name, content).unwrap();
    commit.commit().unwrap();
    file
}

fn edit(vault: &Vault, branch: BranchId, file: FileId, content: &[u8]) {
    let mut commit = vault.begin_commit(USER, "edit").unwrap();
    commit.add_revision(branch, file, content).unwrap();
    commit.commit().unwrap();
}

fn tip_content(vault: &Vault, file: FileId, branch: BranchId) -> Vec<u8> {
    let tip = vault.tip_revision(file, branch, None).unwrap().unwrap();
    vault.revision_content(tip.revision.id).unwrap()
}

// --- Promotion Workflow ---

#[test]
fn test_promote_feature_edit() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"improved");

    let candidates = vault.find_promotion_candidates(feature.id, trunk.id).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].file_id, file);

    let destination = vault.promote(file, feature.id, trunk.id, USER, None).unwrap();
    assert_eq!(destination.branch_id, trunk.id);
    assert_eq!(tip_content(&vault, file, trunk.id), b"improved");
    assert_eq!(tip_content(&vault, file, feature.id), b"improved");

    assert!(vault.find_promotion_candidates(feature.id, trunk.id).unwrap().is_empty());
}

#[test]
fn test_second_promotion_is_benign_conflict() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"improved");

    vault.promote(file, feature.id, trunk.id, USER, None).unwrap();
    let revisions_after_first = vault.stats().unwrap().file_revision_count;

    let err = vault.promote(file, feature.id, trunk.id, USER, None).unwrap_err();
    assert!(matches!(err, VaultError::ConcurrentPromotionConflict { .. }));
    assert!(err.is_benign());

    // The failed attempt left nothing behind.
    assert_eq!(vault.stats().unwrap().file_revision_count, revisions_after_first);
}

#[test]
fn test_concurrent_promotions_apply_once() {
    let dir = TempDir::new().unwrap();
    let vault = Arc::new(Vault::create(test_config(&dir)).unwrap());
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"contended");

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let vault = Arc::clone(&vault);
            let (feature_id, trunk_id) = (feature.id, trunk.id);
            thread::spawn(move || vault.promote(file, feature_id, trunk_id, USER, None))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert!(result.as_ref().unwrap_err().is_benign());
    }

    let on_trunk = vault.visible_revisions(file, trunk.id, None).unwrap();
    assert_eq!(on_trunk.len(), 2);
}

#[test]
fn test_promote_merged_content() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"feature");
    edit(&vault, trunk.id, file, b"trunk");

    match vault.plan_promotion(file, feature.id, trunk.id).unwrap() {
        PromotionPlan::MergeRequired {
            common_ancestor,
            parent_tip,
            feature_tip,
        } => {
            let ancestor = common_ancestor.unwrap();
            assert_eq!(vault.revision_content(ancestor.id).unwrap(), b"base");
            assert_eq!(vault.revision_content(parent_tip.id).unwrap(), b"trunk");
            assert_eq!(vault.revision_content(feature_tip.id).unwrap(), b"feature");
        }
        other => panic!("expected merge, got {:?}", other),
    }

    vault
        .promote(file, feature.id, trunk.id, USER, Some(&b"feature+trunk"[..]))
        .unwrap();
    assert_eq!(tip_content(&vault, file, trunk.id), b"feature+trunk");
}

#[test]
fn test_plan_fast_forward_then_parent_unchanged() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();

    edit(&vault, feature.id, file, b"first");
    assert_eq!(
        vault.plan_promotion(file, feature.id, trunk.id).unwrap(),
        PromotionPlan::FastForward
    );

    edit(&vault, feature.id, file, b"second");
    assert_eq!(
        vault.plan_promotion(file, feature.id, trunk.id).unwrap(),
        PromotionPlan::ParentUnchanged
    );
}

#[test]
fn test_common_ancestor_tracks_earlier_promotion() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"round one");
    let first = vault.promote(file, feature.id, trunk.id, USER, None).unwrap();

    edit(&vault, feature.id, file, b"round two");
    edit(&vault, trunk.id, file, b"trunk moved");

    let ancestor = vault
        .deduce_common_ancestor(file, feature.id, trunk.id)
        .unwrap()
        .unwrap();
    assert_eq!(ancestor.id, first.id);
}

#[test]
fn test_promote_requires_parent_pair() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let release = vault.create_release_branch(trunk.id, "release", USER).unwrap();
    edit(&vault, release.id, file, b"hotfix");

    assert!(matches!(
        vault.promote(file, release.id, trunk.id, USER, None),
        Err(VaultError::InvalidOperation(_))
    ));
    assert!(matches!(
        vault.find_promotion_candidates(trunk.id, release.id),
        Err(VaultError::InvalidOperation(_))
    ));
}

// --- Names and Directories ---

#[test]
fn test_promotion_carries_rename_and_directories() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();

    let mut commit = vault.begin_commit(USER, "new section").unwrap();
    let docs = commit.add_directory(feature.id, trunk.root_directory_id, "docs").unwrap();
    let guides = commit.add_directory(feature.id, docs, "guides").unwrap();
    let file = commit.add_file(feature.id, guides, "setup.md", b"steps").unwrap();
    commit.commit().unwrap();

    assert!(vault.resolve_directory_coordinate("site", "trunk", "docs/guides").is_err());

    vault.promote(file, feature.id, trunk.id, USER, None).unwrap();

    let coords = vault.resolve_directory_coordinate("site", "trunk", "docs/guides").unwrap();
    assert_eq!(coords.directory_id, guides);
    assert_eq!(vault.visible_name(file, trunk.id, None).unwrap().unwrap().name, "setup.md");
    assert_eq!(tip_content(&vault, file, trunk.id), b"steps");

    // The feature keeps seeing the same tree.
    let on_feature = vault.resolve_directory_coordinate("site", "feature", "docs/guides").unwrap();
    assert_eq!(on_feature.directory_id, guides);
    assert_eq!(vault.visible_name(file, feature.id, None).unwrap().unwrap().name, "setup.md");
}

#[test]
fn test_promoted_rename_lands_on_parent() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "old.txt", b"x");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();

    let mut commit = vault.begin_commit(USER, "rename").unwrap();
    commit.rename_file(feature.id, file, "new.txt").unwrap();
    commit.commit().unwrap();
    assert!(vault.is_file_name_different(file, feature.id).unwrap());

    vault.promote(file, feature.id, trunk.id, USER, None).unwrap();

    assert_eq!(vault.visible_name(file, trunk.id, None).unwrap().unwrap().name, "new.txt");
    assert!(!vault.is_file_name_different(file, feature.id).unwrap());
}

// --- Events ---

#[test]
fn test_promotion_event_published() {
    let dir = TempDir::new().unwrap();
    let vault = Vault::create(test_config(&dir)).unwrap();
    let (_, trunk) = vault.create_project("site", USER).unwrap();

    let file = add_file(&vault, trunk.id, trunk.root_directory_id, "a.txt", b"base");
    let feature = vault.create_feature_branch(trunk.id, "feature", USER).unwrap();
    edit(&vault, feature.id, file, b"work");

    let handle = vault.subscribe(SubscriptionConfig {
        filter: EventFilter::promotions(),
        ..Default::default()
    });
    let destination = vault.promote(file, feature.id, trunk.id, USER, None).unwrap();

    match handle.recv_timeout(Duration::from_secs(1)).unwrap() {
        VaultEvent::FilePromoted {
            file: promoted,
            from,
            to,
            revision,
            commit,
        } => {
            assert_eq!(promoted, file);
            assert_eq!(from, feature.id);
            assert_eq!(to, trunk.id);
            assert_eq!(revision, destination.id);
            assert_eq!(commit, destination.commit_id);
        }
        other => panic!("unexpected event {:?}", other),
    }
}
