//! Main Vault struct tying all components together.

use crate::ancestry::ancestry_of;
use crate::commits::CommitBuilder;
use crate::content::ContentStore;
use crate::db::{Database, Mutation, StoreReader, Transaction};
use crate::error::{Result, VaultError};
use crate::events::{BranchSummary, EventManager, SubscriptionConfig, SubscriptionHandle, SubscriptionId, VaultEvent};
use crate::names::{self, list_directory};
use crate::promotion::{self, PromotedContent, PromotionPlan};
use crate::provisional::{self, stage_provisional_directory};
use crate::revisions;
use crate::tags::{self, check_move, load_tag};
use crate::types::{
    Branch, BranchId, BranchKind, Commit, CommitId, CreatedForReason, Directory,
    DirectoryCoordinateIds, DirectoryEntry, DirectoryId, DirectoryLocation, DirectoryLocationId,
    FileId, FileName, FileRevision, FileRevisionId, Project, ProjectId, ProvisionalDirectoryLocation,
    Tag, TagId, Timestamp, TipRevision, UserId, VaultStats,
};
use fs2::FileExt;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Vault configuration.
#[derive(Clone, Debug)]
pub struct VaultConfig {
    /// Base path for the vault.
    pub path: PathBuf,

    /// Content cache size (number of payloads).
    pub content_cache_size: usize,

    /// Whether to create the vault if it doesn't exist.
    pub create_if_missing: bool,

    /// Transactions between automatic checkpoints (0 disables them).
    pub checkpoint_interval: usize,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./vault"),
            content_cache_size: 1000,
            create_if_missing: true,
            checkpoint_interval: 256,
        }
    }
}

/// Magic bytes for vault manifest.
const VAULT_MAGIC: &[u8; 4] = b"BVS\0";

/// Current vault format version.
const VAULT_VERSION: u8 = 1;

/// Most commits `commits_since` returns in one call.
pub const COMMITS_SINCE_LIMIT: usize = 1000;

/// The branch-aware version store.
///
/// Provides a unified interface for:
/// - Resolving what a branch sees (revisions, names, directories)
/// - Writing commits and managing branches and tags
/// - Promoting feature work onto parent branches
pub struct Vault {
    config: VaultConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    db: Database,

    content: ContentStore,

    events: EventManager,
}

impl Vault {
    /// Open an existing vault or create a new one.
    pub fn open_or_create(config: VaultConfig) -> Result<Self> {
        if config.path.exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(VaultError::NotInitialized)
        }
    }

    /// Create a new vault.
    pub fn create(config: VaultConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        fs::create_dir_all(config.path.join("content"))?;

        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let db = Database::open(&config.path, config.checkpoint_interval)?;
        let content = ContentStore::new(config.path.join("content"), config.content_cache_size)?;

        info!(path = %config.path.display(), "created vault");
        Ok(Self {
            config,
            _lock_file: lock_file,
            db,
            content,
            events: EventManager::new(),
        })
    }

    /// Open an existing vault.
    pub fn open(config: VaultConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let db = Database::open(&config.path, config.checkpoint_interval)?;
        let content = ContentStore::new(config.path.join("content"), config.content_cache_size)?;

        debug!(path = %config.path.display(), "opened vault");
        Ok(Self {
            config,
            _lock_file: lock_file,
            db,
            content,
            events: EventManager::new(),
        })
    }

    /// The underlying store, for resolvers called directly.
    pub fn database(&self) -> &Database {
        &self.db
    }

    // --- Resolution ---

    /// Visible revisions of a file on a branch, newest first.
    pub fn visible_revisions(
        &self,
        file_id: FileId,
        branch_id: BranchId,
        bound: Option<CommitId>,
    ) -> Result<Vec<FileRevision>> {
        revisions::visible_revisions(&self.db, file_id, branch_id, bound)
    }

    pub fn tip_revision(
        &self,
        file_id: FileId,
        branch_id: BranchId,
        bound: Option<CommitId>,
    ) -> Result<Option<TipRevision>> {
        revisions::tip_revision(&self.db, file_id, branch_id, bound)
    }

    /// Newest revision of the file's lineage on a branch, ignoring filters.
    pub fn branch_tip_revision(&self, file_id: FileId, branch_id: BranchId) -> Result<Option<FileRevision>> {
        revisions::branch_tip_revision(&self.db, file_id, branch_id)
    }

    pub fn visible_name(
        &self,
        file_id: FileId,
        branch_id: BranchId,
        bound: Option<CommitId>,
    ) -> Result<Option<FileName>> {
        names::visible_name(&self.db, file_id, branch_id, bound)
    }

    pub fn visible_location(
        &self,
        directory_id: DirectoryId,
        branch_id: BranchId,
        bound: Option<CommitId>,
    ) -> Result<Option<DirectoryLocation>> {
        names::visible_location(&self.db, directory_id, branch_id, bound)
    }

    pub fn child_directories(
        &self,
        branch_id: BranchId,
        parent_location_id: DirectoryLocationId,
        bound: Option<CommitId>,
    ) -> Result<Vec<DirectoryLocation>> {
        names::child_directories(&self.db, branch_id, parent_location_id, bound)
    }

    /// Resolve `project / branch / path` to ids.
    pub fn resolve_directory_coordinate(
        &self,
        project_name: &str,
        branch_name: &str,
        appended_path: &str,
    ) -> Result<DirectoryCoordinateIds> {
        names::directory_coordinates(&self.db, project_name, branch_name, appended_path)
    }

    pub fn list_directory(
        &self,
        branch_id: BranchId,
        directory_id: DirectoryId,
        bound: Option<CommitId>,
    ) -> Result<Vec<DirectoryEntry>> {
        list_directory(&self.db, branch_id, directory_id, bound)
    }

    pub fn was_file_deleted_on_branch(&self, file_id: FileId, branch_id: BranchId) -> Result<bool> {
        names::was_file_deleted_on_branch(&self.db, file_id, branch_id)
    }

    /// Whether a feature branch and its parent disagree on the file's name.
    pub fn is_file_name_different(&self, file_id: FileId, branch_id: BranchId) -> Result<bool> {
        names::is_file_name_different(&self.db, file_id, branch_id)
    }

    pub fn file_created_on_branch(&self, file_id: FileId, branch_id: BranchId) -> Result<bool> {
        names::file_created_on_branch(&self.db, file_id, branch_id)
    }

    /// Payload of a revision, verified against its digest.
    pub fn revision_content(&self, revision_id: FileRevisionId) -> Result<Vec<u8>> {
        let revision = self
            .db
            .file_revision(revision_id)?
            .ok_or_else(|| VaultError::not_found(format!("revision {}", revision_id)))?;
        self.content
            .get(&revision.digest)?
            .ok_or_else(|| VaultError::not_found(format!("content {}", revision.digest)))
    }

    // --- Promotion ---

    pub fn find_promotion_candidates(&self, from: BranchId, to: BranchId) -> Result<Vec<FileRevision>> {
        promotion::find_promotion_candidates(&self.db, from, to)
    }

    pub fn find_common_ancestor_revision(
        &self,
        to: BranchId,
        newest_on_from_ancestor: FileRevisionId,
        newest_on_to_ancestor: FileRevisionId,
        file_id: FileId,
    ) -> Result<Option<FileRevision>> {
        promotion::find_common_ancestor_revision(
            &self.db,
            to,
            newest_on_from_ancestor,
            newest_on_to_ancestor,
            file_id,
        )
    }

    pub fn deduce_common_ancestor(&self, file_id: FileId, from: BranchId, to: BranchId) -> Result<Option<FileRevision>> {
        promotion::deduce_common_ancestor(&self.db, file_id, from, to)
    }

    pub fn plan_promotion(&self, file_id: FileId, from: BranchId, to: BranchId) -> Result<PromotionPlan> {
        promotion::plan_promotion(&self.db, file_id, from, to)
    }

    /// Promote a file's feature work from `from` onto its parent `to`.
    ///
    /// `merged` replaces the feature tip's content on the destination when
    /// the caller has reconciled diverging edits. Returns the destination
    /// revision. Promoting the same work twice fails with a benign
    /// [`VaultError::ConcurrentPromotionConflict`].
    pub fn promote(
        &self,
        file_id: FileId,
        from: BranchId,
        to: BranchId,
        user_id: UserId,
        merged: Option<&[u8]>,
    ) -> Result<FileRevision> {
        let merged = match merged {
            Some(bytes) => Some(PromotedContent {
                digest: self.content.put(bytes)?,
                size: bytes.len() as u64,
            }),
            None => None,
        };

        let mut tx = self.db.begin()?;
        let commit = Self::stage_commit(&mut tx, user_id, &format!("promote file {}", file_id));
        let revision = promotion::stage_promotion(&mut tx, file_id, from, to, commit.id, merged)?;
        tx.commit()?;

        self.events.publish(VaultEvent::FilePromoted {
            file: file_id,
            from,
            to,
            revision: revision.id,
            commit: commit.id,
        });
        Ok(revision)
    }

    // --- Tag Operations ---

    pub fn resolve_tag(&self, tag_id: TagId) -> Result<CommitId> {
        tags::resolve_tag(&self.db, tag_id)
    }

    /// Tag the current state of a branch.
    pub fn create_tag(
        &self,
        branch_id: BranchId,
        user_id: UserId,
        text: &str,
        description: &str,
        moveable: bool,
    ) -> Result<Tag> {
        let mut tx = self.db.begin()?;
        let branch = Self::live_branch(tx.store(), branch_id)?;
        if tx
            .store()
            .tags_on_branch(branch_id)?
            .iter()
            .any(|tag| tag.text == text)
        {
            return Err(VaultError::DuplicateName(text.to_string()));
        }

        let commit = Self::stage_commit(&mut tx, user_id, &format!("tag '{}' on {}", text, branch.name));
        let tag = Tag {
            id: tx.alloc_tag(),
            branch_id,
            commit_id: commit.id,
            moveable,
            text: text.to_string(),
            description: description.to_string(),
        };
        tx.push(Mutation::InsertTag(tag.clone()));
        tx.commit()?;

        info!(tag = %tag.id, branch = %branch_id, moveable, "created tag");
        Ok(tag)
    }

    /// Move a moveable tag forward to `commit_id`.
    pub fn move_tag(&self, tag_id: TagId, commit_id: CommitId) -> Result<Tag> {
        let mut tx = self.db.begin()?;
        let tag = load_tag(tx.store(), tag_id)?;
        check_move(&tag, commit_id)?;
        if tx.store().commit(commit_id)?.is_none() {
            return Err(VaultError::not_found(format!("commit {}", commit_id)));
        }

        tx.push(Mutation::MoveTag {
            id: tag_id,
            commit_id,
        });
        tx.commit()?;

        info!(tag = %tag_id, from = %tag.commit_id, to = %commit_id, "moved tag");
        self.events.publish(VaultEvent::TagMoved {
            tag: tag_id,
            branch: tag.branch_id,
            from: tag.commit_id,
            to: commit_id,
        });
        Ok(Tag { commit_id, ..tag })
    }

    pub fn tags_on_branch(&self, branch_id: BranchId) -> Result<Vec<Tag>> {
        self.db.tags_on_branch(branch_id)
    }

    // --- Project and Branch Operations ---

    /// Create a project with its trunk and root directory.
    pub fn create_project(&self, name: &str, user_id: UserId) -> Result<(Project, Branch)> {
        let mut tx = self.db.begin()?;
        if tx.store().project_by_name(name)?.is_some() {
            return Err(VaultError::DuplicateName(name.to_string()));
        }

        let commit = Self::stage_commit(&mut tx, user_id, &format!("create project '{}'", name));
        let project = Project {
            id: tx.alloc_project(),
            name: name.to_string(),
            commit_id: commit.id,
            deleted: false,
        };
        let root = Directory {
            id: tx.alloc_directory(),
            project_id: project.id,
        };
        let trunk = Branch {
            id: tx.alloc_branch(),
            parent: None,
            project_id: project.id,
            name: "trunk".to_string(),
            kind: BranchKind::Trunk,
            tag_id: None,
            root_directory_id: root.id,
            commit_id: commit.id,
            deleted: false,
        };
        let root_location = DirectoryLocation {
            id: tx.alloc_directory_location(),
            directory_id: root.id,
            branch_id: trunk.id,
            parent_location_id: None,
            commit_id: commit.id,
            segment_name: String::new(),
            deleted: false,
            created_for: Some(CreatedForReason::Create),
        };

        tx.push(Mutation::InsertProject(project.clone()));
        tx.push(Mutation::InsertDirectory(root));
        tx.push(Mutation::InsertBranch(trunk.clone()));
        tx.push(Mutation::PutDirectoryLocation(root_location));
        tx.commit()?;

        info!(project = %project.id, name, "created project");
        self.events.publish(VaultEvent::BranchCreated {
            branch: BranchSummary::from_branch(&trunk),
        });
        Ok((project, trunk))
    }

    /// Create a feature branch whose work is promoted back onto `parent`.
    pub fn create_feature_branch(&self, parent: BranchId, name: &str, user_id: UserId) -> Result<Branch> {
        self.create_branch(parent, name, user_id, BranchKind::Feature, None)
    }

    /// Create a release branch frozen at the creating commit.
    pub fn create_release_branch(&self, parent: BranchId, name: &str, user_id: UserId) -> Result<Branch> {
        self.create_branch(parent, name, user_id, BranchKind::Release, None)
    }

    /// Create a read-only branch anchored to a tag on the tag's branch.
    pub fn create_tag_anchored_branch(&self, tag_id: TagId, name: &str, user_id: UserId) -> Result<Branch> {
        let tag = load_tag(&self.db, tag_id)?;
        self.create_branch(tag.branch_id, name, user_id, BranchKind::TagAnchored, Some(tag_id))
    }

    /// Soft-delete a branch. The trunk and branches with live children stay.
    pub fn delete_branch(&self, branch_id: BranchId, user_id: UserId) -> Result<()> {
        let mut tx = self.db.begin()?;
        let branch = Self::live_branch(tx.store(), branch_id)?;
        if branch.kind == BranchKind::Trunk {
            return Err(VaultError::InvalidOperation("cannot delete the trunk".into()));
        }
        if !tx.store().child_branches(branch_id)?.is_empty() {
            return Err(VaultError::InvalidOperation(format!(
                "branch '{}' has live child branches",
                branch.name
            )));
        }

        let commit = Self::stage_commit(&mut tx, user_id, &format!("delete branch '{}'", branch.name));
        tx.push(Mutation::DeleteBranch { id: branch_id });
        tx.commit()?;

        info!(branch = %branch_id, name = %branch.name, commit = %commit.id, "deleted branch");
        self.events.publish(VaultEvent::BranchDeleted {
            branch: branch_id,
            name: branch.name,
        });
        Ok(())
    }

    pub fn branch(&self, branch_id: BranchId) -> Result<Option<Branch>> {
        self.db.branch(branch_id)
    }

    pub fn project_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        self.db.project_branches(project_id)
    }

    // --- Commit Operations ---

    /// Start a commit. The vault accepts no other writes until the builder
    /// is committed or dropped: writers on other threads wait, and a write
    /// on the builder's own thread fails with [`VaultError::InvalidOperation`].
    pub fn begin_commit(&self, user_id: UserId, message: &str) -> Result<CommitBuilder<'_>> {
        let tx = self.db.begin()?;
        Ok(CommitBuilder::new(tx, &self.content, &self.events, user_id, message))
    }

    pub fn amend_commit_message(&self, commit_id: CommitId, message: &str) -> Result<()> {
        let mut tx = self.db.begin()?;
        if tx.store().commit(commit_id)?.is_none() {
            return Err(VaultError::not_found(format!("commit {}", commit_id)));
        }
        tx.push(Mutation::AmendCommitMessage {
            id: commit_id,
            message: message.to_string(),
        });
        tx.commit()
    }

    pub fn commit(&self, commit_id: CommitId) -> Result<Option<Commit>> {
        self.db.commit(commit_id)
    }

    /// A user's commits, newest first.
    pub fn recent_commits_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Commit>> {
        self.db.commits_by_user(user_id, limit)
    }

    /// Commits after `since` that wrote revisions anywhere on the branch's
    /// ancestry, oldest first, at most [`COMMITS_SINCE_LIMIT`].
    pub fn commits_since(&self, since: CommitId, branch_id: BranchId) -> Result<Vec<Commit>> {
        let mut ids = BTreeSet::new();
        for branch in ancestry_of(&self.db, branch_id)? {
            ids.extend(
                self.db
                    .branch_revisions(branch.id)?
                    .into_iter()
                    .map(|rev| rev.commit_id)
                    .filter(|&commit| commit > since),
            );
        }

        let mut commits = Vec::new();
        for id in ids.into_iter().take(COMMITS_SINCE_LIMIT) {
            if let Some(commit) = self.db.commit(id)? {
                commits.push(commit);
            }
        }
        Ok(commits)
    }

    // --- Provisional Directories ---

    /// Reserve a path on a branch for a user before the directories exist.
    pub fn create_provisional_directory(
        &self,
        user_id: UserId,
        branch_id: BranchId,
        appended_path: &str,
    ) -> Result<ProvisionalDirectoryLocation> {
        let mut tx = self.db.begin()?;
        let row = stage_provisional_directory(&mut tx, user_id, branch_id, appended_path)?;
        tx.commit()?;
        Ok(row)
    }

    pub fn find_provisional_directory(
        &self,
        user_id: UserId,
        appended_path: &str,
    ) -> Result<Option<ProvisionalDirectoryLocation>> {
        provisional::find_provisional_directory(&self.db, user_id, appended_path)
    }

    /// Drop every provisional directory of a user. Returns how many went.
    pub fn discard_provisional_directories(&self, user_id: UserId) -> Result<usize> {
        let mut tx = self.db.begin()?;
        let count = tx.store().provisional_for_user(user_id)?.len();
        if count > 0 {
            tx.push(Mutation::DiscardProvisional { user_id });
            tx.commit()?;
        }
        debug!(user = %user_id, count, "discarded provisional directories");
        Ok(count)
    }

    // --- Subscriptions ---

    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.events.subscribe(config)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.events.unsubscribe(id)
    }

    // --- Vault Operations ---

    /// Get vault statistics.
    pub fn stats(&self) -> Result<VaultStats> {
        self.db.stats()
    }

    /// Bytes held by revision payloads.
    pub fn content_size(&self) -> Result<u64> {
        self.content.total_size()
    }

    /// Checkpoint the tables to disk.
    pub fn sync(&self) -> Result<()> {
        self.db.checkpoint()
    }

    /// Checkpoint, then refuse every further request.
    pub fn close(&self) -> Result<()> {
        if self.db.is_available() {
            self.db.checkpoint()?;
            self.db.close();
        }
        Ok(())
    }

    /// Get the vault path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn create_branch(
        &self,
        parent: BranchId,
        name: &str,
        user_id: UserId,
        kind: BranchKind,
        tag_id: Option<TagId>,
    ) -> Result<Branch> {
        let mut tx = self.db.begin()?;
        let parent_branch = Self::live_branch(tx.store(), parent)?;
        if kind != BranchKind::TagAnchored && !parent_branch.kind.is_writable() {
            return Err(VaultError::InvalidOperation(format!(
                "cannot branch from read-only branch '{}'",
                parent_branch.name
            )));
        }
        if tx
            .store()
            .branch_by_name(parent_branch.project_id, name)?
            .is_some()
        {
            return Err(VaultError::DuplicateName(name.to_string()));
        }

        let commit = Self::stage_commit(&mut tx, user_id, &format!("create branch '{}'", name));
        let branch = Branch {
            id: tx.alloc_branch(),
            parent: Some(parent),
            project_id: parent_branch.project_id,
            name: name.to_string(),
            kind,
            tag_id,
            root_directory_id: parent_branch.root_directory_id,
            commit_id: commit.id,
            deleted: false,
        };
        tx.push(Mutation::InsertBranch(branch.clone()));
        tx.commit()?;

        info!(branch = %branch.id, name, kind = ?kind, parent = %parent, "created branch");
        self.events.publish(VaultEvent::BranchCreated {
            branch: BranchSummary::from_branch(&branch),
        });
        Ok(branch)
    }

    fn live_branch(store: &Database, branch_id: BranchId) -> Result<Branch> {
        store
            .branch(branch_id)?
            .filter(|branch| !branch.deleted)
            .ok_or_else(|| VaultError::not_found(format!("branch {}", branch_id)))
    }

    fn stage_commit(tx: &mut Transaction<'_>, user_id: UserId, message: &str) -> Commit {
        let commit = Commit {
            id: tx.alloc_commit(),
            user_id,
            timestamp: Timestamp::now(),
            message: message.to_string(),
        };
        tx.push(Mutation::InsertCommit(commit.clone()));
        commit
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(VAULT_MAGIC)?;
        file.write_all(&[VAULT_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != VAULT_MAGIC {
            return Err(VaultError::InvalidFormat("Invalid vault magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != VAULT_VERSION {
            return Err(VaultError::InvalidFormat(format!(
                "Unsupported vault version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| VaultError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        // Best-effort checkpoint on drop
        if self.db.is_available() {
            let _ = self.sync();
        }
    }
}
