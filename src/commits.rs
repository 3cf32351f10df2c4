//! Commit construction.
//!
//! A [`CommitBuilder`] stages directory and file changes on one or more
//! writable branches and applies them as a single transaction. Changes
//! staged earlier in the same builder are visible to later operations.

use crate::content::ContentStore;
use crate::db::{Mutation, StoreReader, Transaction};
use crate::error::{Result, VaultError};
use crate::events::{EventManager, VaultEvent};
use crate::names::{child_directories_in, location_winner_in, name_winner_in};
use crate::revisions::lineage_tip_in;
use crate::scope::Scope;
use crate::types::{
    BranchId, Commit, CommitId, ContentDigest, CreatedForReason, Directory, DirectoryId,
    DirectoryLocation, DirectoryLocationId, File, FileId, FileName, FileRevision, Timestamp,
    UserId,
};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Stages one commit. Dropping the builder discards everything staged.
pub struct CommitBuilder<'a> {
    tx: Transaction<'a>,
    content: &'a ContentStore,
    events: &'a EventManager,
    commit: Commit,
    names: HashMap<(BranchId, FileId), FileName>,
    locations: HashMap<(BranchId, DirectoryId), DirectoryLocation>,
    tips: HashMap<(BranchId, FileId), FileRevision>,
    branches: BTreeSet<BranchId>,
}

fn check_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains('/') {
        return Err(VaultError::InvalidOperation(format!(
            "invalid name '{}'",
            segment
        )));
    }
    Ok(())
}

impl<'a> CommitBuilder<'a> {
    pub(crate) fn new(
        mut tx: Transaction<'a>,
        content: &'a ContentStore,
        events: &'a EventManager,
        user_id: UserId,
        message: &str,
    ) -> Self {
        let commit = Commit {
            id: tx.alloc_commit(),
            user_id,
            timestamp: Timestamp::now(),
            message: message.to_string(),
        };
        tx.push(Mutation::InsertCommit(commit.clone()));

        Self {
            tx,
            content,
            events,
            commit,
            names: HashMap::new(),
            locations: HashMap::new(),
            tips: HashMap::new(),
            branches: BTreeSet::new(),
        }
    }

    /// Id the commit will carry once applied.
    pub fn commit_id(&self) -> CommitId {
        self.commit.id
    }

    // --- Directories ---

    /// Create a directory named `segment` under `parent`.
    pub fn add_directory(&mut self, branch_id: BranchId, parent: DirectoryId, segment: &str) -> Result<DirectoryId> {
        check_segment(segment)?;
        let scope = self.writable_scope(branch_id)?;
        let parent_location = self.require_location(&scope, parent)?;
        if self.segment_taken(&scope, &parent_location, segment, None)? {
            return Err(VaultError::DuplicateName(segment.to_string()));
        }

        let directory_id = self.tx.alloc_directory();
        self.tx.push(Mutation::InsertDirectory(Directory {
            id: directory_id,
            project_id: scope.target().project_id,
        }));
        self.put_location(&scope, directory_id, None, |loc| {
            loc.parent_location_id = Some(parent_location.id);
            loc.segment_name = segment.to_string();
            loc.created_for = Some(CreatedForReason::Create);
        })?;
        Ok(directory_id)
    }

    pub fn delete_directory(&mut self, branch_id: BranchId, directory_id: DirectoryId) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_location(&scope, directory_id)?;
        if current.parent_location_id.is_none() {
            return Err(VaultError::InvalidOperation("cannot delete a root directory".into()));
        }
        self.put_location(&scope, directory_id, Some(current), |loc| {
            loc.deleted = true;
            loc.created_for = Some(CreatedForReason::Delete);
        })
    }

    pub fn rename_directory(&mut self, branch_id: BranchId, directory_id: DirectoryId, segment: &str) -> Result<()> {
        check_segment(segment)?;
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_location(&scope, directory_id)?;
        let parent_id = current
            .parent_location_id
            .ok_or_else(|| VaultError::InvalidOperation("cannot rename a root directory".into()))?;
        let parent = self.location_row(parent_id)?;
        if self.segment_taken(&scope, &parent, segment, Some(directory_id))? {
            return Err(VaultError::DuplicateName(segment.to_string()));
        }
        self.put_location(&scope, directory_id, Some(current), |loc| {
            loc.segment_name = segment.to_string();
            loc.created_for = Some(CreatedForReason::Rename);
        })
    }

    pub fn move_directory(&mut self, branch_id: BranchId, directory_id: DirectoryId, new_parent: DirectoryId) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_location(&scope, directory_id)?;
        if current.parent_location_id.is_none() {
            return Err(VaultError::InvalidOperation("cannot move a root directory".into()));
        }
        let parent_location = self.require_location(&scope, new_parent)?;

        // Refuse to move a directory below itself.
        let mut cursor = Some(parent_location.clone());
        while let Some(loc) = cursor {
            if loc.directory_id == directory_id {
                return Err(VaultError::InvalidOperation(format!(
                    "cannot move directory {} below itself",
                    directory_id
                )));
            }
            cursor = match loc.parent_location_id {
                Some(id) => {
                    let row = self.location_row(id)?;
                    self.current_location(&scope, row.directory_id)?
                }
                None => None,
            };
        }

        if self.segment_taken(&scope, &parent_location, &current.segment_name, Some(directory_id))? {
            return Err(VaultError::DuplicateName(current.segment_name.clone()));
        }
        self.put_location(&scope, directory_id, Some(current), |loc| {
            loc.parent_location_id = Some(parent_location.id);
            loc.created_for = Some(CreatedForReason::Move);
        })
    }

    // --- Files ---

    /// Create a file with its first revision.
    pub fn add_file(&mut self, branch_id: BranchId, directory_id: DirectoryId, name: &str, content: &[u8]) -> Result<FileId> {
        check_segment(name)?;
        let scope = self.writable_scope(branch_id)?;
        self.require_location(&scope, directory_id)?;
        if self.name_taken(&scope, directory_id, name, None)? {
            return Err(VaultError::DuplicateName(name.to_string()));
        }

        let digest = self.content.put(content)?;
        let file_id = self.tx.alloc_file();
        self.tx.push(Mutation::InsertFile(File {
            id: file_id,
            project_id: scope.target().project_id,
        }));
        self.put_name(&scope, file_id, None, |row| {
            row.directory_id = directory_id;
            row.name = name.to_string();
            row.created_for = Some(CreatedForReason::Create);
        })?;
        self.record_revision(&scope, file_id, digest, content.len() as u64)?;
        Ok(file_id)
    }

    /// Record new content for a visible file.
    pub fn add_revision(&mut self, branch_id: BranchId, file_id: FileId, content: &[u8]) -> Result<FileRevision> {
        let scope = self.writable_scope(branch_id)?;
        self.require_name(&scope, file_id)?;
        let digest = self.content.put(content)?;
        self.record_revision(&scope, file_id, digest, content.len() as u64)
    }

    pub fn rename_file(&mut self, branch_id: BranchId, file_id: FileId, new_name: &str) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_name(&scope, file_id)?;
        self.relocate_file(&scope, current, None, Some(new_name), CreatedForReason::Rename)
    }

    pub fn move_file(&mut self, branch_id: BranchId, file_id: FileId, directory_id: DirectoryId) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_name(&scope, file_id)?;
        self.relocate_file(&scope, current, Some(directory_id), None, CreatedForReason::Move)
    }

    pub fn move_and_rename_file(
        &mut self,
        branch_id: BranchId,
        file_id: FileId,
        directory_id: DirectoryId,
        new_name: &str,
    ) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_name(&scope, file_id)?;
        self.relocate_file(
            &scope,
            current,
            Some(directory_id),
            Some(new_name),
            CreatedForReason::MoveAndRename,
        )
    }

    pub fn delete_file(&mut self, branch_id: BranchId, file_id: FileId) -> Result<()> {
        let scope = self.writable_scope(branch_id)?;
        let current = self.require_name(&scope, file_id)?;
        self.put_name(&scope, file_id, Some(current), |row| {
            row.deleted = true;
            row.created_for = Some(CreatedForReason::Delete);
        })?;
        self.carry_tip(&scope, file_id)
    }

    /// Apply everything staged as one transaction.
    pub fn commit(self) -> Result<Commit> {
        let Self {
            tx,
            events,
            commit,
            branches,
            ..
        } = self;

        tx.commit()?;
        info!(commit = %commit.id, user = %commit.user_id, branches = branches.len(), "commit applied");

        events.publish(VaultEvent::CommitApplied {
            commit: commit.id,
            user: commit.user_id,
            branches: branches.into_iter().collect(),
        });
        Ok(commit)
    }

    // --- Private Helpers ---

    fn writable_scope(&mut self, branch_id: BranchId) -> Result<Scope> {
        let scope = Scope::resolve(self.tx.store(), branch_id, None)?;
        let target = scope.target();
        if target.deleted || !target.kind.is_writable() {
            return Err(VaultError::InvalidOperation(format!(
                "branch '{}' is not writable",
                target.name
            )));
        }
        self.branches.insert(branch_id);
        Ok(scope)
    }

    fn current_name(&self, scope: &Scope, file_id: FileId) -> Result<Option<FileName>> {
        if let Some(staged) = self.names.get(&(scope.target().id, file_id)) {
            return Ok(Some(staged.clone()));
        }
        name_winner_in(self.tx.store(), scope, file_id)
    }

    fn require_name(&self, scope: &Scope, file_id: FileId) -> Result<FileName> {
        self.current_name(scope, file_id)?
            .filter(|name| !name.deleted)
            .ok_or_else(|| {
                VaultError::not_found(format!("file {} on branch {}", file_id, scope.target().id))
            })
    }

    fn current_location(&self, scope: &Scope, directory_id: DirectoryId) -> Result<Option<DirectoryLocation>> {
        if let Some(staged) = self.locations.get(&(scope.target().id, directory_id)) {
            return Ok(Some(staged.clone()).filter(|loc| !loc.deleted));
        }
        Ok(location_winner_in(self.tx.store(), scope, directory_id)?.filter(|loc| !loc.deleted))
    }

    fn require_location(&self, scope: &Scope, directory_id: DirectoryId) -> Result<DirectoryLocation> {
        self.current_location(scope, directory_id)?.ok_or_else(|| {
            VaultError::not_found(format!(
                "directory {} on branch {}",
                directory_id,
                scope.target().id
            ))
        })
    }

    /// A location row by id, staged or committed.
    fn location_row(&self, id: DirectoryLocationId) -> Result<DirectoryLocation> {
        if let Some(staged) = self.locations.values().find(|loc| loc.id == id) {
            return Ok(staged.clone());
        }
        self.tx
            .store()
            .directory_location(id)?
            .ok_or_else(|| VaultError::not_found(format!("directory location {}", id)))
    }

    fn segment_taken(
        &self,
        scope: &Scope,
        parent: &DirectoryLocation,
        segment: &str,
        except: Option<DirectoryId>,
    ) -> Result<bool> {
        let branch_id = scope.target().id;
        let mut directories: BTreeSet<DirectoryId> = child_directories_in(self.tx.store(), scope, parent)?
            .into_iter()
            .map(|loc| loc.directory_id)
            .collect();
        directories.extend(
            self.locations
                .iter()
                .filter(|((b, _), _)| *b == branch_id)
                .map(|((_, d), _)| *d),
        );

        for directory_id in directories {
            if Some(directory_id) == except {
                continue;
            }
            let Some(loc) = self.current_location(scope, directory_id)? else {
                continue;
            };
            let same_parent = match loc.parent_location_id {
                Some(p) => p == parent.id || self.location_row(p)?.directory_id == parent.directory_id,
                None => false,
            };
            if same_parent && loc.segment_name == segment {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn name_taken(&self, scope: &Scope, directory_id: DirectoryId, name: &str, except: Option<FileId>) -> Result<bool> {
        let store = self.tx.store();
        let branch_id = scope.target().id;

        let mut files: BTreeSet<FileId> = BTreeSet::new();
        for branch in scope.ancestry() {
            files.extend(
                store
                    .file_names_on_branch(branch.id)?
                    .into_iter()
                    .filter(|n| n.directory_id == directory_id)
                    .map(|n| n.file_id),
            );
        }
        files.extend(
            self.names
                .iter()
                .filter(|((b, _), _)| *b == branch_id)
                .map(|((_, f), _)| *f),
        );

        for file_id in files {
            if Some(file_id) == except {
                continue;
            }
            if let Some(current) = self.current_name(scope, file_id)? {
                if !current.deleted && current.directory_id == directory_id && current.name == name {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn relocate_file(
        &mut self,
        scope: &Scope,
        current: FileName,
        directory_id: Option<DirectoryId>,
        new_name: Option<&str>,
        reason: CreatedForReason,
    ) -> Result<()> {
        let file_id = current.file_id;
        let target_dir = directory_id.unwrap_or(current.directory_id);
        let target_name = new_name.unwrap_or(&current.name).to_string();
        check_segment(&target_name)?;
        if directory_id.is_some() {
            self.require_location(scope, target_dir)?;
        }
        if self.name_taken(scope, target_dir, &target_name, Some(file_id))? {
            return Err(VaultError::DuplicateName(target_name));
        }

        self.put_name(scope, file_id, Some(current), |row| {
            row.directory_id = target_dir;
            row.name = target_name.clone();
            row.created_for = Some(reason);
        })?;
        self.carry_tip(scope, file_id)
    }

    /// Stage a name row for the target branch, reusing the branch's own row
    /// when it has one. `base` supplies the fields the edit leaves alone.
    fn put_name(
        &mut self,
        scope: &Scope,
        file_id: FileId,
        base: Option<FileName>,
        edit: impl FnOnce(&mut FileName),
    ) -> Result<()> {
        let branch_id = scope.target().id;
        let own = match self.names.get(&(branch_id, file_id)) {
            Some(staged) => Some(staged.id),
            None => self
                .tx
                .store()
                .file_name_on_branch(branch_id, file_id)?
                .map(|row| row.id),
        };
        let id = match own {
            Some(id) => id,
            None => self.tx.alloc_file_name(),
        };

        let base = base.unwrap_or(FileName {
            id,
            file_id,
            branch_id,
            directory_id: DirectoryId(0),
            commit_id: self.commit.id,
            name: String::new(),
            deleted: false,
            promoted: false,
            promotion_commit_id: None,
            created_for: None,
        });
        let mut row = FileName {
            id,
            branch_id,
            commit_id: self.commit.id,
            promoted: false,
            promotion_commit_id: None,
            ..base
        };
        edit(&mut row);

        self.tx.push(Mutation::PutFileName(row.clone()));
        self.names.insert((branch_id, file_id), row);
        Ok(())
    }

    fn put_location(
        &mut self,
        scope: &Scope,
        directory_id: DirectoryId,
        base: Option<DirectoryLocation>,
        edit: impl FnOnce(&mut DirectoryLocation),
    ) -> Result<()> {
        let branch_id = scope.target().id;
        let own = match self.locations.get(&(branch_id, directory_id)) {
            Some(staged) => Some(staged.id),
            None => self
                .tx
                .store()
                .directory_location_on_branch(branch_id, directory_id)?
                .map(|row| row.id),
        };
        let id = match own {
            Some(id) => id,
            None => self.tx.alloc_directory_location(),
        };

        let base = base.unwrap_or(DirectoryLocation {
            id,
            directory_id,
            branch_id,
            parent_location_id: None,
            commit_id: self.commit.id,
            segment_name: String::new(),
            deleted: false,
            created_for: None,
        });
        let mut row = DirectoryLocation {
            id,
            branch_id,
            commit_id: self.commit.id,
            ..base
        };
        edit(&mut row);

        self.tx.push(Mutation::PutDirectoryLocation(row.clone()));
        self.locations.insert((branch_id, directory_id), row);
        Ok(())
    }

    fn lineage_tip(&self, scope: &Scope, file_id: FileId) -> Result<Option<FileRevision>> {
        if let Some(staged) = self.tips.get(&(scope.target().id, file_id)) {
            return Ok(Some(staged.clone()));
        }
        lineage_tip_in(self.tx.store(), scope, file_id)
    }

    fn record_revision(
        &mut self,
        scope: &Scope,
        file_id: FileId,
        digest: ContentDigest,
        size: u64,
    ) -> Result<FileRevision> {
        let branch_id = scope.target().id;
        let ancestor = self.lineage_tip(scope, file_id)?;

        let revision = FileRevision {
            id: self.tx.alloc_file_revision(),
            branch_id,
            file_id,
            ancestor_revision_id: ancestor.as_ref().map(|rev| rev.id),
            reverse_delta_revision_id: None,
            commit_id: self.commit.id,
            workfile_edit_date: Timestamp::now(),
            digest,
            size,
            promoted: false,
        };
        self.tx.push(Mutation::InsertFileRevision(revision.clone()));

        if let Some(ancestor) = ancestor {
            if ancestor.branch_id == branch_id && ancestor.reverse_delta_revision_id.is_none() {
                self.tx.push(Mutation::SetReverseDelta {
                    id: ancestor.id,
                    newer: revision.id,
                });
            }
        }

        self.tips.insert((branch_id, file_id), revision.clone());
        Ok(revision)
    }

    /// Record a revision repeating the current content, so that name-only
    /// changes show up as unpromoted work.
    fn carry_tip(&mut self, scope: &Scope, file_id: FileId) -> Result<()> {
        if let Some(tip) = self.lineage_tip(scope, file_id)? {
            self.record_revision(scope, file_id, tip.digest, tip.size)?;
        }
        Ok(())
    }
}
