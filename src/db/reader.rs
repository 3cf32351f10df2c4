//! Read interface over the relations.
//!
//! Resolvers receive a `&S where S: StoreReader` and never hold process-wide
//! state. Each method is one query: implementations backed by a shared
//! store take their lock for the duration of that call only.

use crate::db::tables::Tables;
use crate::error::Result;
use crate::types::{
    Branch, BranchId, Commit, CommitId, Directory, DirectoryId, DirectoryLocation,
    DirectoryLocationHistory, DirectoryLocationId, File, FileId, FileName, FileNameHistory,
    FileRevision, FileRevisionId, Project, ProjectId, ProvisionalDirectoryId,
    ProvisionalDirectoryLocation, Tag, TagId, UserId, VaultStats,
};

/// Per-branch queries against the vault's relations.
pub trait StoreReader: Send + Sync {
    fn project(&self, id: ProjectId) -> Result<Option<Project>>;

    /// Live (not deleted) project by name.
    fn project_by_name(&self, name: &str) -> Result<Option<Project>>;

    fn branch(&self, id: BranchId) -> Result<Option<Branch>>;

    /// Live branch of a project by name.
    fn branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Branch>>;

    /// Live branches of a project.
    fn project_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>>;

    /// Live direct children of a branch, oldest first.
    fn child_branches(&self, parent: BranchId) -> Result<Vec<Branch>>;

    fn commit(&self, id: CommitId) -> Result<Option<Commit>>;

    fn latest_commit_id(&self) -> Result<Option<CommitId>>;

    /// A user's commits, newest first.
    fn commits_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Commit>>;

    fn tag(&self, id: TagId) -> Result<Option<Tag>>;

    /// Tags on a branch, newest first.
    fn tags_on_branch(&self, branch_id: BranchId) -> Result<Vec<Tag>>;

    fn file(&self, id: FileId) -> Result<Option<File>>;

    fn directory(&self, id: DirectoryId) -> Result<Option<Directory>>;

    fn file_revision(&self, id: FileRevisionId) -> Result<Option<FileRevision>>;

    /// Revisions of one file on one branch, newest first.
    fn revisions_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileRevision>>;

    /// Every revision on one branch, newest first.
    fn branch_revisions(&self, branch_id: BranchId) -> Result<Vec<FileRevision>>;

    /// The live name row of a file on one branch.
    fn file_name_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Option<FileName>>;

    /// Every live name row on one branch.
    fn file_names_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileName>>;

    /// Archived name rows on one branch, newest first.
    fn file_name_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileNameHistory>>;

    /// Archived name rows of one file on one branch, newest first.
    fn file_name_history(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileNameHistory>>;

    fn directory_location(&self, id: DirectoryLocationId) -> Result<Option<DirectoryLocation>>;

    /// The live location row of a directory on one branch.
    fn directory_location_on_branch(
        &self,
        branch_id: BranchId,
        directory_id: DirectoryId,
    ) -> Result<Option<DirectoryLocation>>;

    /// Live location rows on one branch whose parent is `parent`.
    fn child_locations_on_branch(
        &self,
        branch_id: BranchId,
        parent: DirectoryLocationId,
    ) -> Result<Vec<DirectoryLocation>>;

    /// Archived location rows on one branch, newest first.
    fn location_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<DirectoryLocationHistory>>;

    fn provisional(&self, id: ProvisionalDirectoryId) -> Result<Option<ProvisionalDirectoryLocation>>;

    fn provisional_for_user(&self, user_id: UserId) -> Result<Vec<ProvisionalDirectoryLocation>>;

    fn stats(&self) -> Result<VaultStats>;
}

impl StoreReader for Tables {
    fn project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(Tables::project(self, id))
    }

    fn project_by_name(&self, name: &str) -> Result<Option<Project>> {
        Ok(Tables::project_by_name(self, name))
    }

    fn branch(&self, id: BranchId) -> Result<Option<Branch>> {
        Ok(Tables::branch(self, id))
    }

    fn branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Branch>> {
        Ok(Tables::branch_by_name(self, project_id, name))
    }

    fn project_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        Ok(Tables::project_branches(self, project_id))
    }

    fn child_branches(&self, parent: BranchId) -> Result<Vec<Branch>> {
        Ok(Tables::child_branches(self, parent))
    }

    fn commit(&self, id: CommitId) -> Result<Option<Commit>> {
        Ok(Tables::commit(self, id))
    }

    fn latest_commit_id(&self) -> Result<Option<CommitId>> {
        Ok(Tables::latest_commit_id(self))
    }

    fn commits_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Commit>> {
        Ok(Tables::commits_by_user(self, user_id, limit))
    }

    fn tag(&self, id: TagId) -> Result<Option<Tag>> {
        Ok(Tables::tag(self, id))
    }

    fn tags_on_branch(&self, branch_id: BranchId) -> Result<Vec<Tag>> {
        Ok(Tables::tags_on_branch(self, branch_id))
    }

    fn file(&self, id: FileId) -> Result<Option<File>> {
        Ok(Tables::file(self, id))
    }

    fn directory(&self, id: DirectoryId) -> Result<Option<Directory>> {
        Ok(Tables::directory(self, id))
    }

    fn file_revision(&self, id: FileRevisionId) -> Result<Option<FileRevision>> {
        Ok(Tables::file_revision(self, id))
    }

    fn revisions_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileRevision>> {
        Ok(Tables::revisions_on_branch(self, branch_id, file_id))
    }

    fn branch_revisions(&self, branch_id: BranchId) -> Result<Vec<FileRevision>> {
        Ok(Tables::branch_revisions(self, branch_id))
    }

    fn file_name_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Option<FileName>> {
        Ok(Tables::file_name_on_branch(self, branch_id, file_id))
    }

    fn file_names_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileName>> {
        Ok(Tables::file_names_on_branch(self, branch_id))
    }

    fn file_name_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileNameHistory>> {
        Ok(Tables::file_name_history_on_branch(self, branch_id))
    }

    fn file_name_history(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileNameHistory>> {
        Ok(Tables::file_name_history(self, branch_id, file_id))
    }

    fn directory_location(&self, id: DirectoryLocationId) -> Result<Option<DirectoryLocation>> {
        Ok(Tables::directory_location(self, id))
    }

    fn directory_location_on_branch(
        &self,
        branch_id: BranchId,
        directory_id: DirectoryId,
    ) -> Result<Option<DirectoryLocation>> {
        Ok(Tables::directory_location_on_branch(self, branch_id, directory_id))
    }

    fn child_locations_on_branch(
        &self,
        branch_id: BranchId,
        parent: DirectoryLocationId,
    ) -> Result<Vec<DirectoryLocation>> {
        Ok(Tables::child_locations_on_branch(self, branch_id, parent))
    }

    fn location_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<DirectoryLocationHistory>> {
        Ok(Tables::location_history_on_branch(self, branch_id))
    }

    fn provisional(&self, id: ProvisionalDirectoryId) -> Result<Option<ProvisionalDirectoryLocation>> {
        Ok(Tables::provisional(self, id))
    }

    fn provisional_for_user(&self, user_id: UserId) -> Result<Vec<ProvisionalDirectoryLocation>> {
        Ok(Tables::provisional_for_user(self, user_id))
    }

    fn stats(&self) -> Result<VaultStats> {
        Ok(Tables::stats(self))
    }
}
