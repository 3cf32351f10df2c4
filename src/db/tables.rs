//! In-memory relations, their secondary indexes, and the mutations that
//! change them.

use crate::types::{
    Branch, BranchId, Commit, CommitId, Directory, DirectoryId, DirectoryLocation,
    DirectoryLocationHistory, DirectoryLocationId, File, FileId, FileName, FileNameHistory,
    FileNameId, FileRevision, FileRevisionId, HistoryId, Project, ProjectId,
    ProvisionalDirectoryId, ProvisionalDirectoryLocation, Tag, TagId, UserId, VaultStats,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Next identifier to hand out for each relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdCounters {
    pub project: u64,
    pub branch: u64,
    pub commit: u64,
    pub tag: u64,
    pub file: u64,
    pub directory: u64,
    pub file_name: u64,
    pub directory_location: u64,
    pub file_revision: u64,
    pub history: u64,
    pub provisional: u64,
}

impl Default for IdCounters {
    fn default() -> Self {
        Self {
            project: 1,
            branch: 1,
            commit: 1,
            tag: 1,
            file: 1,
            directory: 1,
            file_name: 1,
            directory_location: 1,
            file_revision: 1,
            history: 1,
            provisional: 1,
        }
    }
}

fn observe(counter: &mut u64, id: u64) {
    if *counter <= id {
        *counter = id + 1;
    }
}

/// A single row-level change. A transaction is an ordered list of these.
///
/// Applying a mutation never fails: the transaction that produced it
/// validated every reference while staging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Mutation {
    InsertProject(Project),
    InsertBranch(Branch),
    /// Soft delete. The branch keeps its creating commit.
    DeleteBranch {
        id: BranchId,
    },
    InsertCommit(Commit),
    AmendCommitMessage {
        id: CommitId,
        message: String,
    },
    InsertTag(Tag),
    MoveTag {
        id: TagId,
        commit_id: CommitId,
    },
    InsertFile(File),
    InsertDirectory(Directory),
    /// Insert a live name row, or replace it and archive the previous version.
    PutFileName(FileName),
    MarkFileNamePromoted {
        id: FileNameId,
        promotion_commit_id: CommitId,
    },
    /// Insert a live location row, or replace it and archive the previous version.
    PutDirectoryLocation(DirectoryLocation),
    InsertFileRevision(FileRevision),
    SetReverseDelta {
        id: FileRevisionId,
        newer: FileRevisionId,
    },
    MarkRevisionPromoted {
        id: FileRevisionId,
    },
    InsertProvisional(ProvisionalDirectoryLocation),
    DiscardProvisional {
        user_id: UserId,
    },
}

/// Secondary indexes. Not persisted; rebuilt after load.
#[derive(Debug, Default)]
struct Indexes {
    project_names: HashMap<String, ProjectId>,
    child_branches: HashMap<BranchId, BTreeSet<BranchId>>,
    revisions: HashMap<(BranchId, FileId), BTreeSet<FileRevisionId>>,
    branch_revisions: HashMap<BranchId, BTreeSet<FileRevisionId>>,
    live_names: HashMap<(BranchId, FileId), FileNameId>,
    branch_names: HashMap<BranchId, BTreeSet<FileNameId>>,
    name_history: HashMap<BranchId, BTreeSet<HistoryId>>,
    file_name_history: HashMap<(BranchId, FileId), BTreeSet<HistoryId>>,
    live_locations: HashMap<(BranchId, DirectoryId), DirectoryLocationId>,
    child_locations: HashMap<(BranchId, DirectoryLocationId), BTreeSet<DirectoryLocationId>>,
    location_history: HashMap<BranchId, BTreeSet<HistoryId>>,
    tags_by_branch: HashMap<BranchId, BTreeSet<TagId>>,
}

/// Every relation of the vault.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    pub(crate) counters: IdCounters,

    /// Number of transactions applied so far. Used to skip WAL entries a
    /// snapshot already contains.
    pub(crate) applied_txn: u64,

    projects: BTreeMap<ProjectId, Project>,
    branches: BTreeMap<BranchId, Branch>,
    commits: BTreeMap<CommitId, Commit>,
    tags: BTreeMap<TagId, Tag>,
    files: BTreeMap<FileId, File>,
    directories: BTreeMap<DirectoryId, Directory>,
    file_names: BTreeMap<FileNameId, FileName>,
    file_name_history: BTreeMap<HistoryId, FileNameHistory>,
    directory_locations: BTreeMap<DirectoryLocationId, DirectoryLocation>,
    directory_location_history: BTreeMap<HistoryId, DirectoryLocationHistory>,
    file_revisions: BTreeMap<FileRevisionId, FileRevision>,
    provisional: BTreeMap<ProvisionalDirectoryId, ProvisionalDirectoryLocation>,

    #[serde(skip)]
    indexes: Indexes,
}

impl Tables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the secondary indexes from the relations.
    pub(crate) fn rebuild_indexes(&mut self) {
        let mut idx = Indexes::default();

        for project in self.projects.values() {
            if !project.deleted {
                idx.project_names.insert(project.name.clone(), project.id);
            }
        }
        for branch in self.branches.values() {
            if let Some(parent) = branch.parent {
                idx.child_branches.entry(parent).or_default().insert(branch.id);
            }
        }
        for rev in self.file_revisions.values() {
            idx.revisions
                .entry((rev.branch_id, rev.file_id))
                .or_default()
                .insert(rev.id);
            idx.branch_revisions.entry(rev.branch_id).or_default().insert(rev.id);
        }
        for name in self.file_names.values() {
            idx.live_names.insert((name.branch_id, name.file_id), name.id);
            idx.branch_names.entry(name.branch_id).or_default().insert(name.id);
        }
        for hist in self.file_name_history.values() {
            idx.name_history.entry(hist.branch_id).or_default().insert(hist.id);
            idx.file_name_history
                .entry((hist.branch_id, hist.file_id))
                .or_default()
                .insert(hist.id);
        }
        for loc in self.directory_locations.values() {
            idx.live_locations.insert((loc.branch_id, loc.directory_id), loc.id);
            if let Some(parent) = loc.parent_location_id {
                idx.child_locations
                    .entry((loc.branch_id, parent))
                    .or_default()
                    .insert(loc.id);
            }
        }
        for hist in self.directory_location_history.values() {
            idx.location_history
                .entry(hist.location.branch_id)
                .or_default()
                .insert(hist.id);
        }
        for tag in self.tags.values() {
            idx.tags_by_branch.entry(tag.branch_id).or_default().insert(tag.id);
        }

        self.indexes = idx;
    }

    // --- Mutation ---

    /// Apply one transaction's mutations.
    pub(crate) fn apply_all(&mut self, mutations: &[Mutation]) {
        for mutation in mutations {
            self.apply(mutation.clone());
        }
        self.applied_txn += 1;
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::InsertProject(project) => {
                observe(&mut self.counters.project, project.id.0);
                self.indexes
                    .project_names
                    .insert(project.name.clone(), project.id);
                self.projects.insert(project.id, project);
            }
            Mutation::InsertBranch(branch) => {
                observe(&mut self.counters.branch, branch.id.0);
                if let Some(parent) = branch.parent {
                    self.indexes
                        .child_branches
                        .entry(parent)
                        .or_default()
                        .insert(branch.id);
                }
                self.branches.insert(branch.id, branch);
            }
            Mutation::DeleteBranch { id } => {
                if let Some(branch) = self.branches.get_mut(&id) {
                    branch.deleted = true;
                }
            }
            Mutation::InsertCommit(commit) => {
                observe(&mut self.counters.commit, commit.id.0);
                self.commits.insert(commit.id, commit);
            }
            Mutation::AmendCommitMessage { id, message } => {
                if let Some(commit) = self.commits.get_mut(&id) {
                    commit.message = message;
                }
            }
            Mutation::InsertTag(tag) => {
                observe(&mut self.counters.tag, tag.id.0);
                self.indexes
                    .tags_by_branch
                    .entry(tag.branch_id)
                    .or_default()
                    .insert(tag.id);
                self.tags.insert(tag.id, tag);
            }
            Mutation::MoveTag { id, commit_id } => {
                if let Some(tag) = self.tags.get_mut(&id) {
                    tag.commit_id = commit_id;
                }
            }
            Mutation::InsertFile(file) => {
                observe(&mut self.counters.file, file.id.0);
                self.files.insert(file.id, file);
            }
            Mutation::InsertDirectory(directory) => {
                observe(&mut self.counters.directory, directory.id.0);
                self.directories.insert(directory.id, directory);
            }
            Mutation::PutFileName(row) => self.put_file_name(row),
            Mutation::MarkFileNamePromoted {
                id,
                promotion_commit_id,
            } => {
                if let Some(row) = self.file_names.get_mut(&id) {
                    row.promoted = true;
                    row.promotion_commit_id = Some(promotion_commit_id);
                }
            }
            Mutation::PutDirectoryLocation(row) => self.put_directory_location(row),
            Mutation::InsertFileRevision(rev) => {
                observe(&mut self.counters.file_revision, rev.id.0);
                self.indexes
                    .revisions
                    .entry((rev.branch_id, rev.file_id))
                    .or_default()
                    .insert(rev.id);
                self.indexes
                    .branch_revisions
                    .entry(rev.branch_id)
                    .or_default()
                    .insert(rev.id);
                self.file_revisions.insert(rev.id, rev);
            }
            Mutation::SetReverseDelta { id, newer } => {
                if let Some(rev) = self.file_revisions.get_mut(&id) {
                    rev.reverse_delta_revision_id = Some(newer);
                }
            }
            Mutation::MarkRevisionPromoted { id } => {
                if let Some(rev) = self.file_revisions.get_mut(&id) {
                    rev.promoted = true;
                }
            }
            Mutation::InsertProvisional(row) => {
                observe(&mut self.counters.provisional, row.id.0);
                self.provisional.insert(row.id, row);
            }
            Mutation::DiscardProvisional { user_id } => {
                self.provisional.retain(|_, row| row.user_id != user_id);
            }
        }
    }

    fn next_history_id(&mut self) -> HistoryId {
        let id = HistoryId(self.counters.history);
        self.counters.history += 1;
        id
    }

    fn put_file_name(&mut self, row: FileName) {
        observe(&mut self.counters.file_name, row.id.0);

        if let Some(previous) = self.file_names.get(&row.id).cloned() {
            let history_id = self.next_history_id();
            self.indexes
                .name_history
                .entry(previous.branch_id)
                .or_default()
                .insert(history_id);
            self.indexes
                .file_name_history
                .entry((previous.branch_id, previous.file_id))
                .or_default()
                .insert(history_id);
            self.file_name_history
                .insert(history_id, FileNameHistory::archive(history_id, &previous));

            if previous.branch_id != row.branch_id {
                self.indexes
                    .live_names
                    .remove(&(previous.branch_id, previous.file_id));
                if let Some(set) = self.indexes.branch_names.get_mut(&previous.branch_id) {
                    set.remove(&previous.id);
                }
            }
        }

        self.indexes
            .live_names
            .insert((row.branch_id, row.file_id), row.id);
        self.indexes
            .branch_names
            .entry(row.branch_id)
            .or_default()
            .insert(row.id);
        self.file_names.insert(row.id, row);
    }

    fn put_directory_location(&mut self, row: DirectoryLocation) {
        observe(&mut self.counters.directory_location, row.id.0);

        if let Some(previous) = self.directory_locations.get(&row.id).cloned() {
            let history_id = self.next_history_id();
            self.indexes
                .location_history
                .entry(previous.branch_id)
                .or_default()
                .insert(history_id);
            self.directory_location_history.insert(
                history_id,
                DirectoryLocationHistory {
                    id: history_id,
                    location: previous.clone(),
                },
            );

            if previous.branch_id != row.branch_id {
                self.indexes
                    .live_locations
                    .remove(&(previous.branch_id, previous.directory_id));
            }
            if let Some(parent) = previous.parent_location_id {
                if let Some(set) = self
                    .indexes
                    .child_locations
                    .get_mut(&(previous.branch_id, parent))
                {
                    set.remove(&previous.id);
                }
            }
        }

        self.indexes
            .live_locations
            .insert((row.branch_id, row.directory_id), row.id);
        if let Some(parent) = row.parent_location_id {
            self.indexes
                .child_locations
                .entry((row.branch_id, parent))
                .or_default()
                .insert(row.id);
        }
        self.directory_locations.insert(row.id, row);
    }

    // --- Queries ---

    pub(crate) fn project(&self, id: ProjectId) -> Option<Project> {
        self.projects.get(&id).cloned()
    }

    pub(crate) fn project_by_name(&self, name: &str) -> Option<Project> {
        let id = self.indexes.project_names.get(name)?;
        self.projects.get(id).filter(|p| !p.deleted).cloned()
    }

    pub(crate) fn branch(&self, id: BranchId) -> Option<Branch> {
        self.branches.get(&id).cloned()
    }

    pub(crate) fn project_branches(&self, project_id: ProjectId) -> Vec<Branch> {
        self.branches
            .values()
            .filter(|b| b.project_id == project_id && !b.deleted)
            .cloned()
            .collect()
    }

    pub(crate) fn branch_by_name(&self, project_id: ProjectId, name: &str) -> Option<Branch> {
        self.branches
            .values()
            .find(|b| b.project_id == project_id && !b.deleted && b.name == name)
            .cloned()
    }

    pub(crate) fn child_branches(&self, parent: BranchId) -> Vec<Branch> {
        self.indexes
            .child_branches
            .get(&parent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.branches.get(id))
                    .filter(|b| !b.deleted)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn commit(&self, id: CommitId) -> Option<Commit> {
        self.commits.get(&id).cloned()
    }

    pub(crate) fn latest_commit_id(&self) -> Option<CommitId> {
        self.commits.keys().next_back().copied()
    }

    pub(crate) fn commits_by_user(&self, user_id: UserId, limit: usize) -> Vec<Commit> {
        self.commits
            .values()
            .rev()
            .filter(|c| c.user_id == user_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn tag(&self, id: TagId) -> Option<Tag> {
        self.tags.get(&id).cloned()
    }

    pub(crate) fn tags_on_branch(&self, branch_id: BranchId) -> Vec<Tag> {
        self.indexes
            .tags_by_branch
            .get(&branch_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.tags.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn file(&self, id: FileId) -> Option<File> {
        self.files.get(&id).cloned()
    }

    pub(crate) fn directory(&self, id: DirectoryId) -> Option<Directory> {
        self.directories.get(&id).cloned()
    }

    pub(crate) fn file_revision(&self, id: FileRevisionId) -> Option<FileRevision> {
        self.file_revisions.get(&id).cloned()
    }

    /// Revisions of a file on one branch, newest first.
    pub(crate) fn revisions_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Vec<FileRevision> {
        self.indexes
            .revisions
            .get(&(branch_id, file_id))
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.file_revisions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every revision on one branch, newest first.
    pub(crate) fn branch_revisions(&self, branch_id: BranchId) -> Vec<FileRevision> {
        self.indexes
            .branch_revisions
            .get(&branch_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.file_revisions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn file_name_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Option<FileName> {
        let id = self.indexes.live_names.get(&(branch_id, file_id))?;
        self.file_names.get(id).cloned()
    }

    pub(crate) fn file_names_on_branch(&self, branch_id: BranchId) -> Vec<FileName> {
        self.indexes
            .branch_names
            .get(&branch_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.file_names.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Archived name rows recorded on one branch, newest first.
    pub(crate) fn file_name_history_on_branch(&self, branch_id: BranchId) -> Vec<FileNameHistory> {
        self.indexes
            .name_history
            .get(&branch_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.file_name_history.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Archived name rows of one file on one branch, newest first.
    pub(crate) fn file_name_history(&self, branch_id: BranchId, file_id: FileId) -> Vec<FileNameHistory> {
        self.indexes
            .file_name_history
            .get(&(branch_id, file_id))
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.file_name_history.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn directory_location(&self, id: DirectoryLocationId) -> Option<DirectoryLocation> {
        self.directory_locations.get(&id).cloned()
    }

    pub(crate) fn directory_location_on_branch(
        &self,
        branch_id: BranchId,
        directory_id: DirectoryId,
    ) -> Option<DirectoryLocation> {
        let id = self.indexes.live_locations.get(&(branch_id, directory_id))?;
        self.directory_locations.get(id).cloned()
    }

    pub(crate) fn child_locations_on_branch(
        &self,
        branch_id: BranchId,
        parent: DirectoryLocationId,
    ) -> Vec<DirectoryLocation> {
        self.indexes
            .child_locations
            .get(&(branch_id, parent))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.directory_locations.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Archived location rows recorded on one branch, newest first.
    pub(crate) fn location_history_on_branch(&self, branch_id: BranchId) -> Vec<DirectoryLocationHistory> {
        self.indexes
            .location_history
            .get(&branch_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| self.directory_location_history.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn provisional(&self, id: ProvisionalDirectoryId) -> Option<ProvisionalDirectoryLocation> {
        self.provisional.get(&id).cloned()
    }

    pub(crate) fn provisional_for_user(&self, user_id: UserId) -> Vec<ProvisionalDirectoryLocation> {
        self.provisional
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect()
    }

    pub(crate) fn stats(&self) -> VaultStats {
        VaultStats {
            project_count: self.projects.len() as u64,
            branch_count: self.branches.len() as u64,
            commit_count: self.commits.len() as u64,
            tag_count: self.tags.len() as u64,
            file_count: self.files.len() as u64,
            directory_count: self.directories.len() as u64,
            file_name_count: self.file_names.len() as u64,
            file_name_history_count: self.file_name_history.len() as u64,
            directory_location_count: self.directory_locations.len() as u64,
            directory_location_history_count: self.directory_location_history.len() as u64,
            file_revision_count: self.file_revisions.len() as u64,
            provisional_directory_count: self.provisional.len() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchKind, ContentDigest, Timestamp};

    fn name_row(id: u64, branch: u64, name: &str, commit: u64) -> FileName {
        FileName {
            id: FileNameId(id),
            file_id: FileId(1),
            branch_id: BranchId(branch),
            directory_id: DirectoryId(1),
            commit_id: CommitId(commit),
            name: name.to_string(),
            deleted: false,
            promoted: false,
            promotion_commit_id: None,
            created_for: None,
        }
    }

    #[test]
    fn test_put_file_name_archives_previous() {
        let mut tables = Tables::new();
        tables.apply_all(&[Mutation::PutFileName(name_row(1, 1, "a.txt", 2))]);
        tables.apply_all(&[Mutation::PutFileName(name_row(1, 1, "b.txt", 5))]);

        let live = tables.file_name_on_branch(BranchId(1), FileId(1)).unwrap();
        assert_eq!(live.name, "b.txt");

        let history = tables.file_name_history_on_branch(BranchId(1));
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].name, "a.txt");
        assert_eq!(history[0].commit_id, CommitId(2));
        assert_eq!(tables.applied_txn, 2);
    }

    #[test]
    fn test_file_name_history_is_per_file() {
        let mut tables = Tables::new();
        let other = FileName {
            id: FileNameId(2),
            file_id: FileId(2),
            ..name_row(2, 1, "other.txt", 3)
        };
        tables.apply_all(&[
            Mutation::PutFileName(name_row(1, 1, "a.txt", 2)),
            Mutation::PutFileName(other.clone()),
        ]);
        tables.apply_all(&[
            Mutation::PutFileName(name_row(1, 1, "b.txt", 5)),
            Mutation::PutFileName(FileName {
                name: "renamed.txt".into(),
                commit_id: CommitId(6),
                ..other
            }),
        ]);
        tables.apply_all(&[Mutation::PutFileName(name_row(1, 1, "c.txt", 7))]);

        let names: Vec<String> = tables
            .file_name_history(BranchId(1), FileId(1))
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["b.txt", "a.txt"]);
        assert_eq!(tables.file_name_history(BranchId(1), FileId(2)).len(), 1);
        assert_eq!(tables.file_name_history_on_branch(BranchId(1)).len(), 3);

        tables.rebuild_indexes();
        assert_eq!(tables.file_name_history(BranchId(1), FileId(1)).len(), 2);
    }

    #[test]
    fn test_counters_follow_inserts() {
        let mut tables = Tables::new();
        tables.apply_all(&[Mutation::InsertBranch(Branch {
            id: BranchId(7),
            parent: None,
            project_id: ProjectId(1),
            name: "trunk".into(),
            kind: BranchKind::Trunk,
            tag_id: None,
            root_directory_id: DirectoryId(1),
            commit_id: CommitId(1),
            deleted: false,
        })]);
        assert_eq!(tables.counters.branch, 8);
    }

    #[test]
    fn test_delete_branch_keeps_creating_commit() {
        let mut tables = Tables::new();
        tables.apply_all(&[Mutation::InsertBranch(Branch {
            id: BranchId(2),
            parent: Some(BranchId(1)),
            project_id: ProjectId(1),
            name: "release".into(),
            kind: BranchKind::Release,
            tag_id: None,
            root_directory_id: DirectoryId(1),
            commit_id: CommitId(3),
            deleted: false,
        })]);
        tables.apply_all(&[Mutation::DeleteBranch { id: BranchId(2) }]);

        let branch = tables.branch(BranchId(2)).unwrap();
        assert!(branch.deleted);
        assert_eq!(branch.commit_id, CommitId(3));
    }

    #[test]
    fn test_revisions_newest_first() {
        let mut tables = Tables::new();
        for id in [3u64, 1, 2] {
            tables.apply_all(&[Mutation::InsertFileRevision(FileRevision {
                id: FileRevisionId(id),
                branch_id: BranchId(1),
                file_id: FileId(1),
                ancestor_revision_id: None,
                reverse_delta_revision_id: None,
                commit_id: CommitId(id),
                workfile_edit_date: Timestamp(0),
                digest: ContentDigest::from_bytes(b"x"),
                size: 1,
                promoted: false,
            })]);
        }

        let ids: Vec<u64> = tables
            .revisions_on_branch(BranchId(1), FileId(1))
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn test_rebuild_indexes_after_roundtrip() {
        let mut tables = Tables::new();
        tables.apply_all(&[Mutation::PutFileName(name_row(1, 1, "a.txt", 2))]);

        let bytes = rmp_serde::to_vec(&tables).unwrap();
        let mut loaded: Tables = rmp_serde::from_slice(&bytes).unwrap();
        assert!(loaded.file_name_on_branch(BranchId(1), FileId(1)).is_none());

        loaded.rebuild_indexes();
        assert!(loaded.file_name_on_branch(BranchId(1), FileId(1)).is_some());
    }
}
