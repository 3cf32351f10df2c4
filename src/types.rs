//! Core types for the vault.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Unique identifier for a project.
    ProjectId
);
row_id!(
    /// Unique identifier for a branch.
    BranchId
);
row_id!(
    /// Unique identifier for a tag.
    TagId
);
row_id!(
    /// Stable identity of a versioned file, independent of its name.
    FileId
);
row_id!(
    /// Stable identity of a directory, independent of its name.
    DirectoryId
);
row_id!(
    /// Identifier of a live file name row.
    FileNameId
);
row_id!(
    /// Identifier of a live directory location row.
    DirectoryLocationId
);
row_id!(
    /// Identifier of a file revision.
    FileRevisionId
);
row_id!(
    /// Identifier of an archived (history) row.
    HistoryId
);
row_id!(
    /// Identifier of a provisional directory location.
    ProvisionalDirectoryId
);
row_id!(
    /// Identifier of a user.
    UserId
);

/// Commit identifier. Commit ids increase monotonically and double as the
/// vault's logical clock.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommitId(pub u64);

impl CommitId {
    pub fn next(self) -> Self {
        CommitId(self.0 + 1)
    }

    pub fn prev(self) -> Option<Self> {
        if self.0 > 0 {
            Some(CommitId(self.0 - 1))
        } else {
            None
        }
    }
}

impl fmt::Debug for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commit({})", self.0)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content digest for revision payloads (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    /// Compute digest from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(ContentDigest(arr))
    }

    /// First byte of the digest as hex, used to shard content files.
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.0[0..1])
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. A clock set before the epoch reads as zero.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Kind of a branch. Drives which visibility rules apply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    /// The project root. Exactly one per project.
    Trunk,
    /// Writable branch whose work is promoted back onto its parent.
    Feature,
    /// Read-only branch frozen at its creating commit (own edits allowed).
    Release,
    /// Read-only snapshot frozen at a tag's commit.
    TagAnchored,
}

impl BranchKind {
    /// Whether commits may land on this kind of branch.
    pub fn is_writable(self) -> bool {
        matches!(self, BranchKind::Trunk | BranchKind::Feature | BranchKind::Release)
    }
}

/// Why a name or location row was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreatedForReason {
    Create,
    Rename,
    Move,
    MoveAndRename,
    Delete,
    Promotion,
}

/// Named root container for a branch tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub commit_id: CommitId,
    pub deleted: bool,
}

/// A node in a project's branch tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    /// Unique identifier (assigned by the vault).
    pub id: BranchId,

    /// Parent branch; `None` only for the trunk.
    pub parent: Option<BranchId>,

    /// Owning project.
    pub project_id: ProjectId,

    /// Branch name, unique among a project's live branches.
    pub name: String,

    /// Branch kind.
    pub kind: BranchKind,

    /// Anchoring tag (tag-anchored branches only).
    pub tag_id: Option<TagId>,

    /// Root directory shared by every branch of the project.
    pub root_directory_id: DirectoryId,

    /// Commit that created (or deleted) the branch.
    pub commit_id: CommitId,

    /// Soft deletion flag.
    pub deleted: bool,
}

/// An atomically applied unit of change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub user_id: UserId,
    pub timestamp: Timestamp,
    pub message: String,
}

/// A named pointer to a commit on a branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub branch_id: BranchId,
    pub commit_id: CommitId,
    pub moveable: bool,
    pub text: String,
    pub description: String,
}

/// Stable identity of a versioned file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub id: FileId,
    pub project_id: ProjectId,
}

/// Stable identity of a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directory {
    pub id: DirectoryId,
    pub project_id: ProjectId,
}

/// Name and placement of a file as observed on one branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileName {
    pub id: FileNameId,
    pub file_id: FileId,
    pub branch_id: BranchId,
    pub directory_id: DirectoryId,

    /// Commit at which this name took effect.
    pub commit_id: CommitId,

    pub name: String,
    pub deleted: bool,
    pub promoted: bool,

    /// Commit that promoted this row onto the parent branch.
    pub promotion_commit_id: Option<CommitId>,

    pub created_for: Option<CreatedForReason>,
}

/// A superseded file name row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNameHistory {
    pub id: HistoryId,
    /// Live row this snapshot was archived from.
    pub file_name_id: FileNameId,
    pub file_id: FileId,
    pub branch_id: BranchId,
    pub directory_id: DirectoryId,
    pub commit_id: CommitId,
    pub name: String,
    pub deleted: bool,
    pub created_for: Option<CreatedForReason>,
}

impl FileNameHistory {
    pub(crate) fn archive(id: HistoryId, row: &FileName) -> Self {
        Self {
            id,
            file_name_id: row.id,
            file_id: row.file_id,
            branch_id: row.branch_id,
            directory_id: row.directory_id,
            commit_id: row.commit_id,
            name: row.name.clone(),
            deleted: row.deleted,
            created_for: row.created_for,
        }
    }

    /// View this archived row as the name it recorded.
    pub fn to_file_name(&self) -> FileName {
        FileName {
            id: self.file_name_id,
            file_id: self.file_id,
            branch_id: self.branch_id,
            directory_id: self.directory_id,
            commit_id: self.commit_id,
            name: self.name.clone(),
            deleted: self.deleted,
            promoted: false,
            promotion_commit_id: None,
            created_for: self.created_for,
        }
    }
}

/// Name and parent of a directory as observed on one branch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryLocation {
    pub id: DirectoryLocationId,
    pub directory_id: DirectoryId,
    pub branch_id: BranchId,

    /// Parent location; `None` for a project root.
    pub parent_location_id: Option<DirectoryLocationId>,

    pub commit_id: CommitId,
    pub segment_name: String,
    pub deleted: bool,
    pub created_for: Option<CreatedForReason>,
}

/// A superseded directory location row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryLocationHistory {
    pub id: HistoryId,
    pub location: DirectoryLocation,
}

/// One immutable content snapshot of a file on a branch.
///
/// The payload itself lives in the content store, addressed by `digest`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRevision {
    pub id: FileRevisionId,
    pub branch_id: BranchId,
    pub file_id: FileId,

    /// Previous revision of the lineage this revision was built from.
    pub ancestor_revision_id: Option<FileRevisionId>,

    /// Newer revision of the same lineage that supersedes this one.
    pub reverse_delta_revision_id: Option<FileRevisionId>,

    pub commit_id: CommitId,
    pub workfile_edit_date: Timestamp,
    pub digest: ContentDigest,
    pub size: u64,
    pub promoted: bool,
}

/// User-scoped placeholder for a directory that has not been committed yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionalDirectoryLocation {
    pub id: ProvisionalDirectoryId,
    pub user_id: UserId,
    pub branch_id: BranchId,

    /// Committed parent, when the parent already exists.
    pub parent_location_id: Option<DirectoryLocationId>,

    /// Provisional parent, when the parent is itself provisional.
    pub provisional_parent_id: Option<ProvisionalDirectoryId>,

    pub segment_name: String,
    pub appended_path: String,
}

/// Resolved ids for a (project, branch, path) coordinate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryCoordinateIds {
    pub project_id: ProjectId,
    pub branch_id: BranchId,
    pub directory_id: DirectoryId,
    pub directory_location_id: DirectoryLocationId,

    /// The branch itself plus every feature branch descending from it.
    pub writable_branches: std::collections::BTreeMap<BranchId, String>,
}

/// Newest visible revision of a file together with the visible count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TipRevision {
    pub revision: FileRevision,
    pub revision_count: usize,
}

/// One file as it appears in a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub file_id: FileId,
    pub file_name: FileName,
    pub tip: FileRevision,
    pub revision_count: usize,
}

/// Vault statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStats {
    pub project_count: u64,
    pub branch_count: u64,
    pub commit_count: u64,
    pub tag_count: u64,
    pub file_count: u64,
    pub directory_count: u64,
    pub file_name_count: u64,
    pub file_name_history_count: u64,
    pub directory_location_count: u64,
    pub directory_location_history_count: u64,
    pub file_revision_count: u64,
    pub provisional_directory_count: u64,
}
