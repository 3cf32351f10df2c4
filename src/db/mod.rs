//! Transactional relational store backing the vault.
//!
//! Relations live in memory behind a read/write lock. Writers are
//! serialized by a separate mutex, stage their mutations without blocking
//! readers, and apply them in one step under the write lock, so a reader
//! observes either all of a transaction or none of it.

mod reader;
mod tables;
mod transaction;

pub use reader::StoreReader;
pub use tables::{IdCounters, Mutation, Tables};
pub use transaction::Transaction;

use crate::error::{Result, VaultError};
use crate::types::{
    Branch, BranchId, Commit, CommitId, Directory, DirectoryId, DirectoryLocation,
    DirectoryLocationHistory, DirectoryLocationId, File, FileId, FileName, FileNameHistory,
    FileRevision, FileRevisionId, Project, ProjectId, ProvisionalDirectoryId,
    ProvisionalDirectoryLocation, Tag, TagId, UserId, VaultStats,
};
use crate::wal::{WalOperation, WriteAheadLog};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::fs::{self, File as FsFile};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};
use tracing::{debug, info, warn};

/// Magic bytes for the table snapshot.
const SNAPSHOT_MAGIC: &[u8; 4] = b"BVT\0";

/// Current snapshot format version.
const SNAPSHOT_VERSION: u8 = 1;

/// Magic, version, length prefix and checksum around the snapshot payload.
const SNAPSHOT_FRAME_LEN: u64 = 4 + 1 + 8 + 4;

/// Snapshot file name inside the vault directory.
pub const SNAPSHOT_FILE: &str = "tables.bin";

/// WAL file name inside the vault directory.
pub const WAL_FILE: &str = "vault.wal";

/// The store handle threaded through every resolver.
pub struct Database {
    tables: RwLock<Tables>,

    /// Serializes writers. Held for the lifetime of a `Transaction`.
    writer: Mutex<()>,

    /// Thread holding `writer`, so a second write on that thread fails
    /// instead of waiting on itself.
    writer_thread: Mutex<Option<ThreadId>>,

    wal: Option<WriteAheadLog>,

    snapshot_path: Option<PathBuf>,

    available: AtomicBool,

    /// Transactions between automatic checkpoints (0 disables them).
    checkpoint_interval: usize,

    since_checkpoint: AtomicUsize,
}

impl Database {
    /// A volatile store with no snapshot or WAL.
    pub fn in_memory() -> Self {
        Self {
            tables: RwLock::new(Tables::new()),
            writer: Mutex::new(()),
            writer_thread: Mutex::new(None),
            wal: None,
            snapshot_path: None,
            available: AtomicBool::new(true),
            checkpoint_interval: 0,
            since_checkpoint: AtomicUsize::new(0),
        }
    }

    /// Open a durable store in `dir`, replaying committed WAL transactions
    /// on top of the last snapshot.
    pub fn open(dir: impl AsRef<Path>, checkpoint_interval: usize) -> Result<Self> {
        let dir = dir.as_ref();
        let snapshot_path = dir.join(SNAPSHOT_FILE);

        let mut tables = if snapshot_path.exists() {
            Self::load_snapshot(&snapshot_path)?
        } else {
            Tables::new()
        };
        tables.rebuild_indexes();

        let wal = WriteAheadLog::open(dir.join(WAL_FILE))?;
        let replayed = Self::replay(&mut tables, &wal)?;

        let db = Self {
            tables: RwLock::new(tables),
            writer: Mutex::new(()),
            writer_thread: Mutex::new(None),
            wal: Some(wal),
            snapshot_path: Some(snapshot_path),
            available: AtomicBool::new(true),
            checkpoint_interval,
            since_checkpoint: AtomicUsize::new(0),
        };

        if replayed > 0 {
            info!(replayed, "replayed committed transactions from WAL");
            db.checkpoint()?;
        }

        Ok(db)
    }

    fn replay(tables: &mut Tables, wal: &WriteAheadLog) -> Result<usize> {
        for entry in wal.pending_entries()? {
            warn!(seq = entry.seq, "discarding uncommitted WAL transaction");
        }

        let mut replayed = 0;
        for entry in wal.committed_entries()? {
            if let WalOperation::Transaction { txn, mutations } = entry.operation {
                if txn <= tables.applied_txn {
                    continue;
                }
                tables.apply_all(&mutations);
                tables.applied_txn = txn;
                replayed += 1;
            }
        }
        Ok(replayed)
    }

    /// Start a write transaction. Blocks while another thread's transaction
    /// is open.
    ///
    /// Fails with [`VaultError::InvalidOperation`] when the calling thread
    /// already holds an open transaction.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        self.ensure_available()?;
        self.ensure_not_writing()?;
        let guard = self.writer.lock();
        *self.writer_thread.lock() = Some(thread::current().id());
        let counters = self.tables.read().counters;
        Ok(Transaction::new(self, guard, counters))
    }

    fn ensure_not_writing(&self) -> Result<()> {
        if *self.writer_thread.lock() == Some(thread::current().id()) {
            return Err(VaultError::InvalidOperation(
                "a write transaction is already open on this thread".into(),
            ));
        }
        Ok(())
    }

    /// Called by `Transaction` just before it releases the writer lock.
    pub(crate) fn release_writer(&self) {
        *self.writer_thread.lock() = None;
    }

    /// A consistent read view across several queries.
    ///
    /// Holding the view delays writers from applying; keep it short.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.ensure_available()?;
        Ok(self.tables.read())
    }

    /// Make the store unavailable. Every later query fails.
    pub fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(VaultError::StoreUnavailable("store is closed".into()))
        }
    }

    /// Log and apply one transaction. The caller holds the writer mutex.
    pub(crate) fn apply_transaction(&self, mutations: Vec<Mutation>) -> Result<()> {
        self.ensure_available()?;

        let txn = self.tables.read().applied_txn + 1;
        let operation = WalOperation::Transaction {
            txn,
            mutations: mutations.clone(),
        };

        if let Some(wal) = &self.wal {
            let seq = wal.log(operation)?;
            wal.commit(seq)?;
        }

        {
            let mut tables = self.tables.write();
            tables.apply_all(&mutations);
            tables.applied_txn = txn;
        }
        debug!(txn, mutations = mutations.len(), "applied transaction");

        // The transaction is committed from here on. A failed checkpoint
        // leaves the WAL intact and is retried after the next transaction.
        let since = self.since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if self.checkpoint_interval > 0 && since >= self.checkpoint_interval {
            if let Err(err) = self.write_checkpoint() {
                warn!(txn, error = %err, "automatic checkpoint failed");
            }
        }
        Ok(())
    }

    /// Save a snapshot and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        self.ensure_not_writing()?;
        let _writer = self.writer.lock();
        self.write_checkpoint()
    }

    fn write_checkpoint(&self) -> Result<()> {
        let (Some(path), Some(wal)) = (&self.snapshot_path, &self.wal) else {
            return Ok(());
        };

        {
            let tables = self.tables.read();
            Self::save_snapshot(path, &tables)?;
        }
        wal.clear()?;
        self.since_checkpoint.store(0, Ordering::SeqCst);
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    fn save_snapshot(path: &Path, tables: &Tables) -> Result<()> {
        let payload = rmp_serde::to_vec(tables)?;
        let tmp_path = path.with_extension("tmp");

        {
            let mut file = FsFile::create(&tmp_path)?;
            file.write_all(SNAPSHOT_MAGIC)?;
            file.write_all(&[SNAPSHOT_VERSION])?;
            file.write_all(&(payload.len() as u64).to_le_bytes())?;
            file.write_all(&payload)?;
            file.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;
        Ok(())
    }

    fn load_snapshot(path: &Path) -> Result<Tables> {
        let mut file = FsFile::open(path)?;
        let file_len = file.metadata()?.len();

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(VaultError::InvalidFormat("Invalid snapshot magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != SNAPSHOT_VERSION {
            return Err(VaultError::InvalidFormat(format!(
                "Unsupported snapshot version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes);
        if len > file_len.saturating_sub(SNAPSHOT_FRAME_LEN) {
            return Err(VaultError::Corruption(format!(
                "snapshot length {} exceeds file size {}",
                len, file_len
            )));
        }

        let mut payload = vec![0u8; len as usize];
        file.read_exact(&mut payload)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let expected = u32::from_le_bytes(checksum_bytes);
        let got = crc32fast::hash(&payload);
        if expected != got {
            return Err(VaultError::Corruption(format!(
                "snapshot checksum mismatch: expected {}, got {}",
                expected, got
            )));
        }

        Ok(rmp_serde::from_slice(&payload)?)
    }
}

impl StoreReader for Database {
    fn project(&self, id: ProjectId) -> Result<Option<Project>> {
        Ok(self.read()?.project(id))
    }

    fn project_by_name(&self, name: &str) -> Result<Option<Project>> {
        Ok(self.read()?.project_by_name(name))
    }

    fn branch(&self, id: BranchId) -> Result<Option<Branch>> {
        Ok(self.read()?.branch(id))
    }

    fn branch_by_name(&self, project_id: ProjectId, name: &str) -> Result<Option<Branch>> {
        Ok(self.read()?.branch_by_name(project_id, name))
    }

    fn project_branches(&self, project_id: ProjectId) -> Result<Vec<Branch>> {
        Ok(self.read()?.project_branches(project_id))
    }

    fn child_branches(&self, parent: BranchId) -> Result<Vec<Branch>> {
        Ok(self.read()?.child_branches(parent))
    }

    fn commit(&self, id: CommitId) -> Result<Option<Commit>> {
        Ok(self.read()?.commit(id))
    }

    fn latest_commit_id(&self) -> Result<Option<CommitId>> {
        Ok(self.read()?.latest_commit_id())
    }

    fn commits_by_user(&self, user_id: UserId, limit: usize) -> Result<Vec<Commit>> {
        Ok(self.read()?.commits_by_user(user_id, limit))
    }

    fn tag(&self, id: TagId) -> Result<Option<Tag>> {
        Ok(self.read()?.tag(id))
    }

    fn tags_on_branch(&self, branch_id: BranchId) -> Result<Vec<Tag>> {
        Ok(self.read()?.tags_on_branch(branch_id))
    }

    fn file(&self, id: FileId) -> Result<Option<File>> {
        Ok(self.read()?.file(id))
    }

    fn directory(&self, id: DirectoryId) -> Result<Option<Directory>> {
        Ok(self.read()?.directory(id))
    }

    fn file_revision(&self, id: FileRevisionId) -> Result<Option<FileRevision>> {
        Ok(self.read()?.file_revision(id))
    }

    fn revisions_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileRevision>> {
        Ok(self.read()?.revisions_on_branch(branch_id, file_id))
    }

    fn branch_revisions(&self, branch_id: BranchId) -> Result<Vec<FileRevision>> {
        Ok(self.read()?.branch_revisions(branch_id))
    }

    fn file_name_on_branch(&self, branch_id: BranchId, file_id: FileId) -> Result<Option<FileName>> {
        Ok(self.read()?.file_name_on_branch(branch_id, file_id))
    }

    fn file_names_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileName>> {
        Ok(self.read()?.file_names_on_branch(branch_id))
    }

    fn file_name_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<FileNameHistory>> {
        Ok(self.read()?.file_name_history_on_branch(branch_id))
    }

    fn file_name_history(&self, branch_id: BranchId, file_id: FileId) -> Result<Vec<FileNameHistory>> {
        Ok(self.read()?.file_name_history(branch_id, file_id))
    }

    fn directory_location(&self, id: DirectoryLocationId) -> Result<Option<DirectoryLocation>> {
        Ok(self.read()?.directory_location(id))
    }

    fn directory_location_on_branch(
        &self,
        branch_id: BranchId,
        directory_id: DirectoryId,
    ) -> Result<Option<DirectoryLocation>> {
        Ok(self.read()?.directory_location_on_branch(branch_id, directory_id))
    }

    fn child_locations_on_branch(
        &self,
        branch_id: BranchId,
        parent: DirectoryLocationId,
    ) -> Result<Vec<DirectoryLocation>> {
        Ok(self.read()?.child_locations_on_branch(branch_id, parent))
    }

    fn location_history_on_branch(&self, branch_id: BranchId) -> Result<Vec<DirectoryLocationHistory>> {
        Ok(self.read()?.location_history_on_branch(branch_id))
    }

    fn provisional(&self, id: ProvisionalDirectoryId) -> Result<Option<ProvisionalDirectoryLocation>> {
        Ok(self.read()?.provisional(id))
    }

    fn provisional_for_user(&self, user_id: UserId) -> Result<Vec<ProvisionalDirectoryLocation>> {
        Ok(self.read()?.provisional_for_user(user_id))
    }

    fn stats(&self) -> Result<VaultStats> {
        Ok(self.read()?.stats())
    }
}
