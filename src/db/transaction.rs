//! Write transactions.

use crate::db::tables::{IdCounters, Mutation};
use crate::db::Database;
use crate::error::Result;
use crate::types::{
    BranchId, CommitId, DirectoryId, DirectoryLocationId, FileId, FileNameId, FileRevisionId,
    ProjectId, ProvisionalDirectoryId, TagId,
};
use parking_lot::MutexGuard;

/// A staged, all-or-nothing unit of change.
///
/// The transaction holds the store's writer lock until it is committed or
/// dropped, and no other transaction can begin on the same thread meanwhile. Reads made through [`Transaction::store`] see the committed
/// state; nothing staged here is visible to anyone until `commit` returns.
/// Dropping an uncommitted transaction discards it.
pub struct Transaction<'a> {
    db: &'a Database,
    _writer: MutexGuard<'a, ()>,
    counters: IdCounters,
    mutations: Vec<Mutation>,
}

macro_rules! allocator {
    ($fn_name:ident, $field:ident, $id:ident) => {
        pub fn $fn_name(&mut self) -> $id {
            let id = $id(self.counters.$field);
            self.counters.$field += 1;
            id
        }
    };
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(db: &'a Database, writer: MutexGuard<'a, ()>, counters: IdCounters) -> Self {
        Self {
            db,
            _writer: writer,
            counters,
            mutations: Vec::new(),
        }
    }

    /// The committed state this transaction builds on.
    pub fn store(&self) -> &'a Database {
        self.db
    }

    allocator!(alloc_project, project, ProjectId);
    allocator!(alloc_branch, branch, BranchId);
    allocator!(alloc_commit, commit, CommitId);
    allocator!(alloc_tag, tag, TagId);
    allocator!(alloc_file, file, FileId);
    allocator!(alloc_directory, directory, DirectoryId);
    allocator!(alloc_file_name, file_name, FileNameId);
    allocator!(alloc_directory_location, directory_location, DirectoryLocationId);
    allocator!(alloc_file_revision, file_revision, FileRevisionId);
    allocator!(alloc_provisional, provisional, ProvisionalDirectoryId);

    /// Stage a mutation.
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Mutations staged so far, in order.
    pub fn staged(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    /// Make every staged mutation durable and visible at once.
    pub fn commit(mut self) -> Result<()> {
        let mutations = std::mem::take(&mut self.mutations);
        if mutations.is_empty() {
            return Ok(());
        }
        self.db.apply_transaction(mutations)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.db.release_writer();
    }
}
