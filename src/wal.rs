//! Write-ahead log for transaction durability.
//!
//! Every transaction is appended here and marked committed before its
//! mutations are applied in memory. On open, committed transactions newer
//! than the last snapshot are replayed; transactions that never received a
//! commit marker are discarded.

use crate::db::Mutation;
use crate::error::{Result, VaultError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Magic bytes for WAL file.
const WAL_MAGIC: &[u8; 4] = b"BVW\0";

/// Current WAL format version.
const WAL_VERSION: u8 = 1;

/// Size of the magic + version header.
const WAL_HEADER_LEN: u64 = 5;

/// Upper bound for a single encoded entry.
const MAX_ENTRY_LEN: usize = 256 * 1024 * 1024;

/// WAL entry status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntryStatus {
    /// Written, not yet committed.
    Pending,
    /// Commit marker for an earlier pending entry.
    Committed,
}

/// A single WAL entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub status: WalEntryStatus,
    pub operation: WalOperation,
    /// Seconds since Unix epoch.
    pub timestamp: u64,
}

/// Operations recorded in the WAL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WalOperation {
    /// One transaction's mutations, in application order.
    Transaction { txn: u64, mutations: Vec<Mutation> },
    /// Body of a commit marker.
    Marker,
}

/// Write-ahead log manager.
pub struct WriteAheadLog {
    path: PathBuf,
    next_seq: Mutex<u64>,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl WriteAheadLog {
    /// Create or open a WAL file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let next_seq = if path.exists() {
            let file = OpenOptions::new().read(true).open(&path)?;
            let file_len = file.metadata()?.len();
            let mut reader = BufReader::new(file);
            Self::read_header(&mut reader)?;

            let mut max_seq = 0u64;
            let mut valid_len = WAL_HEADER_LEN;
            while let Ok(entry) = Self::read_entry(&mut reader) {
                max_seq = max_seq.max(entry.seq);
                valid_len = reader.stream_position()?;
            }

            // New entries must not land behind a torn tail, where no scan reaches them.
            if valid_len < file_len {
                warn!(
                    path = %path.display(),
                    discarded = file_len - valid_len,
                    "truncating torn WAL tail"
                );
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            max_seq + 1
        } else {
            Self::write_header(&path)?;
            1
        };

        let writer = BufWriter::new(OpenOptions::new().append(true).open(&path)?);

        Ok(Self {
            path,
            next_seq: Mutex::new(next_seq),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Log a transaction as pending (returns its sequence number).
    pub fn log(&self, operation: WalOperation) -> Result<u64> {
        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;
        *next_seq += 1;

        self.append(&WalEntry {
            seq,
            status: WalEntryStatus::Pending,
            operation,
            timestamp: now_secs(),
        })?;

        Ok(seq)
    }

    /// Write the commit marker for `seq`.
    pub fn commit(&self, seq: u64) -> Result<()> {
        self.append(&WalEntry {
            seq,
            status: WalEntryStatus::Committed,
            operation: WalOperation::Marker,
            timestamp: now_secs(),
        })
    }

    fn append(&self, entry: &WalEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        let w = writer
            .as_mut()
            .ok_or_else(|| VaultError::StoreUnavailable("write-ahead log is closed".into()))?;
        Self::write_entry(w, entry)?;
        w.flush()?;
        w.get_ref().sync_all()?;
        Ok(())
    }

    /// Entries that have a commit marker, in sequence order.
    pub fn committed_entries(&self) -> Result<Vec<WalEntry>> {
        let (pending, committed) = self.scan()?;
        Ok(pending
            .into_iter()
            .filter(|(seq, _)| committed.contains(seq))
            .map(|(_, entry)| entry)
            .collect())
    }

    /// Entries without a commit marker, in sequence order.
    pub fn pending_entries(&self) -> Result<Vec<WalEntry>> {
        let (pending, committed) = self.scan()?;
        Ok(pending
            .into_iter()
            .filter(|(seq, _)| !committed.contains(seq))
            .map(|(_, entry)| entry)
            .collect())
    }

    fn scan(&self) -> Result<(BTreeMap<u64, WalEntry>, HashSet<u64>)> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(WAL_HEADER_LEN))?;

        let mut reader = BufReader::new(file);
        let mut pending = BTreeMap::new();
        let mut committed = HashSet::new();

        // A torn tail (crash mid-write) ends the scan.
        while let Ok(entry) = Self::read_entry(&mut reader) {
            match entry.status {
                WalEntryStatus::Committed => {
                    committed.insert(entry.seq);
                }
                WalEntryStatus::Pending => {
                    pending.insert(entry.seq, entry);
                }
            }
        }

        Ok((pending, committed))
    }

    /// Truncate the WAL (called after a successful checkpoint).
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        *writer = None;

        Self::write_header(&self.path)?;
        *writer = Some(BufWriter::new(
            OpenOptions::new().append(true).open(&self.path)?,
        ));
        *self.next_seq.lock() = 1;

        Ok(())
    }

    /// Check if the WAL holds any entries at all.
    pub fn is_empty(&self) -> Result<bool> {
        let (pending, _) = self.scan()?;
        Ok(pending.is_empty())
    }

    fn write_header(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.write_all(WAL_MAGIC)?;
        file.write_all(&[WAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn read_header(reader: &mut BufReader<File>) -> Result<()> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != WAL_MAGIC {
            return Err(VaultError::InvalidFormat("Invalid WAL magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != WAL_VERSION {
            return Err(VaultError::InvalidFormat(format!(
                "Unsupported WAL version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn write_entry(writer: &mut BufWriter<File>, entry: &WalEntry) -> Result<()> {
        let encoded = rmp_serde::to_vec(entry)?;

        let len = encoded.len() as u32;
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;
        writer.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;

        Ok(())
    }

    fn read_entry(reader: &mut BufReader<File>) -> Result<WalEntry> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_LEN {
            return Err(VaultError::Corruption("WAL entry too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored = u32::from_le_bytes(checksum_bytes);

        if stored != crc32fast::hash(&encoded) {
            return Err(VaultError::Corruption("WAL checksum mismatch".into()));
        }

        Ok(rmp_serde::from_slice(&encoded)?)
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Commit, CommitId, Timestamp, UserId};
    use tempfile::TempDir;

    fn txn(n: u64) -> WalOperation {
        WalOperation::Transaction {
            txn: n,
            mutations: vec![Mutation::InsertCommit(Commit {
                id: CommitId(n),
                user_id: UserId(1),
                timestamp: Timestamp(0),
                message: format!("commit {}", n),
            })],
        }
    }

    #[test]
    fn test_wal_commit_marker() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("test.wal")).unwrap();

        let seq = wal.log(txn(1)).unwrap();
        assert_eq!(seq, 1);
        assert_eq!(wal.pending_entries().unwrap().len(), 1);
        assert!(wal.committed_entries().unwrap().is_empty());

        wal.commit(seq).unwrap();
        assert!(wal.pending_entries().unwrap().is_empty());
        assert_eq!(wal.committed_entries().unwrap().len(), 1);
    }

    #[test]
    fn test_wal_discards_unmarked_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let wal = WriteAheadLog::open(&path).unwrap();
            let s1 = wal.log(txn(1)).unwrap();
            wal.commit(s1).unwrap();
            wal.log(txn(2)).unwrap();
        }

        let wal = WriteAheadLog::open(&path).unwrap();
        let committed = wal.committed_entries().unwrap();
        assert_eq!(committed.len(), 1);
        match &committed[0].operation {
            WalOperation::Transaction { txn, mutations } => {
                assert_eq!(*txn, 1);
                assert_eq!(mutations.len(), 1);
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert_eq!(wal.pending_entries().unwrap().len(), 1);

        // Sequence numbers continue after reopen.
        assert_eq!(wal.log(txn(3)).unwrap(), 3);
    }

    #[test]
    fn test_wal_truncates_torn_tail_on_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let wal = WriteAheadLog::open(&path).unwrap();
            let seq = wal.log(txn(1)).unwrap();
            wal.commit(seq).unwrap();
        }
        let intact_len = std::fs::metadata(&path).unwrap().len();

        // A crash mid-append leaves a length prefix with a partial body.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[40, 0, 0, 0, 1, 2, 3]).unwrap();
        drop(file);

        {
            let wal = WriteAheadLog::open(&path).unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
            let seq = wal.log(txn(2)).unwrap();
            wal.commit(seq).unwrap();
        }

        let wal = WriteAheadLog::open(&path).unwrap();
        let txns: Vec<u64> = wal
            .committed_entries()
            .unwrap()
            .into_iter()
            .filter_map(|entry| match entry.operation {
                WalOperation::Transaction { txn, .. } => Some(txn),
                WalOperation::Marker => None,
            })
            .collect();
        assert_eq!(txns, vec![1, 2]);
    }

    #[test]
    fn test_wal_clear() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::open(dir.path().join("test.wal")).unwrap();

        let seq = wal.log(txn(1)).unwrap();
        wal.commit(seq).unwrap();
        assert!(!wal.is_empty().unwrap());

        wal.clear().unwrap();
        assert!(wal.is_empty().unwrap());
        assert_eq!(wal.log(txn(2)).unwrap(), 1);
    }

    #[test]
    fn test_wal_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");
        std::fs::write(&path, b"NOPE\x01").unwrap();

        let result = WriteAheadLog::open(&path);
        assert!(matches!(result, Err(VaultError::InvalidFormat(_))));
    }
}
