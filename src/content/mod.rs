//! Content-addressed storage for revision payloads.
//!
//! Payloads are stored by their SHA-256 digest, sharded into directories
//! by the first byte of the digest. Identical content is stored once no
//! matter how many revisions or branches refer to it.

mod storage;

pub use storage::ContentStore;
