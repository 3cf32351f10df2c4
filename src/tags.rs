//! Tag resolution.

use crate::db::StoreReader;
use crate::error::{Result, VaultError};
use crate::types::{CommitId, Tag, TagId};

/// Commit a tag currently points at.
pub fn resolve_tag<S>(store: &S, tag_id: TagId) -> Result<CommitId>
where
    S: StoreReader + ?Sized,
{
    Ok(load_tag(store, tag_id)?.commit_id)
}

pub(crate) fn load_tag<S>(store: &S, tag_id: TagId) -> Result<Tag>
where
    S: StoreReader + ?Sized,
{
    store
        .tag(tag_id)?
        .ok_or_else(|| VaultError::not_found(format!("tag {}", tag_id)))
}

/// Validate a move of `tag` to `requested`.
///
/// Only moveable tags move, and only forward.
pub(crate) fn check_move(tag: &Tag, requested: CommitId) -> Result<()> {
    if !tag.moveable {
        return Err(VaultError::NotMoveable(tag.id));
    }
    if requested <= tag.commit_id {
        return Err(VaultError::NonMonotonicMove {
            tag: tag.id,
            current: tag.commit_id,
            requested,
        });
    }
    Ok(())
}
