//! Branch ancestry walks.
//!
//! Every resolution starts from the ordered chain `branch -> parent -> ... -> trunk`.
//! Topology faults are reported as [`VaultError::CorruptTopology`] and never
//! absorbed: a resolver that continued on a broken chain would silently show
//! the wrong content.

use crate::db::StoreReader;
use crate::error::{Result, VaultError};
use crate::types::{Branch, BranchId, BranchKind};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Ancestor chain of a branch, nearest first: `[branch, parent, ..., trunk]`.
pub fn ancestry_of<S>(store: &S, branch_id: BranchId) -> Result<Vec<Branch>>
where
    S: StoreReader + ?Sized,
{
    let start = store
        .branch(branch_id)?
        .ok_or_else(|| VaultError::not_found(format!("branch {}", branch_id)))?;

    let mut visited = HashSet::new();
    let mut chain = Vec::new();
    let mut current = start;

    loop {
        if !visited.insert(current.id) {
            return Err(VaultError::CorruptTopology(format!(
                "cycle through branch {} while walking ancestry of {}",
                current.id, branch_id
            )));
        }

        let parent = current.parent;
        let kind = current.kind;
        chain.push(current);

        match parent {
            None if kind == BranchKind::Trunk => break,
            None => {
                return Err(VaultError::CorruptTopology(format!(
                    "ancestry of branch {} ends at a {:?} branch instead of a trunk",
                    branch_id, kind
                )));
            }
            Some(parent_id) if kind == BranchKind::Trunk => {
                return Err(VaultError::CorruptTopology(format!(
                    "trunk branch has parent {}",
                    parent_id
                )));
            }
            Some(parent_id) => {
                current = store.branch(parent_id)?.ok_or_else(|| {
                    VaultError::CorruptTopology(format!(
                        "branch {} references missing parent {}",
                        branch_id, parent_id
                    ))
                })?;
            }
        }
    }

    debug!(branch = %branch_id, depth = chain.len(), "resolved ancestry");
    Ok(chain)
}

/// Feature branches reachable from `branch_id` through feature children,
/// keyed by id.
pub fn writable_descendants_of<S>(store: &S, branch_id: BranchId) -> Result<BTreeMap<BranchId, String>>
where
    S: StoreReader + ?Sized,
{
    // The upward chain must be sound before anything below it is trusted.
    ancestry_of(store, branch_id)?;

    let mut found = BTreeMap::new();
    let mut visited = HashSet::from([branch_id]);
    let mut worklist = vec![branch_id];

    while let Some(next) = worklist.pop() {
        for child in store.child_branches(next)? {
            if child.kind != BranchKind::Feature {
                continue;
            }
            if !visited.insert(child.id) {
                return Err(VaultError::CorruptTopology(format!(
                    "branch {} reached twice below {}",
                    child.id, branch_id
                )));
            }
            worklist.push(child.id);
            found.insert(child.id, child.name);
        }
    }

    Ok(found)
}
