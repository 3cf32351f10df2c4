//! Resolution scope: one branch's ancestry plus the visibility rules its
//! kind imposes.
//!
//! A scope is built once per resolution call and shared by the revision,
//! name and location resolvers, so the branch-kind decision is made in one
//! place.

use crate::ancestry::ancestry_of;
use crate::db::StoreReader;
use crate::error::{Result, VaultError};
use crate::tags::resolve_tag;
use crate::types::{Branch, BranchId, BranchKind, CommitId};

/// Visibility rules, one per branch kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisibilityStrategy {
    /// Only the trunk's own rows.
    Trunk,
    /// Own rows plus unpromoted inherited rows older than the baseline.
    Feature,
    /// Own rows plus inherited rows older than the branch's creating commit.
    Release { created_at: CommitId },
    /// Every row older than the anchoring tag's commit.
    TagAnchored { tag_bound: CommitId },
}

impl VisibilityStrategy {
    pub fn for_branch<S>(store: &S, branch: &Branch) -> Result<Self>
    where
        S: StoreReader + ?Sized,
    {
        Ok(match branch.kind {
            BranchKind::Trunk => VisibilityStrategy::Trunk,
            BranchKind::Feature => VisibilityStrategy::Feature,
            BranchKind::Release => VisibilityStrategy::Release {
                created_at: branch.commit_id,
            },
            BranchKind::TagAnchored => {
                let tag_id = branch.tag_id.ok_or_else(|| {
                    VaultError::CorruptTopology(format!(
                        "tag-anchored branch {} has no tag",
                        branch.id
                    ))
                })?;
                VisibilityStrategy::TagAnchored {
                    tag_bound: resolve_tag(store, tag_id)?,
                }
            }
        })
    }
}

/// Everything a resolver needs to know about where it is looking.
#[derive(Clone, Debug)]
pub struct Scope {
    ancestry: Vec<Branch>,
    strategy: VisibilityStrategy,
    bound: Option<CommitId>,
}

impl Scope {
    /// Resolve ancestry and strategy for `branch_id`, optionally bounded to
    /// rows at or before `bound`.
    pub fn resolve<S>(store: &S, branch_id: BranchId, bound: Option<CommitId>) -> Result<Self>
    where
        S: StoreReader + ?Sized,
    {
        let ancestry = ancestry_of(store, branch_id)?;
        let strategy = VisibilityStrategy::for_branch(store, &ancestry[0])?;
        Ok(Self {
            ancestry,
            strategy,
            bound,
        })
    }

    /// The branch being resolved.
    pub fn target(&self) -> &Branch {
        &self.ancestry[0]
    }

    pub fn ancestry(&self) -> &[Branch] {
        &self.ancestry
    }

    pub fn strategy(&self) -> VisibilityStrategy {
        self.strategy
    }

    pub fn bound(&self) -> Option<CommitId> {
        self.bound
    }

    /// Branches with their distance from the target (0 = target).
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &Branch)> {
        self.ancestry.iter().enumerate()
    }

    /// Whether archived rows can be the visible version.
    pub fn consults_history(&self) -> bool {
        self.bound.is_some()
            || matches!(
                self.strategy,
                VisibilityStrategy::Release { .. } | VisibilityStrategy::TagAnchored { .. }
            )
    }

    /// Whether promoted rows are hidden.
    pub fn masks_promoted(&self) -> bool {
        self.strategy == VisibilityStrategy::Feature
    }

    /// Commit-time admissibility of a row found `rank` hops from the target.
    pub fn admits(&self, rank: usize, commit: CommitId) -> bool {
        if let Some(bound) = self.bound {
            if commit > bound {
                return false;
            }
        }
        match self.strategy {
            VisibilityStrategy::Trunk => rank == 0,
            VisibilityStrategy::Feature => true,
            VisibilityStrategy::Release { created_at } => rank == 0 || commit < created_at,
            VisibilityStrategy::TagAnchored { tag_bound } => commit < tag_bound,
        }
    }
}
