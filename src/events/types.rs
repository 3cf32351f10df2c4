//! Event and subscription types.

use crate::error::Result;
use crate::types::{Branch, BranchId, BranchKind, CommitId, FileId, FileRevisionId, TagId, UserId};
use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    pub filter: EventFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            filter: EventFilter::all(),
        }
    }
}

/// Which events a subscriber wants.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Only events touching these branches (None = every branch).
    pub branches: Option<Vec<BranchId>>,

    pub include_commits: bool,
    pub include_branch_events: bool,
    pub include_promotions: bool,
    pub include_tags: bool,
}

impl EventFilter {
    /// Everything.
    pub fn all() -> Self {
        Self {
            branches: None,
            include_commits: true,
            include_branch_events: true,
            include_promotions: true,
            include_tags: true,
        }
    }

    /// Everything touching the given branches.
    pub fn branches(branches: Vec<BranchId>) -> Self {
        Self {
            branches: Some(branches),
            ..Self::all()
        }
    }

    /// Promotions only.
    pub fn promotions() -> Self {
        Self {
            include_promotions: true,
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, event: &VaultEvent) -> bool {
        let kind_wanted = match event {
            VaultEvent::CommitApplied { .. } => self.include_commits,
            VaultEvent::BranchCreated { .. } | VaultEvent::BranchDeleted { .. } => {
                self.include_branch_events
            }
            VaultEvent::FilePromoted { .. } => self.include_promotions,
            VaultEvent::TagMoved { .. } => self.include_tags,
            VaultEvent::Dropped { .. } => true,
        };
        if !kind_wanted {
            return false;
        }

        match &self.branches {
            None => true,
            Some(wanted) => event.branch_ids().iter().any(|b| wanted.contains(b)),
        }
    }
}

/// Events published by the vault.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    // --- Write Events ---
    /// A commit was applied.
    CommitApplied {
        commit: CommitId,
        user: UserId,
        /// Branches the commit wrote to.
        branches: Vec<BranchId>,
    },

    /// A file's feature work landed on the parent branch.
    FilePromoted {
        file: FileId,
        from: BranchId,
        to: BranchId,
        revision: FileRevisionId,
        commit: CommitId,
    },

    /// A moveable tag moved forward.
    TagMoved {
        tag: TagId,
        branch: BranchId,
        from: CommitId,
        to: CommitId,
    },

    // --- Branch Events ---
    BranchCreated {
        branch: BranchSummary,
    },

    BranchDeleted {
        branch: BranchId,
        name: String,
    },

    // --- Lifecycle Events ---
    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

impl VaultEvent {
    /// Branches an event concerns.
    pub fn branch_ids(&self) -> Vec<BranchId> {
        match self {
            VaultEvent::CommitApplied { branches, .. } => branches.clone(),
            VaultEvent::FilePromoted { from, to, .. } => vec![*from, *to],
            VaultEvent::TagMoved { branch, .. } => vec![*branch],
            VaultEvent::BranchCreated { branch } => {
                let mut ids = vec![branch.id];
                ids.extend(branch.parent);
                ids
            }
            VaultEvent::BranchDeleted { branch, .. } => vec![*branch],
            VaultEvent::Dropped { .. } => Vec::new(),
        }
    }

    /// JSON form, for forwarding to out-of-process listeners.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Summary of a branch (for events).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub id: BranchId,
    pub name: String,
    pub kind: BranchKind,
    pub parent: Option<BranchId>,
    pub commit: CommitId,
}

impl BranchSummary {
    pub fn from_branch(branch: &Branch) -> Self {
        Self {
            id: branch.id,
            name: branch.name.clone(),
            kind: branch.kind,
            parent: branch.parent,
            commit: branch.commit_id,
        }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Receiving end of a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub receiver: crossbeam_channel::Receiver<VaultEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<VaultEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<VaultEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<VaultEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
