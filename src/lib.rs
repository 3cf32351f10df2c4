//! # Branchvault
//!
//! A branch-aware version store. Files and directories keep stable
//! identities while their names, placements and contents are recorded per
//! branch, and every read answers "what does this branch see".
//!
//! ## Core Concepts
//!
//! - **Ancestry**: Each branch sees its own rows first, then its parent's, up to the trunk
//! - **Visibility**: The branch kind decides which inherited rows count (feature, release, tag-anchored)
//! - **Promotion**: Feature work lands on the parent branch in one transaction
//! - **Tags**: Fixed or forward-moving pointers that freeze tag-anchored branches
//!
//! ## Example
//!
//! ```ignore
//! use branchvault::{UserId, Vault, VaultConfig};
//!
//! let vault = Vault::open_or_create(VaultConfig {
//!     path: "./my-vault".into(),
//!     ..Default::default()
//! })?;
//!
//! let (_, trunk) = vault.create_project("site", UserId(1))?;
//! let feature = vault.create_feature_branch(trunk.id, "redesign", UserId(1))?;
//!
//! let mut commit = vault.begin_commit(UserId(1), "new landing page")?;
//! let file = commit.add_file(feature.id, trunk.root_directory_id, "index.html", b"<html>")?;
//! commit.commit()?;
//!
//! vault.promote(file, feature.id, trunk.id, UserId(1), None)?;
//! ```

pub mod ancestry;
pub mod commits;
pub mod content;
pub mod db;
pub mod error;
pub mod events;
pub mod names;
pub mod promotion;
pub mod provisional;
pub mod revisions;
pub mod scope;
pub mod tags;
pub mod types;
pub mod vault;
pub mod wal;

// Re-exports
pub use ancestry::{ancestry_of, writable_descendants_of};
pub use commits::CommitBuilder;
pub use content::ContentStore;
pub use db::{Database, Mutation, StoreReader, Transaction};
pub use error::{Result, VaultError};
pub use events::{
    BranchSummary, DropReason, EventFilter, EventManager, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, VaultEvent,
};
pub use names::{
    child_directories, directory_coordinates, file_created_on_branch, is_file_name_different,
    list_directory, visible_location, visible_name, was_file_deleted_on_branch,
};
pub use promotion::{
    deduce_common_ancestor, find_common_ancestor_revision, find_promotion_candidates,
    plan_promotion, PromotionPlan,
};
pub use provisional::find_provisional_directory;
pub use revisions::{branch_tip_revision, tip_revision, visible_revisions};
pub use scope::{Scope, VisibilityStrategy};
pub use tags::resolve_tag;
pub use types::*;
pub use vault::{Vault, VaultConfig, COMMITS_SINCE_LIMIT};
pub use wal::{WalEntry, WalEntryStatus, WalOperation, WriteAheadLog};
