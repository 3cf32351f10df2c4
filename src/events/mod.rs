//! In-process change notifications.
//!
//! The vault publishes an event after every applied write: commits, branch
//! lifecycle changes, promotions and tag moves. Subscribers receive them
//! over bounded channels, optionally filtered by branch. A subscriber that
//! falls behind is dropped rather than allowed to stall writers.
//!
//! # Example
//!
//! ```ignore
//! let handle = vault.subscribe(SubscriptionConfig {
//!     filter: EventFilter::branches(vec![feature.id]),
//!     ..Default::default()
//! });
//!
//! while let Ok(event) = handle.recv() {
//!     match event {
//!         VaultEvent::FilePromoted { file, .. } => println!("promoted {}", file),
//!         VaultEvent::Dropped { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::EventManager;
pub use types::{
    BranchSummary, DropReason, EventFilter, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, VaultEvent,
};
