//! `creditkit-sync` — concurrency-safe orchestration over the engine.
//!
//! The coordinator owns the cached per-user account state and guarantees that
//! a caller never observes or causes an overdraft across tiers: concurrent
//! refreshes collapse into one underlying fetch, mutating operations are
//! serialized per account, and a read after a successful write always reflects
//! that write or newer state.

pub mod coordinator;
pub mod transport;

pub use coordinator::{SyncConfig, SyncCoordinator};
pub use transport::{AccountFeed, AccountTransport, GrantRecord, GrantTier, ReferralSnapshot};
