//! `creditkit-events` — event abstractions for the accounting domain.
//!
//! Accounts and referral codes are evolved exclusively through events; this
//! crate holds the domain-agnostic pieces: the [`Event`] trait and the
//! per-user stream [`EventEnvelope`].

pub mod envelope;
pub mod event;

pub use envelope::EventEnvelope;
pub use event::Event;
