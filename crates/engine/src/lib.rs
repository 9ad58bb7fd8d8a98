//! `creditkit-engine` — the accounting operations layer.
//!
//! Composes the credit-account and referral-code aggregates into the
//! operations callers actually invoke: grants, qualification, code issuance,
//! redemption, flag recomputation, and deterministic stream replay. All
//! operations are synchronous, decide-then-apply, and never partially mutate
//! on failure.

pub mod engine;

pub use engine::AccountingEngine;
