//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic accounting/lifecycle failures. Transport
/// and infrastructure failures belong to the classifier's input types, not here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The monthly credit tier (or the monthly code-issuance slot) is exhausted.
    #[error("monthly limit reached")]
    MonthlyLimitReached,

    /// A lifetime cap (referral tier or combined total) is exhausted. Terminal
    /// for the account.
    #[error("lifetime limit reached")]
    LifetimeLimitReached,

    /// No spendable balance left to redeem.
    #[error("insufficient credits")]
    InsufficientCredits,

    /// A one-shot grant (signup bonus, a given month's credit) was already applied.
    #[error("grant already applied")]
    AlreadyGranted,

    /// A referral code is malformed or in a state that does not permit the
    /// requested transition.
    #[error("invalid referral code: {0}")]
    InvalidReferralCode(String),

    /// The referral code does not exist.
    #[error("referral code not found")]
    ReferralCodeNotFound,

    /// The referral code is no longer redeemable (server-side expiry).
    #[error("referral code expired")]
    ReferralCodeExpired,

    /// A user attempted to redeem their own code.
    #[error("self-referral is not allowed")]
    SelfReferralNotAllowed,

    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_code(msg: impl Into<String>) -> Self {
        Self::InvalidReferralCode(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
