//! `creditkit-account` — the per-user credit account aggregate.
//!
//! A `CreditAccount` is derived from a sequence of credit grant events across
//! three independent tiers (signup bonus, monthly credits, referral credits),
//! each with its own cap, plus redemptions that spend the balance. The
//! `summary` module derives the UI-facing read model (eligibility flags,
//! usage bands, days until the next monthly credit) as a pure projection.

pub mod account;
pub mod summary;

pub use account::{
    AccountCommand, AccountEvent, CreditAccount, CreditRedeemed, GrantMonthlyCredit,
    GrantReferralCredit, GrantSignupBonus, MonthlyCreditGranted, RedeemCredit,
    ReferralCreditGranted, SignupBonusGranted,
};
pub use summary::{
    AccountSummary, MonthlyReferralSlot, TierUsage, TotalUsage, UsageBand, can_create_referral,
    days_until_next_credit, summarize,
};
