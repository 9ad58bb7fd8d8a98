//! `creditkit-referral` — referral codes and their lifecycle.
//!
//! A referral code moves `unused → pending → qualified`, or is blocked from
//! `unused`/`pending` by an abuse decision. `qualified` and `blocked` are
//! terminal.

pub mod code;
pub mod referral;

pub use code::Code;
pub use referral::{
    BlockCode, CodeBlocked, CodeIssued, CodeQualified, CodeRedeemed, CodeStatus, IssueCode,
    QualifyCode, RedeemCode, ReferralCode, ReferralCommand, ReferralEvent,
};
