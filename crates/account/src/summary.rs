//! Derived, UI-facing read model over a credit account.
//!
//! Everything here is a pure projection: same inputs, same output, no side
//! effects. The reference date is always a parameter so callers (and tests)
//! control time.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::account::CreditAccount;

/// Calendar-month allowance of referral-code issuance.
///
/// Distinct from the lifetime referral-credit tier: this counter resets at the
/// start of every calendar month, the tier never resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyReferralSlot {
    issued_this_month: u32,
    max_per_month: u32,
    /// First day of the month the counter belongs to.
    anchor: NaiveDate,
}

impl MonthlyReferralSlot {
    pub fn new(max_per_month: u32, today: NaiveDate) -> Self {
        Self {
            issued_this_month: 0,
            max_per_month,
            anchor: month_start(today),
        }
    }

    pub fn issued_this_month(&self) -> u32 {
        self.issued_this_month
    }

    pub fn max_per_month(&self) -> u32 {
        self.max_per_month
    }

    pub fn remaining(&self) -> u32 {
        self.max_per_month.saturating_sub(self.issued_this_month)
    }

    /// Roll the counter forward: entering a new calendar month resets it.
    pub fn observe(&mut self, today: NaiveDate) {
        let start = month_start(today);
        if start != self.anchor {
            self.anchor = start;
            self.issued_this_month = 0;
        }
    }

    /// Record one issued code in the current month.
    pub fn record_issued(&mut self) {
        self.issued_this_month += 1;
    }
}

/// Display band over a tier's `used/max` ratio.
///
/// Percent is floored integer math so the boundary values land in the
/// stricter band: exactly 70% is `Elevated`, exactly 90% is `Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageBand {
    Normal,
    Elevated,
    Critical,
}

impl UsageBand {
    pub fn from_ratio(used: u32, max: u32) -> Self {
        if max == 0 {
            // A zero-cap tier has no headroom at all.
            return UsageBand::Critical;
        }
        let pct = (u64::from(used) * 100 / u64::from(max)) as u32;
        if pct < 70 {
            UsageBand::Normal
        } else if pct < 90 {
            UsageBand::Elevated
        } else {
            UsageBand::Critical
        }
    }
}

/// One tier's usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierUsage {
    pub used: u32,
    pub max: u32,
}

impl TierUsage {
    pub fn band(&self) -> UsageBand {
        UsageBand::from_ratio(self.used, self.max)
    }
}

/// Combined lifetime usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalUsage {
    pub allocated: u32,
    pub used: u32,
    pub max: u32,
}

/// The reconciled account summary handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub available_credits: u32,
    pub monthly_credits: TierUsage,
    pub referral_credits: TierUsage,
    pub total_free_downloads: TotalUsage,
    pub days_until_next_credit: Option<u32>,
    pub all_monthly_credits_received: bool,
    pub can_create_referral: bool,
}

/// Eligibility to issue a new referral code: the calendar slot must have room
/// AND the lifetime referral tier must have headroom.
pub fn can_create_referral(account: &CreditAccount, slot: &MonthlyReferralSlot) -> bool {
    slot.remaining() > 0 && account.has_referral_headroom()
}

/// Days until the next monthly credit lands (first day of the next calendar
/// month), or `None` once the monthly tier is exhausted.
pub fn days_until_next_credit(account: &CreditAccount, today: NaiveDate) -> Option<u32> {
    if account.all_monthly_credits_received() {
        return None;
    }
    let first = next_month_start(today)?;
    Some((first - today).num_days() as u32)
}

/// Project the UI-facing summary. Pure and idempotent: calling this any number
/// of times with the same inputs yields the same output and mutates nothing.
pub fn summarize(
    account: &CreditAccount,
    slot: &MonthlyReferralSlot,
    today: NaiveDate,
) -> AccountSummary {
    let allocated = account.total_allocated();
    let balance = account.current_balance();

    AccountSummary {
        available_credits: balance,
        monthly_credits: TierUsage {
            used: account.monthly_used(),
            max: account.monthly_max(),
        },
        referral_credits: TierUsage {
            used: account.referral_used(),
            max: account.referral_max(),
        },
        total_free_downloads: TotalUsage {
            allocated,
            used: allocated - balance,
            max: account.total_max(),
        },
        days_until_next_credit: days_until_next_credit(account, today),
        all_monthly_credits_received: account.all_monthly_credits_received(),
        can_create_referral: can_create_referral(account, slot),
    }
}

fn month_start(date: NaiveDate) -> NaiveDate {
    // Day 1 of a valid date's month always exists.
    date.with_day(1).unwrap_or(date)
}

fn next_month_start(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}
