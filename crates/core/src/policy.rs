//! Per-tier credit caps (process-wide, immutable configuration).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration rejected at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "cap sum mismatch: signup {signup_bonus} + monthly {monthly_cap} + referral {referral_cap} != lifetime {lifetime_cap}"
    )]
    CapSumMismatch {
        signup_bonus: u32,
        monthly_cap: u32,
        referral_cap: u32,
        lifetime_cap: u32,
    },

    #[error("lifetime cap must be non-zero")]
    ZeroLifetimeCap,

    #[error("codes_per_month must be non-zero")]
    ZeroCodesPerMonth,
}

/// Static per-tier caps and the derivation rule for the combined cap.
///
/// Invariant: `lifetime_cap == signup_bonus + monthly_cap + referral_cap`.
/// Any deployment that changes one tier must keep this invariant; the engine
/// rejects the configuration at construction otherwise. There is no runtime
/// mutation path.
///
/// `codes_per_month` bounds how many referral codes a user may issue per
/// calendar month. It is a resetting slot allowance, not a credit tier, and is
/// excluded from the cap-sum invariant.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPolicy {
    pub signup_bonus: u32,
    pub monthly_cap: u32,
    pub referral_cap: u32,
    pub lifetime_cap: u32,
    pub codes_per_month: u32,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            signup_bonus: 1,
            monthly_cap: 3,
            referral_cap: 6,
            lifetime_cap: 10,
            codes_per_month: 3,
        }
    }
}

impl LimitPolicy {
    /// Build a validated policy.
    pub fn new(
        signup_bonus: u32,
        monthly_cap: u32,
        referral_cap: u32,
        lifetime_cap: u32,
        codes_per_month: u32,
    ) -> Result<Self, ConfigError> {
        let policy = Self {
            signup_bonus,
            monthly_cap,
            referral_cap,
            lifetime_cap,
            codes_per_month,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Check the cap-sum invariant. Called at process start; the policy is
    /// immutable afterward.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lifetime_cap == 0 {
            return Err(ConfigError::ZeroLifetimeCap);
        }
        if self.codes_per_month == 0 {
            return Err(ConfigError::ZeroCodesPerMonth);
        }
        let sum = self.signup_bonus + self.monthly_cap + self.referral_cap;
        if sum != self.lifetime_cap {
            return Err(ConfigError::CapSumMismatch {
                signup_bonus: self.signup_bonus,
                monthly_cap: self.monthly_cap,
                referral_cap: self.referral_cap,
                lifetime_cap: self.lifetime_cap,
            });
        }
        Ok(())
    }
}
