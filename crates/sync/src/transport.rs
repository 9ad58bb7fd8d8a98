//! The transport seam.
//!
//! The surrounding system decides how bytes move (HTTP/JSON, RPC, ...); this
//! module fixes only the field contracts. Implementations hand over decoded
//! values and surface failures as [`TransportFailure`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditkit_classify::TransportFailure;
use creditkit_core::UserId;
use creditkit_referral::CodeStatus;

/// Which tier a grant event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantTier {
    Signup,
    Monthly,
    Referral,
}

/// One inbound credit grant event from the server's account stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantRecord {
    pub user_id: UserId,
    pub tier: GrantTier,
    /// 1-based month of account life; present for monthly grants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_index: Option<u32>,
    /// Present for referral grants only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
    /// Monotonic position in the account stream.
    pub sequence_number: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Outbound referral summary for one code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralSnapshot {
    pub referral_code: String,
    pub status: CodeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub qualified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referred_user: Option<UserId>,
}

/// Everything needed to rebuild one user's account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFeed {
    pub user_id: UserId,
    pub grants: Vec<GrantRecord>,
    /// Credits already spent; balance = allocated - redeemed.
    pub redeemed: u32,
    pub referrals: Vec<ReferralSnapshot>,
    /// Referral codes issued in the current calendar month (slot usage).
    pub codes_issued_this_month: u32,
}

/// Async seam to the server. Calls may be cancelled by the caller at any
/// await point; implementations must be side-effect-free on the client state
/// (the coordinator commits local mutations only after a call returns).
#[async_trait]
pub trait AccountTransport: Send + Sync {
    /// Fetch the full account feed for a user.
    async fn fetch_account(&self, user_id: UserId) -> Result<AccountFeed, TransportFailure>;

    /// Ask the server to mint a new referral code for this user.
    async fn create_referral_code(
        &self,
        user_id: UserId,
    ) -> Result<ReferralSnapshot, TransportFailure>;

    /// Spend one credit server-side.
    async fn redeem_credit(&self, user_id: UserId) -> Result<(), TransportFailure>;
}
