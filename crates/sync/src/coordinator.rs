//! Orchestration of concurrent reads/writes against per-user account state.
//!
//! Aggregate mutations are synchronous and happen only after a transport call
//! has returned, so cancelling an in-flight operation can never leave a
//! half-applied mutation. Mutual exclusion per account id comes from one
//! `tokio::sync::Mutex` per user entry; operations on different users run
//! fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use creditkit_account::{
    AccountEvent, AccountSummary, CreditAccount, CreditRedeemed, MonthlyCreditGranted,
    MonthlyReferralSlot, ReferralCreditGranted, SignupBonusGranted, summarize,
};
use creditkit_classify::{ClassifiedError, RawFailure, TransportFailure, classify};
use creditkit_core::{DomainError, DomainResult, UserId};
use creditkit_engine::AccountingEngine;
use creditkit_events::EventEnvelope;
use creditkit_referral::Code;

use crate::transport::{AccountFeed, AccountTransport, GrantTier, ReferralSnapshot};

/// Explicit coordinator configuration.
///
/// Passed in at construction instead of living in ambient module state, so
/// tests and multi-context embedders can run coordinators side by side.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Bearer token handed to transport implementations that need one.
    pub auth_token: Option<String>,
    /// Cached state older than this is re-fetched by `load_account`.
    pub stale_after: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            stale_after: Duration::minutes(5),
        }
    }
}

/// Cached state for one user.
#[derive(Debug, Clone)]
struct AccountEntry {
    account: CreditAccount,
    slot: MonthlyReferralSlot,
    referrals: Vec<ReferralSnapshot>,
    /// Bumped by every committed local write. A fetch that started before the
    /// bump is stale and gets discarded when it lands.
    generation: u64,
    fetched_at: chrono::DateTime<Utc>,
}

type EntryHandle = Arc<Mutex<Option<AccountEntry>>>;
type RefreshCell = Arc<OnceCell<Result<AccountSummary, ClassifiedError>>>;

/// Coordinates reads and writes for credit accounts.
///
/// Guarantees:
/// - **Single-flight**: concurrent refreshes for the same user share one
///   underlying fetch and its result.
/// - **Monotonic read-after-write**: after a successful mutating operation,
///   every read reflects that mutation or strictly newer state.
/// - Every surfaced failure has passed through the classifier; only the
///   background refresh path swallows errors (logged, last-known-good kept).
/// - No automatic retries: callers decide using `ClassifiedError::retryable`.
pub struct SyncCoordinator<T> {
    engine: AccountingEngine,
    transport: Arc<T>,
    config: SyncConfig,
    entries: Mutex<HashMap<UserId, EntryHandle>>,
    inflight: Mutex<HashMap<UserId, RefreshCell>>,
}

impl<T: AccountTransport> SyncCoordinator<T> {
    pub fn new(engine: AccountingEngine, transport: Arc<T>, config: SyncConfig) -> Self {
        Self {
            engine,
            transport,
            config,
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Read the account summary, fetching when absent or stale.
    pub async fn load_account(&self, user_id: UserId) -> Result<AccountSummary, ClassifiedError> {
        let handle = self.entry_handle(user_id).await;
        {
            let guard = handle.lock().await;
            if let Some(entry) = guard.as_ref() {
                let age = Utc::now().signed_duration_since(entry.fetched_at);
                if age <= self.config.stale_after {
                    return Ok(self.project(entry, Utc::now().date_naive()));
                }
            }
        }
        self.refresh(user_id).await
    }

    /// Re-fetch the account state. Concurrent callers for the same user
    /// observe one underlying call and share its result.
    pub async fn refresh(&self, user_id: UserId) -> Result<AccountSummary, ClassifiedError> {
        let cell: RefreshCell = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(user_id).or_default().clone()
        };

        let result = cell
            .get_or_init(|| self.fetch_and_store(user_id))
            .await
            .clone();

        // This flight is done; the next refresh starts a fresh one.
        let mut inflight = self.inflight.lock().await;
        if let Some(current) = inflight.get(&user_id) {
            if Arc::ptr_eq(current, &cell) {
                inflight.remove(&user_id);
            }
        }

        result
    }

    /// Fire-and-forget refresh. The one path that swallows an error: it logs
    /// and keeps the last-known-good state.
    pub fn spawn_refresh(self: &Arc<Self>, user_id: UserId)
    where
        T: 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = this.refresh(user_id).await {
                tracing::warn!(
                    user = %user_id,
                    error = %err,
                    "background refresh failed; keeping last-known-good state"
                );
            }
        });
    }

    /// Issue a new referral code for this user.
    ///
    /// Eligibility is checked locally first (distinct slot vs. lifetime error
    /// kinds), then the server mints the code, then the slot usage and the
    /// snapshot commit locally in one synchronous step.
    pub async fn generate_referral(
        &self,
        user_id: UserId,
    ) -> Result<ReferralSnapshot, ClassifiedError> {
        let handle = self.ensure_loaded(user_id).await?;
        let mut guard = handle.lock().await;
        let entry = guard
            .as_mut()
            .ok_or_else(|| domain_err(DomainError::validation("account state missing")))?;

        let today = Utc::now().date_naive();
        entry.slot.observe(today);
        self.engine
            .ensure_can_issue(&entry.account, &entry.slot)
            .map_err(domain_err)?;

        // Suspension point. The entry lock is held, serializing writers for
        // this user; nothing has been mutated yet.
        let snapshot = self
            .transport
            .create_referral_code(user_id)
            .await
            .map_err(transport_err)?;

        // The server's code must be well-formed before anything commits.
        Code::parse(&snapshot.referral_code).map_err(domain_err)?;

        entry.slot.record_issued();
        entry.referrals.push(snapshot.clone());
        entry.generation += 1;

        tracing::info!(
            user = %user_id,
            code = %snapshot.referral_code,
            remaining_this_month = entry.slot.remaining(),
            "referral code issued"
        );

        Ok(snapshot)
    }

    /// Spend one credit.
    ///
    /// Fails fast locally on an empty balance (no transport call), otherwise
    /// submits to the server and commits the local redemption afterwards.
    pub async fn redeem(&self, user_id: UserId) -> Result<AccountSummary, ClassifiedError> {
        let handle = self.ensure_loaded(user_id).await?;
        let mut guard = handle.lock().await;
        let entry = guard
            .as_mut()
            .ok_or_else(|| domain_err(DomainError::validation("account state missing")))?;

        if entry.account.current_balance() < 1 {
            return Err(domain_err(DomainError::InsufficientCredits));
        }

        self.transport
            .redeem_credit(user_id)
            .await
            .map_err(transport_err)?;

        self.engine
            .redeem_credit(&mut entry.account, Utc::now())
            .map_err(domain_err)?;
        entry.generation += 1;

        let today = Utc::now().date_naive();
        tracing::info!(
            user = %user_id,
            balance = entry.account.current_balance(),
            "credit redeemed"
        );
        Ok(self.project(entry, today))
    }

    /// Referral snapshots from the cached entry (empty when never loaded).
    pub async fn referrals(&self, user_id: UserId) -> Vec<ReferralSnapshot> {
        let handle = self.entry_handle(user_id).await;
        let guard = handle.lock().await;
        guard
            .as_ref()
            .map(|entry| entry.referrals.clone())
            .unwrap_or_default()
    }

    async fn entry_handle(&self, user_id: UserId) -> EntryHandle {
        let mut entries = self.entries.lock().await;
        entries.entry(user_id).or_default().clone()
    }

    async fn ensure_loaded(&self, user_id: UserId) -> Result<EntryHandle, ClassifiedError> {
        let handle = self.entry_handle(user_id).await;
        let loaded = { handle.lock().await.is_some() };
        if !loaded {
            self.refresh(user_id).await?;
        }
        Ok(handle)
    }

    /// The underlying fetch behind `refresh`.
    async fn fetch_and_store(&self, user_id: UserId) -> Result<AccountSummary, ClassifiedError> {
        let handle = self.entry_handle(user_id).await;
        let started_generation = {
            let guard = handle.lock().await;
            guard.as_ref().map(|e| e.generation).unwrap_or(0)
        };

        let feed = self
            .transport
            .fetch_account(user_id)
            .await
            .map_err(transport_err)?;

        let today = Utc::now().date_naive();
        let (account, slot) = self.rebuild(user_id, &feed, today).map_err(domain_err)?;

        let mut guard = handle.lock().await;
        match guard.as_ref() {
            Some(entry) if entry.generation != started_generation => {
                // A write committed while this fetch was in flight; the fetched
                // snapshot predates it. Serve the strictly newer local state.
                tracing::debug!(user = %user_id, "discarding stale fetch result");
                Ok(self.project(entry, today))
            }
            _ => {
                let entry = AccountEntry {
                    account,
                    slot,
                    referrals: feed.referrals,
                    generation: started_generation,
                    fetched_at: Utc::now(),
                };
                let summary = self.project(&entry, today);
                *guard = Some(entry);
                Ok(summary)
            }
        }
    }

    /// Rebuild account + slot from a feed, deterministically, via the engine's
    /// replay path.
    fn rebuild(
        &self,
        user_id: UserId,
        feed: &AccountFeed,
        today: NaiveDate,
    ) -> DomainResult<(CreditAccount, MonthlyReferralSlot)> {
        let mut grants = feed.grants.clone();
        grants.sort_by_key(|g| g.sequence_number);

        let mut stream = Vec::with_capacity(grants.len() + feed.redeemed as usize);
        for grant in &grants {
            let payload = match grant.tier {
                GrantTier::Signup => AccountEvent::SignupBonusGranted(SignupBonusGranted {
                    user_id: grant.user_id,
                    amount: self.engine.policy().signup_bonus,
                    occurred_at: grant.occurred_at,
                }),
                GrantTier::Monthly => {
                    let month_index = grant.month_index.ok_or_else(|| {
                        DomainError::validation("monthly grant without month_index")
                    })?;
                    AccountEvent::MonthlyCreditGranted(MonthlyCreditGranted {
                        user_id: grant.user_id,
                        month_index,
                        occurred_at: grant.occurred_at,
                    })
                }
                GrantTier::Referral => {
                    let raw = grant.referral_code.as_deref().ok_or_else(|| {
                        DomainError::validation("referral grant without referral_code")
                    })?;
                    AccountEvent::ReferralCreditGranted(ReferralCreditGranted {
                        user_id: grant.user_id,
                        code: Code::parse(raw)?,
                        occurred_at: grant.occurred_at,
                    })
                }
            };
            stream.push(EventEnvelope::new(
                Uuid::now_v7(),
                grant.user_id,
                grant.sequence_number,
                payload,
            ));
        }

        let mut next_seq = stream.last().map(|e| e.sequence_number()).unwrap_or(0);
        for _ in 0..feed.redeemed {
            next_seq += 1;
            stream.push(EventEnvelope::new(
                Uuid::now_v7(),
                user_id,
                next_seq,
                AccountEvent::CreditRedeemed(CreditRedeemed {
                    user_id,
                    occurred_at: Utc::now(),
                }),
            ));
        }

        let account = self.engine.replay(user_id, &stream)?;

        let mut slot = self.engine.open_slot(today);
        for _ in 0..feed.codes_issued_this_month {
            slot.record_issued();
        }

        Ok((account, slot))
    }

    fn project(&self, entry: &AccountEntry, today: NaiveDate) -> AccountSummary {
        // Roll a stale slot over the month boundary without mutating the entry.
        let mut slot = entry.slot;
        slot.observe(today);
        summarize(&entry.account, &slot, today)
    }
}

fn domain_err(err: DomainError) -> ClassifiedError {
    classify(&RawFailure::Domain(err))
}

fn transport_err(err: TransportFailure) -> ClassifiedError {
    classify(&RawFailure::Transport(err))
}
