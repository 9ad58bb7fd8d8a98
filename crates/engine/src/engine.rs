//! Accounting operations over account + referral aggregates.
//!
//! Every operation follows the same pipeline: decide events with the pure
//! `handle`, then `apply` them. For operations spanning two aggregates
//! (qualification touches the code and the issuer's account), **all**
//! decisions run before **any** application, so a rejected cap check leaves
//! both aggregates untouched.

use chrono::{DateTime, NaiveDate, Utc};

use creditkit_account::{
    AccountCommand, AccountEvent, AccountSummary, CreditAccount, GrantMonthlyCredit,
    GrantReferralCredit, GrantSignupBonus, MonthlyReferralSlot, RedeemCredit, summarize,
};
use creditkit_core::{Aggregate, ConfigError, DomainError, DomainResult, LimitPolicy, UserId};
use creditkit_events::EventEnvelope;
use creditkit_referral::{Code, IssueCode, QualifyCode, ReferralCode, ReferralCommand, ReferralEvent};

/// The operations layer: applies grants, validates redemptions, advances
/// referral lifecycles, and answers eligibility questions.
///
/// Holds only the validated [`LimitPolicy`]; all account/code state is owned
/// by the caller and passed in by exclusive reference. Operations contain no
/// suspension points, so mutual exclusion per account id (the sync layer's
/// job) is sufficient for atomicity.
#[derive(Debug, Clone)]
pub struct AccountingEngine {
    policy: LimitPolicy,
}

impl AccountingEngine {
    /// Build an engine, rejecting any policy that violates the cap-sum
    /// invariant.
    pub fn new(policy: LimitPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// A zero-counter account for this user, ready for its first grant or for
    /// replay.
    pub fn open_account(&self, user_id: UserId) -> CreditAccount {
        CreditAccount::empty(user_id, &self.policy)
    }

    /// A fresh monthly code-issuance slot anchored at `today`'s month.
    pub fn open_slot(&self, today: NaiveDate) -> MonthlyReferralSlot {
        MonthlyReferralSlot::new(self.policy.codes_per_month, today)
    }

    /// Grant the one-shot signup bonus. Fails `AlreadyGranted` when the
    /// account's dedicated flag is already set.
    pub fn apply_signup_bonus(
        &self,
        account: &mut CreditAccount,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<AccountEvent>> {
        self.execute(
            account,
            AccountCommand::GrantSignupBonus(GrantSignupBonus {
                user_id: account.user_id(),
                occurred_at: now,
            }),
        )
    }

    /// Grant one credit for `month_index` (1-based month of account life).
    /// At most one grant per month, for the first `monthly_cap` months only;
    /// `MonthlyLimitReached` is terminal for the account.
    pub fn apply_monthly_grant(
        &self,
        account: &mut CreditAccount,
        month_index: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<AccountEvent>> {
        self.execute(
            account,
            AccountCommand::GrantMonthlyCredit(GrantMonthlyCredit {
                user_id: account.user_id(),
                month_index,
                occurred_at: now,
            }),
        )
    }

    /// Spend one credit. Fails `InsufficientCredits` on an empty balance and
    /// never touches `total_allocated`.
    pub fn redeem_credit(
        &self,
        account: &mut CreditAccount,
        now: DateTime<Utc>,
    ) -> DomainResult<Vec<AccountEvent>> {
        self.execute(
            account,
            AccountCommand::RedeemCredit(RedeemCredit {
                user_id: account.user_id(),
                occurred_at: now,
            }),
        )
    }

    /// Promote a pending code to qualified and credit the issuer, as one
    /// atomic unit.
    ///
    /// Decision order: the code must be pending, the issuer must have
    /// referral headroom. A failed cap check returns `LifetimeLimitReached`
    /// and leaves the code pending; no qualified code can exist whose
    /// issuer's counters do not reflect it.
    pub fn qualify_referral(
        &self,
        issuer: &mut CreditAccount,
        code: &mut ReferralCode,
        now: DateTime<Utc>,
    ) -> DomainResult<(Vec<AccountEvent>, Vec<ReferralEvent>)> {
        if code.issuer() != Some(issuer.user_id()) {
            return Err(DomainError::validation("code issuer mismatch"));
        }

        let code_events = code.handle(&ReferralCommand::QualifyCode(QualifyCode {
            code: code.code().clone(),
            occurred_at: now,
        }))?;
        let account_events = issuer.handle(&AccountCommand::GrantReferralCredit(
            GrantReferralCredit {
                user_id: issuer.user_id(),
                code: code.code().clone(),
                occurred_at: now,
            },
        ))?;

        // Both decisions succeeded; commit both.
        for e in &account_events {
            issuer.apply(e);
        }
        for e in &code_events {
            code.apply(e);
        }

        tracing::debug!(
            issuer = %issuer.user_id(),
            code = %code.code(),
            referral_used = issuer.referral_used(),
            "referral qualified"
        );

        Ok((account_events, code_events))
    }

    /// Eligibility guard for issuing a new code. The two failures are distinct
    /// kinds on purpose: the slot resets next calendar month, the referral
    /// tier never resets.
    pub fn ensure_can_issue(
        &self,
        issuer: &CreditAccount,
        slot: &MonthlyReferralSlot,
    ) -> DomainResult<()> {
        if slot.remaining() == 0 {
            return Err(DomainError::MonthlyLimitReached);
        }
        if !issuer.has_referral_headroom() {
            return Err(DomainError::LifetimeLimitReached);
        }
        Ok(())
    }

    /// Issue a new referral code for this account under the given slot state.
    pub fn issue_referral_code(
        &self,
        issuer: &CreditAccount,
        slot: &MonthlyReferralSlot,
        code: Code,
        now: DateTime<Utc>,
    ) -> DomainResult<ReferralCode> {
        self.ensure_can_issue(issuer, slot)?;

        let mut referral = ReferralCode::empty(code.clone());
        let events = referral.handle(&ReferralCommand::IssueCode(IssueCode {
            code,
            issuer: issuer.user_id(),
            occurred_at: now,
        }))?;
        for e in &events {
            referral.apply(e);
        }
        Ok(referral)
    }

    /// Pure derivation of the UI-facing flags and counters. Callable any
    /// number of times with no side effects.
    pub fn recompute_flags(
        &self,
        account: &CreditAccount,
        slot: &MonthlyReferralSlot,
        today: NaiveDate,
    ) -> AccountSummary {
        summarize(account, slot, today)
    }

    /// Deterministically rehydrate an account from its event stream.
    ///
    /// The stream is validated the way loaded history always is: every
    /// envelope must belong to `user_id` and sequence numbers must be strictly
    /// increasing from 1. A stream whose replayed state violates the caps is
    /// rejected rather than silently accepted.
    pub fn replay(
        &self,
        user_id: UserId,
        stream: &[EventEnvelope<AccountEvent>],
    ) -> DomainResult<CreditAccount> {
        let mut last = 0u64;
        for (idx, envelope) in stream.iter().enumerate() {
            if envelope.user_id() != user_id {
                return Err(DomainError::validation(format!(
                    "stream contains wrong user_id at index {idx}"
                )));
            }
            if envelope.sequence_number() <= last {
                return Err(DomainError::validation(format!(
                    "non-monotonic sequence_number in stream (last={last}, found={})",
                    envelope.sequence_number()
                )));
            }
            last = envelope.sequence_number();
        }

        let mut account = self.open_account(user_id);
        for envelope in stream {
            account.apply(envelope.payload());
        }

        if account.total_allocated() > account.total_max()
            || account.monthly_used() > account.monthly_max()
            || account.referral_used() > account.referral_max()
        {
            return Err(DomainError::validation(
                "replayed stream violates account caps",
            ));
        }

        Ok(account)
    }

    fn execute(
        &self,
        account: &mut CreditAccount,
        command: AccountCommand,
    ) -> DomainResult<Vec<AccountEvent>> {
        let events = account.handle(&command)?;
        for e in &events {
            account.apply(e);
        }
        tracing::debug!(
            user_id = %account.user_id(),
            applied = events.len(),
            balance = account.current_balance(),
            "account command applied"
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use creditkit_core::AggregateRoot;
    use creditkit_referral::{CodeStatus, RedeemCode};

    fn engine() -> AccountingEngine {
        AccountingEngine::new(LimitPolicy::default()).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 5).unwrap()
    }

    /// Build a pending code issued by `issuer`, redeemed by a fresh user.
    fn pending_code(engine: &AccountingEngine, issuer: &CreditAccount) -> ReferralCode {
        let slot = engine.open_slot(today());
        let mut code = engine
            .issue_referral_code(issuer, &slot, Code::generate(), now())
            .unwrap();
        let events = code
            .handle(&ReferralCommand::RedeemCode(RedeemCode {
                code: code.code().clone(),
                referred_user: UserId::new(),
                occurred_at: now(),
            }))
            .unwrap();
        for e in &events {
            code.apply(e);
        }
        code
    }

    #[test]
    fn engine_rejects_invalid_policy() {
        let err = AccountingEngine::new(LimitPolicy {
            lifetime_cap: 9,
            ..LimitPolicy::default()
        })
        .unwrap_err();
        match err {
            ConfigError::CapSumMismatch { .. } => {}
            _ => panic!("Expected CapSumMismatch"),
        }
    }

    #[test]
    fn signup_then_three_monthly_grants_then_terminal() {
        // Scenario: signup bonus plus months 1-3 allocate 4 credits; the 4th
        // monthly grant is terminally rejected.
        let engine = engine();
        let mut account = engine.open_account(UserId::new());

        engine.apply_signup_bonus(&mut account, now()).unwrap();
        for month in 1..=3 {
            engine.apply_monthly_grant(&mut account, month, now()).unwrap();
        }

        assert_eq!(account.monthly_used(), 3);
        assert_eq!(account.total_allocated(), 4);

        let err = engine.apply_monthly_grant(&mut account, 4, now()).unwrap_err();
        assert_eq!(err, DomainError::MonthlyLimitReached);
        assert_eq!(account.monthly_used(), 3);
    }

    #[test]
    fn qualification_at_the_cap_boundary() {
        // referral_used 5 of 6: one more qualification succeeds, the next is
        // rejected and its code stays pending.
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        for _ in 0..5 {
            let mut code = pending_code(&engine, &issuer);
            engine.qualify_referral(&mut issuer, &mut code, now()).unwrap();
        }
        assert_eq!(issuer.referral_used(), 5);

        let mut sixth = pending_code(&engine, &issuer);
        engine.qualify_referral(&mut issuer, &mut sixth, now()).unwrap();
        assert_eq!(issuer.referral_used(), 6);
        assert_eq!(sixth.status(), CodeStatus::Qualified);
        assert!(sixth.qualified_at().is_some());

        let mut seventh = pending_code(&engine, &issuer);
        let err = engine
            .qualify_referral(&mut issuer, &mut seventh, now())
            .unwrap_err();
        assert_eq!(err, DomainError::LifetimeLimitReached);
        assert_eq!(seventh.status(), CodeStatus::Pending);
        assert_eq!(issuer.referral_used(), 6);
    }

    #[test]
    fn failed_qualification_is_atomic() {
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        for _ in 0..6 {
            let mut code = pending_code(&engine, &issuer);
            engine.qualify_referral(&mut issuer, &mut code, now()).unwrap();
        }

        let mut over_cap = pending_code(&engine, &issuer);
        let issuer_before = issuer.clone();
        let code_before = over_cap.clone();

        let err = engine
            .qualify_referral(&mut issuer, &mut over_cap, now())
            .unwrap_err();
        assert_eq!(err, DomainError::LifetimeLimitReached);
        assert_eq!(issuer, issuer_before);
        assert_eq!(over_cap, code_before);
    }

    #[test]
    fn qualify_requires_a_pending_code() {
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        let slot = engine.open_slot(today());
        let mut unused = engine
            .issue_referral_code(&issuer, &slot, Code::generate(), now())
            .unwrap();

        let err = engine
            .qualify_referral(&mut issuer, &mut unused, now())
            .unwrap_err();
        match err {
            DomainError::InvalidReferralCode(_) => {}
            _ => panic!("Expected InvalidReferralCode for an unused code"),
        }
        assert_eq!(issuer.referral_used(), 0);
    }

    #[test]
    fn qualify_rejects_a_foreign_code() {
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        let other = engine.open_account(UserId::new());
        let mut code = pending_code(&engine, &other);

        let err = engine
            .qualify_referral(&mut issuer, &mut code, now())
            .unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for issuer mismatch"),
        }
    }

    #[test]
    fn exhausted_slot_is_a_monthly_limit_not_a_lifetime_one() {
        // Scenario: slot remaining 0 but referral_used 2 < 6 must surface the
        // slot-tier kind, which resets next month.
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        for _ in 0..2 {
            let mut code = pending_code(&engine, &issuer);
            engine.qualify_referral(&mut issuer, &mut code, now()).unwrap();
        }

        let mut slot = engine.open_slot(today());
        for _ in 0..3 {
            slot.record_issued();
        }

        let err = engine
            .issue_referral_code(&issuer, &slot, Code::generate(), now())
            .unwrap_err();
        assert_eq!(err, DomainError::MonthlyLimitReached);
        assert!(issuer.has_referral_headroom());
    }

    #[test]
    fn lifetime_capped_issuer_cannot_issue_even_with_open_slot() {
        let engine = engine();
        let mut issuer = engine.open_account(UserId::new());
        for _ in 0..6 {
            let mut code = pending_code(&engine, &issuer);
            engine.qualify_referral(&mut issuer, &mut code, now()).unwrap();
        }

        let slot = engine.open_slot(today());
        let err = engine
            .issue_referral_code(&issuer, &slot, Code::generate(), now())
            .unwrap_err();
        assert_eq!(err, DomainError::LifetimeLimitReached);
    }

    #[test]
    fn redeem_with_zero_balance_is_rejected() {
        let engine = engine();
        let mut account = engine.open_account(UserId::new());
        let err = engine.redeem_credit(&mut account, now()).unwrap_err();
        assert_eq!(err, DomainError::InsufficientCredits);
        assert_eq!(account.current_balance(), 0);
    }

    #[test]
    fn recompute_flags_is_idempotent_and_side_effect_free() {
        let engine = engine();
        let mut account = engine.open_account(UserId::new());
        engine.apply_signup_bonus(&mut account, now()).unwrap();
        let slot = engine.open_slot(today());

        let before = account.clone();
        let a = engine.recompute_flags(&account, &slot, today());
        let b = engine.recompute_flags(&account, &slot, today());
        assert_eq!(a, b);
        assert_eq!(account, before);
        assert_eq!(a.available_credits, 1);
        assert!(a.can_create_referral);
    }

    #[test]
    fn replay_rebuilds_the_same_state() {
        let engine = engine();
        let user_id = UserId::new();
        let mut live = engine.open_account(user_id);

        let mut stream = Vec::new();
        let mut seq = 0u64;
        let mut record = |events: Vec<AccountEvent>, stream: &mut Vec<_>| {
            for e in events {
                seq += 1;
                stream.push(EventEnvelope::new(
                    uuid::Uuid::now_v7(),
                    user_id,
                    seq,
                    e,
                ));
            }
        };

        record(engine.apply_signup_bonus(&mut live, now()).unwrap(), &mut stream);
        record(
            engine.apply_monthly_grant(&mut live, 1, now()).unwrap(),
            &mut stream,
        );
        record(engine.redeem_credit(&mut live, now()).unwrap(), &mut stream);

        let replayed = engine.replay(user_id, &stream).unwrap();
        assert_eq!(replayed, live);
        assert_eq!(replayed.version(), 3);
    }

    #[test]
    fn replay_rejects_a_foreign_stream() {
        let engine = engine();
        let user_id = UserId::new();
        let stream = vec![EventEnvelope::new(
            uuid::Uuid::now_v7(),
            UserId::new(),
            1,
            AccountEvent::SignupBonusGranted(creditkit_account::SignupBonusGranted {
                user_id,
                amount: 1,
                occurred_at: now(),
            }),
        )];

        let err = engine.replay(user_id, &stream).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for wrong user_id"),
        }
    }

    #[test]
    fn replay_rejects_non_monotonic_sequences() {
        let engine = engine();
        let user_id = UserId::new();
        let event = AccountEvent::SignupBonusGranted(creditkit_account::SignupBonusGranted {
            user_id,
            amount: 1,
            occurred_at: now(),
        });
        let stream = vec![
            EventEnvelope::new(uuid::Uuid::now_v7(), user_id, 2, event.clone()),
            EventEnvelope::new(uuid::Uuid::now_v7(), user_id, 2, event),
        ];

        let err = engine.replay(user_id, &stream).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for duplicate sequence"),
        }
    }

    #[test]
    fn replay_rejects_a_stream_that_overflows_the_caps() {
        let engine = engine();
        let user_id = UserId::new();
        let mut stream = Vec::new();
        for seq in 1..=7u64 {
            stream.push(EventEnvelope::new(
                uuid::Uuid::now_v7(),
                user_id,
                seq,
                AccountEvent::ReferralCreditGranted(creditkit_account::ReferralCreditGranted {
                    user_id,
                    code: Code::generate(),
                    occurred_at: now(),
                }),
            ));
        }

        let err = engine.replay(user_id, &stream).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for cap overflow"),
        }
    }
}
