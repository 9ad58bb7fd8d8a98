use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditkit_core::{Aggregate, AggregateRoot, DomainError, LimitPolicy, UserId};
use creditkit_events::Event;
use creditkit_referral::Code;

/// Aggregate root: one user's credit account.
///
/// Counters split into three tiers with independent caps. `total_allocated`
/// counts every credit ever earned; `current_balance` is what remains
/// spendable. Redemption spends balance and never touches allocation.
///
/// The monthly tier is lifetime-capped and never resets; the calendar-month
/// referral-code slot lives in [`crate::summary::MonthlyReferralSlot`] and is
/// deliberately a different type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditAccount {
    user_id: UserId,
    monthly_used: u32,
    monthly_max: u32,
    referral_used: u32,
    referral_max: u32,
    signup_bonus: u32,
    /// Dedicated flag for the one-shot signup bonus. Never inferred from
    /// counters: the month-1 monthly credit would collide with it.
    signup_granted: bool,
    /// Month indexes (1-based, account life) already granted.
    granted_months: BTreeSet<u32>,
    total_allocated: u32,
    total_max: u32,
    current_balance: u32,
    version: u64,
}

impl CreditAccount {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    ///
    /// Caps come from the validated policy; counters start at zero.
    pub fn empty(user_id: UserId, policy: &LimitPolicy) -> Self {
        Self {
            user_id,
            monthly_used: 0,
            monthly_max: policy.monthly_cap,
            referral_used: 0,
            referral_max: policy.referral_cap,
            signup_bonus: policy.signup_bonus,
            signup_granted: false,
            granted_months: BTreeSet::new(),
            total_allocated: 0,
            total_max: policy.lifetime_cap,
            current_balance: 0,
            version: 0,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn monthly_used(&self) -> u32 {
        self.monthly_used
    }

    pub fn monthly_max(&self) -> u32 {
        self.monthly_max
    }

    pub fn referral_used(&self) -> u32 {
        self.referral_used
    }

    pub fn referral_max(&self) -> u32 {
        self.referral_max
    }

    pub fn total_allocated(&self) -> u32 {
        self.total_allocated
    }

    pub fn total_max(&self) -> u32 {
        self.total_max
    }

    pub fn current_balance(&self) -> u32 {
        self.current_balance
    }

    pub fn signup_granted(&self) -> bool {
        self.signup_granted
    }

    /// Terminal for the monthly tier: once true, no monthly grant is ever
    /// issued to this account again.
    pub fn all_monthly_credits_received(&self) -> bool {
        self.monthly_used >= self.monthly_max
    }

    /// Invariant helper: the referral tier still has lifetime headroom.
    pub fn has_referral_headroom(&self) -> bool {
        self.referral_used < self.referral_max
    }
}

impl AggregateRoot for CreditAccount {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.user_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: GrantSignupBonus (once, on account creation).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantSignupBonus {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: GrantMonthlyCredit for one calendar month of account life.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantMonthlyCredit {
    pub user_id: UserId,
    /// 1-based month of account life. At most one grant per month, for the
    /// first `monthly_max` months only.
    pub month_index: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: GrantReferralCredit (a referral of this user qualified).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantReferralCredit {
    pub user_id: UserId,
    pub code: Code,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RedeemCredit (spend one credit on a download).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCredit {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    GrantSignupBonus(GrantSignupBonus),
    GrantMonthlyCredit(GrantMonthlyCredit),
    GrantReferralCredit(GrantReferralCredit),
    RedeemCredit(RedeemCredit),
}

/// Event: SignupBonusGranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupBonusGranted {
    pub user_id: UserId,
    pub amount: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MonthlyCreditGranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyCreditGranted {
    pub user_id: UserId,
    pub month_index: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReferralCreditGranted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCreditGranted {
    pub user_id: UserId,
    pub code: Code,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CreditRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditRedeemed {
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountEvent {
    SignupBonusGranted(SignupBonusGranted),
    MonthlyCreditGranted(MonthlyCreditGranted),
    ReferralCreditGranted(ReferralCreditGranted),
    CreditRedeemed(CreditRedeemed),
}

impl Event for AccountEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::SignupBonusGranted(_) => "account.credit.signup_bonus_granted",
            AccountEvent::MonthlyCreditGranted(_) => "account.credit.monthly_granted",
            AccountEvent::ReferralCreditGranted(_) => "account.credit.referral_granted",
            AccountEvent::CreditRedeemed(_) => "account.credit.redeemed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AccountEvent::SignupBonusGranted(e) => e.occurred_at,
            AccountEvent::MonthlyCreditGranted(e) => e.occurred_at,
            AccountEvent::ReferralCreditGranted(e) => e.occurred_at,
            AccountEvent::CreditRedeemed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for CreditAccount {
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            AccountEvent::SignupBonusGranted(e) => {
                self.signup_granted = true;
                self.total_allocated += e.amount;
                self.current_balance += e.amount;
            }
            AccountEvent::MonthlyCreditGranted(e) => {
                self.monthly_used += 1;
                self.granted_months.insert(e.month_index);
                self.total_allocated += 1;
                self.current_balance += 1;
            }
            AccountEvent::ReferralCreditGranted(_) => {
                self.referral_used += 1;
                self.total_allocated += 1;
                self.current_balance += 1;
            }
            AccountEvent::CreditRedeemed(_) => {
                self.current_balance = self.current_balance.saturating_sub(1);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            AccountCommand::GrantSignupBonus(cmd) => self.handle_signup(cmd),
            AccountCommand::GrantMonthlyCredit(cmd) => self.handle_monthly(cmd),
            AccountCommand::GrantReferralCredit(cmd) => self.handle_referral(cmd),
            AccountCommand::RedeemCredit(cmd) => self.handle_redeem(cmd),
        }
    }
}

impl CreditAccount {
    fn ensure_user(&self, user_id: UserId) -> Result<(), DomainError> {
        if self.user_id != user_id {
            return Err(DomainError::validation("user_id mismatch"));
        }
        Ok(())
    }

    fn ensure_lifetime_headroom(&self, amount: u32) -> Result<(), DomainError> {
        if self.total_allocated + amount > self.total_max {
            return Err(DomainError::LifetimeLimitReached);
        }
        Ok(())
    }

    fn handle_signup(&self, cmd: &GrantSignupBonus) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_user(cmd.user_id)?;

        if self.signup_granted {
            return Err(DomainError::AlreadyGranted);
        }
        self.ensure_lifetime_headroom(self.signup_bonus)?;

        Ok(vec![AccountEvent::SignupBonusGranted(SignupBonusGranted {
            user_id: cmd.user_id,
            amount: self.signup_bonus,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_monthly(&self, cmd: &GrantMonthlyCredit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_user(cmd.user_id)?;

        if cmd.month_index == 0 {
            return Err(DomainError::validation("month_index is 1-based"));
        }
        // Terminal once the tier is exhausted; a month beyond the cap window
        // can never be granted either.
        if self.all_monthly_credits_received() || cmd.month_index > self.monthly_max {
            return Err(DomainError::MonthlyLimitReached);
        }
        if self.granted_months.contains(&cmd.month_index) {
            return Err(DomainError::AlreadyGranted);
        }
        self.ensure_lifetime_headroom(1)?;

        Ok(vec![AccountEvent::MonthlyCreditGranted(
            MonthlyCreditGranted {
                user_id: cmd.user_id,
                month_index: cmd.month_index,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_referral(&self, cmd: &GrantReferralCredit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_user(cmd.user_id)?;

        if !self.has_referral_headroom() {
            return Err(DomainError::LifetimeLimitReached);
        }
        self.ensure_lifetime_headroom(1)?;

        Ok(vec![AccountEvent::ReferralCreditGranted(
            ReferralCreditGranted {
                user_id: cmd.user_id,
                code: cmd.code.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_redeem(&self, cmd: &RedeemCredit) -> Result<Vec<AccountEvent>, DomainError> {
        self.ensure_user(cmd.user_id)?;

        if self.current_balance < 1 {
            return Err(DomainError::InsufficientCredits);
        }

        Ok(vec![AccountEvent::CreditRedeemed(CreditRedeemed {
            user_id: cmd.user_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_policy() -> LimitPolicy {
        LimitPolicy::default()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn test_code() -> Code {
        Code::parse("ABCD1234").unwrap()
    }

    fn fresh_account() -> CreditAccount {
        CreditAccount::empty(UserId::new(), &test_policy())
    }

    fn run(account: &mut CreditAccount, cmd: AccountCommand) -> Result<(), DomainError> {
        let events = account.handle(&cmd)?;
        for e in &events {
            account.apply(e);
        }
        Ok(())
    }

    fn signup_cmd(user_id: UserId) -> AccountCommand {
        AccountCommand::GrantSignupBonus(GrantSignupBonus {
            user_id,
            occurred_at: test_time(),
        })
    }

    fn monthly_cmd(user_id: UserId, month_index: u32) -> AccountCommand {
        AccountCommand::GrantMonthlyCredit(GrantMonthlyCredit {
            user_id,
            month_index,
            occurred_at: test_time(),
        })
    }

    fn referral_cmd(user_id: UserId) -> AccountCommand {
        AccountCommand::GrantReferralCredit(GrantReferralCredit {
            user_id,
            code: test_code(),
            occurred_at: test_time(),
        })
    }

    fn redeem_cmd(user_id: UserId) -> AccountCommand {
        AccountCommand::RedeemCredit(RedeemCredit {
            user_id,
            occurred_at: test_time(),
        })
    }

    #[test]
    fn signup_bonus_grants_once() {
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, signup_cmd(user)).unwrap();

        assert!(account.signup_granted());
        assert_eq!(account.total_allocated(), 1);
        assert_eq!(account.current_balance(), 1);

        let err = run(&mut account, signup_cmd(user)).unwrap_err();
        assert_eq!(err, DomainError::AlreadyGranted);
        assert_eq!(account.total_allocated(), 1);
    }

    #[test]
    fn signup_detection_uses_the_flag_not_counters() {
        // A month-1 credit makes total_allocated == 1 without any signup bonus;
        // the bonus must still be grantable afterwards.
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, monthly_cmd(user, 1)).unwrap();
        assert_eq!(account.total_allocated(), 1);
        assert!(!account.signup_granted());

        run(&mut account, signup_cmd(user)).unwrap();
        assert!(account.signup_granted());
        assert_eq!(account.total_allocated(), 2);
    }

    #[test]
    fn monthly_grants_stop_at_the_cap_and_never_reset() {
        let mut account = fresh_account();
        let user = account.user_id();
        for month in 1..=3 {
            run(&mut account, monthly_cmd(user, month)).unwrap();
        }
        assert_eq!(account.monthly_used(), 3);
        assert!(account.all_monthly_credits_received());

        let err = run(&mut account, monthly_cmd(user, 4)).unwrap_err();
        assert_eq!(err, DomainError::MonthlyLimitReached);
        assert_eq!(account.monthly_used(), 3);
    }

    #[test]
    fn monthly_grant_is_at_most_once_per_month() {
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, monthly_cmd(user, 1)).unwrap();
        let err = run(&mut account, monthly_cmd(user, 1)).unwrap_err();
        assert_eq!(err, DomainError::AlreadyGranted);
        assert_eq!(account.monthly_used(), 1);
    }

    #[test]
    fn monthly_grant_rejects_month_zero() {
        let mut account = fresh_account();
        let user = account.user_id();
        let err = run(&mut account, monthly_cmd(user, 0)).unwrap_err();
        match err {
            DomainError::Validation(_) => {}
            _ => panic!("Expected Validation error for month_index 0"),
        }
    }

    #[test]
    fn monthly_grant_rejects_month_beyond_cap_window() {
        let mut account = fresh_account();
        let user = account.user_id();
        let err = run(&mut account, monthly_cmd(user, 4)).unwrap_err();
        assert_eq!(err, DomainError::MonthlyLimitReached);
    }

    #[test]
    fn referral_grants_stop_at_the_lifetime_cap() {
        let mut account = fresh_account();
        let user = account.user_id();
        for _ in 0..6 {
            run(&mut account, referral_cmd(user)).unwrap();
        }
        assert_eq!(account.referral_used(), 6);
        assert!(!account.has_referral_headroom());

        let err = run(&mut account, referral_cmd(user)).unwrap_err();
        assert_eq!(err, DomainError::LifetimeLimitReached);
        assert_eq!(account.referral_used(), 6);
    }

    #[test]
    fn redeem_spends_balance_but_not_allocation() {
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, signup_cmd(user)).unwrap();
        run(&mut account, redeem_cmd(user)).unwrap();

        assert_eq!(account.current_balance(), 0);
        assert_eq!(account.total_allocated(), 1);
    }

    #[test]
    fn redeem_with_zero_balance_is_rejected() {
        let mut account = fresh_account();
        let user = account.user_id();
        let err = run(&mut account, redeem_cmd(user)).unwrap_err();
        assert_eq!(err, DomainError::InsufficientCredits);
        assert_eq!(account.current_balance(), 0);
    }

    #[test]
    fn fully_earned_account_hits_the_combined_cap() {
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, signup_cmd(user)).unwrap();
        for month in 1..=3 {
            run(&mut account, monthly_cmd(user, month)).unwrap();
        }
        for _ in 0..6 {
            run(&mut account, referral_cmd(user)).unwrap();
        }
        assert_eq!(account.total_allocated(), 10);
        assert_eq!(account.total_allocated(), account.total_max());
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let mut account = fresh_account();
        let user = account.user_id();
        run(&mut account, signup_cmd(user)).unwrap();
        let before = account.clone();
        let _ = account.handle(&monthly_cmd(user, 1));
        let _ = account.handle(&redeem_cmd(user));
        assert_eq!(account, before);
    }

    /// Random command interleavings never violate the account invariants, and
    /// tier counters never decrease.
    #[derive(Debug, Clone)]
    enum Op {
        Signup,
        Monthly(u32),
        Referral,
        Redeem,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Signup),
            (1u32..=5).prop_map(Op::Monthly),
            Just(Op::Referral),
            Just(Op::Redeem),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn invariants_hold_for_any_command_sequence(
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let mut account = fresh_account();
            let user = account.user_id();

            for op in ops {
                let prev_monthly = account.monthly_used();
                let prev_referral = account.referral_used();
                let prev_allocated = account.total_allocated();

                let cmd = match op {
                    Op::Signup => signup_cmd(user),
                    Op::Monthly(m) => monthly_cmd(user, m),
                    Op::Referral => referral_cmd(user),
                    Op::Redeem => redeem_cmd(user),
                };

                // Rejected commands must leave state untouched; accepted ones
                // must keep every invariant.
                let before = account.clone();
                match run(&mut account, cmd) {
                    Ok(()) => {}
                    Err(_) => prop_assert_eq!(&account, &before),
                }

                prop_assert!(account.monthly_used() <= account.monthly_max());
                prop_assert!(account.referral_used() <= account.referral_max());
                prop_assert!(account.total_allocated() <= account.total_max());
                prop_assert!(account.current_balance() <= account.total_allocated());

                // Monotonicity: used counters and allocation never decrease.
                prop_assert!(account.monthly_used() >= prev_monthly);
                prop_assert!(account.referral_used() >= prev_referral);
                prop_assert!(account.total_allocated() >= prev_allocated);

                // Allocation always decomposes into its tiers.
                let signup = if account.signup_granted() { 1 } else { 0 };
                prop_assert_eq!(
                    account.total_allocated(),
                    signup + account.monthly_used() + account.referral_used()
                );
            }
        }

        #[test]
        fn apply_is_deterministic(months in prop::collection::vec(1u32..=3, 1..3)) {
            let user_id = UserId::new();
            let policy = test_policy();

            let mut events = vec![AccountEvent::SignupBonusGranted(SignupBonusGranted {
                user_id,
                amount: policy.signup_bonus,
                occurred_at: test_time(),
            })];
            for m in months {
                events.push(AccountEvent::MonthlyCreditGranted(MonthlyCreditGranted {
                    user_id,
                    month_index: m,
                    occurred_at: test_time(),
                }));
            }

            let mut a = CreditAccount::empty(user_id, &policy);
            let mut b = CreditAccount::empty(user_id, &policy);
            for e in &events {
                a.apply(e);
                b.apply(e);
            }

            prop_assert_eq!(a, b);
        }
    }
}
