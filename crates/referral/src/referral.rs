use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use creditkit_core::{Aggregate, AggregateRoot, DomainError, UserId};
use creditkit_events::Event;

use crate::code::Code;

/// Referral code lifecycle status.
///
/// `Qualified` and `Blocked` are terminal: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeStatus {
    Unused,
    Pending,
    Qualified,
    Blocked,
}

/// Aggregate root: one user-issued referral code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferralCode {
    code: Code,
    issuer: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    referred_user: Option<UserId>,
    qualified_at: Option<DateTime<Utc>>,
    status: CodeStatus,
    version: u64,
    created: bool,
}

impl ReferralCode {
    /// Create an empty, not-yet-issued aggregate instance for rehydration.
    pub fn empty(code: Code) -> Self {
        Self {
            code,
            issuer: None,
            created_at: None,
            referred_user: None,
            qualified_at: None,
            status: CodeStatus::Unused,
            version: 0,
            created: false,
        }
    }

    pub fn code(&self) -> &Code {
        &self.code
    }

    pub fn issuer(&self) -> Option<UserId> {
        self.issuer
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn referred_user(&self) -> Option<UserId> {
        self.referred_user
    }

    pub fn qualified_at(&self) -> Option<DateTime<Utc>> {
        self.qualified_at
    }

    pub fn status(&self) -> CodeStatus {
        self.status
    }

    /// Whether the lifecycle can still advance.
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, CodeStatus::Qualified | CodeStatus::Blocked)
    }
}

impl AggregateRoot for ReferralCode {
    type Id = Code;

    fn id(&self) -> &Self::Id {
        &self.code
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssueCode (a user mints a new code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCode {
    pub code: Code,
    pub issuer: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RedeemCode (a new signup enters the code).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemCode {
    pub code: Code,
    pub referred_user: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: QualifyCode (the referred user completed a download).
///
/// Wishlist-adds and views are analytics-only and must never produce this
/// command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifyCode {
    pub code: Code,
    pub occurred_at: DateTime<Utc>,
}

/// Command: BlockCode (abuse decision from an external collaborator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCode {
    pub code: Code,
    /// Optional human-readable reason for blocking.
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferralCommand {
    IssueCode(IssueCode),
    RedeemCode(RedeemCode),
    QualifyCode(QualifyCode),
    BlockCode(BlockCode),
}

/// Event: CodeIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeIssued {
    pub code: Code,
    pub issuer: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CodeRedeemed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRedeemed {
    pub code: Code,
    pub referred_user: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CodeQualified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeQualified {
    pub code: Code,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CodeBlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlocked {
    pub code: Code,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReferralEvent {
    CodeIssued(CodeIssued),
    CodeRedeemed(CodeRedeemed),
    CodeQualified(CodeQualified),
    CodeBlocked(CodeBlocked),
}

impl Event for ReferralEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReferralEvent::CodeIssued(_) => "referral.code.issued",
            ReferralEvent::CodeRedeemed(_) => "referral.code.redeemed",
            ReferralEvent::CodeQualified(_) => "referral.code.qualified",
            ReferralEvent::CodeBlocked(_) => "referral.code.blocked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReferralEvent::CodeIssued(e) => e.occurred_at,
            ReferralEvent::CodeRedeemed(e) => e.occurred_at,
            ReferralEvent::CodeQualified(e) => e.occurred_at,
            ReferralEvent::CodeBlocked(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ReferralCode {
    type Command = ReferralCommand;
    type Event = ReferralEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReferralEvent::CodeIssued(e) => {
                self.code = e.code.clone();
                self.issuer = Some(e.issuer);
                self.created_at = Some(e.occurred_at);
                self.status = CodeStatus::Unused;
                self.created = true;
            }
            ReferralEvent::CodeRedeemed(e) => {
                self.referred_user = Some(e.referred_user);
                self.status = CodeStatus::Pending;
            }
            ReferralEvent::CodeQualified(e) => {
                self.qualified_at = Some(e.occurred_at);
                self.status = CodeStatus::Qualified;
            }
            ReferralEvent::CodeBlocked(_) => {
                self.status = CodeStatus::Blocked;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReferralCommand::IssueCode(cmd) => self.handle_issue(cmd),
            ReferralCommand::RedeemCode(cmd) => self.handle_redeem(cmd),
            ReferralCommand::QualifyCode(cmd) => self.handle_qualify(cmd),
            ReferralCommand::BlockCode(cmd) => self.handle_block(cmd),
        }
    }
}

impl ReferralCode {
    fn ensure_code(&self, code: &Code) -> Result<(), DomainError> {
        if &self.code != code {
            return Err(DomainError::validation("code mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssueCode) -> Result<Vec<ReferralEvent>, DomainError> {
        self.ensure_code(&cmd.code)?;
        if self.created {
            return Err(DomainError::invalid_code("code already issued"));
        }

        Ok(vec![ReferralEvent::CodeIssued(CodeIssued {
            code: cmd.code.clone(),
            issuer: cmd.issuer,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_redeem(&self, cmd: &RedeemCode) -> Result<Vec<ReferralEvent>, DomainError> {
        self.ensure_code(&cmd.code)?;
        if !self.created {
            return Err(DomainError::ReferralCodeNotFound);
        }

        // Rejected before any state consideration: a user never redeems their
        // own code.
        if self.issuer == Some(cmd.referred_user) {
            return Err(DomainError::SelfReferralNotAllowed);
        }

        match self.status {
            CodeStatus::Unused => Ok(vec![ReferralEvent::CodeRedeemed(CodeRedeemed {
                code: cmd.code.clone(),
                referred_user: cmd.referred_user,
                occurred_at: cmd.occurred_at,
            })]),
            CodeStatus::Blocked => Err(DomainError::invalid_code("code is blocked")),
            CodeStatus::Pending | CodeStatus::Qualified => {
                Err(DomainError::invalid_code("code was already redeemed"))
            }
        }
    }

    fn handle_qualify(&self, cmd: &QualifyCode) -> Result<Vec<ReferralEvent>, DomainError> {
        self.ensure_code(&cmd.code)?;
        if !self.created {
            return Err(DomainError::ReferralCodeNotFound);
        }

        if self.status != CodeStatus::Pending {
            return Err(DomainError::invalid_code(
                "only a pending code can qualify",
            ));
        }

        Ok(vec![ReferralEvent::CodeQualified(CodeQualified {
            code: cmd.code.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_block(&self, cmd: &BlockCode) -> Result<Vec<ReferralEvent>, DomainError> {
        self.ensure_code(&cmd.code)?;
        if !self.created {
            return Err(DomainError::ReferralCodeNotFound);
        }

        match self.status {
            CodeStatus::Unused | CodeStatus::Pending => {
                Ok(vec![ReferralEvent::CodeBlocked(CodeBlocked {
                    code: cmd.code.clone(),
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            CodeStatus::Qualified | CodeStatus::Blocked => {
                Err(DomainError::invalid_code("code state is terminal"))
            }
        }
    }
}
