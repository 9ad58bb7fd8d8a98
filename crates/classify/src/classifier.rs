//! Closed error taxonomy and the classification function.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use creditkit_core::DomainError;

/// The closed set of failure kinds callers can observe.
///
/// Deserializing an unrecognized code yields `UnknownError` (the conservative
/// default), so new server-side kinds degrade gracefully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MonthlyLimitReached,
    LifetimeLimitReached,
    InvalidReferralCode,
    ReferralCodeNotFound,
    ReferralCodeExpired,
    SelfReferralNotAllowed,
    InsufficientCredits,
    AuthenticationError,
    NetworkError,
    RateLimitError,
    ServerError,
    UnknownError,
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Ok(Self::from_code(&code).unwrap_or(ErrorKind::UnknownError))
    }
}

impl ErrorKind {
    /// Retry policy is a total function of the kind. Retryable failures
    /// expect caller-applied backoff with a bounded number of attempts.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError
                | ErrorKind::RateLimitError
                | ErrorKind::ServerError
                | ErrorKind::UnknownError
        )
    }

    /// Stable key the presentation layer resolves to localized copy.
    pub fn user_message_key(self) -> &'static str {
        match self {
            ErrorKind::MonthlyLimitReached => "error.monthly_limit_reached",
            ErrorKind::LifetimeLimitReached => "error.lifetime_limit_reached",
            ErrorKind::InvalidReferralCode => "error.invalid_referral_code",
            ErrorKind::ReferralCodeNotFound => "error.referral_code_not_found",
            ErrorKind::ReferralCodeExpired => "error.referral_code_expired",
            ErrorKind::SelfReferralNotAllowed => "error.self_referral_not_allowed",
            ErrorKind::InsufficientCredits => "error.insufficient_credits",
            ErrorKind::AuthenticationError => "error.authentication",
            ErrorKind::NetworkError => "error.network",
            ErrorKind::RateLimitError => "error.rate_limit",
            ErrorKind::ServerError => "error.server",
            ErrorKind::UnknownError => "error.unknown",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::MonthlyLimitReached => "monthly_limit_reached",
            ErrorKind::LifetimeLimitReached => "lifetime_limit_reached",
            ErrorKind::InvalidReferralCode => "invalid_referral_code",
            ErrorKind::ReferralCodeNotFound => "referral_code_not_found",
            ErrorKind::ReferralCodeExpired => "referral_code_expired",
            ErrorKind::SelfReferralNotAllowed => "self_referral_not_allowed",
            ErrorKind::InsufficientCredits => "insufficient_credits",
            ErrorKind::AuthenticationError => "authentication_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::RateLimitError => "rate_limit_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::UnknownError => "unknown_error",
        }
    }

    /// Resolve a machine-readable domain code. Unknown codes return `None` so
    /// classification can fall through to weaker signals.
    fn from_code(code: &str) -> Option<Self> {
        let kind = match code.trim().to_ascii_lowercase().as_str() {
            "monthly_limit_reached" => ErrorKind::MonthlyLimitReached,
            "lifetime_limit_reached" => ErrorKind::LifetimeLimitReached,
            "invalid_referral_code" => ErrorKind::InvalidReferralCode,
            "referral_code_not_found" => ErrorKind::ReferralCodeNotFound,
            "referral_code_expired" => ErrorKind::ReferralCodeExpired,
            "self_referral_not_allowed" => ErrorKind::SelfReferralNotAllowed,
            "insufficient_credits" => ErrorKind::InsufficientCredits,
            "authentication_error" => ErrorKind::AuthenticationError,
            "network_error" => ErrorKind::NetworkError,
            "rate_limit_error" => ErrorKind::RateLimitError,
            "server_error" => ErrorKind::ServerError,
            _ => return None,
        };
        Some(kind)
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure: the only error shape surfaced to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub user_message_key: &'static str,
    pub message: String,
}

impl ClassifiedError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            user_message_key: kind.user_message_key(),
            message: message.into(),
        }
    }
}

/// A failure at the transport boundary, as delivered by the surrounding
/// system: decoded status plus whatever the server put in the body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("transport failure (status {status:?}, code {code:?}): {message}")]
pub struct TransportFailure {
    /// HTTP status, if a response arrived at all.
    pub status: Option<u16>,
    /// Machine-readable domain code from the response body, if present.
    pub code: Option<String>,
    pub message: String,
    pub timed_out: bool,
}

impl TransportFailure {
    /// The request never produced a response (connection refused, DNS, ...).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: false,
        }
    }

    /// The request exceeded its deadline.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
            timed_out: true,
        }
    }

    /// A response arrived with a failure status.
    pub fn api(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
            timed_out: false,
        }
    }
}

/// Any raw failure an accounting operation can produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFailure {
    Domain(DomainError),
    Transport(TransportFailure),
}

impl From<DomainError> for RawFailure {
    fn from(value: DomainError) -> Self {
        RawFailure::Domain(value)
    }
}

impl From<TransportFailure> for RawFailure {
    fn from(value: TransportFailure) -> Self {
        RawFailure::Transport(value)
    }
}

/// Classify a raw failure into the closed taxonomy.
///
/// Pure and stateless: same input, same output, no panics. Precedence: a
/// machine-readable domain code always wins; then the HTTP status class; the
/// textual heuristics are a last-resort defense against unstructured upstream
/// errors, not the primary mechanism.
pub fn classify(raw: &RawFailure) -> ClassifiedError {
    match raw {
        RawFailure::Domain(err) => classify_domain(err),
        RawFailure::Transport(failure) => classify_transport(failure),
    }
}

fn classify_domain(err: &DomainError) -> ClassifiedError {
    let kind = match err {
        DomainError::MonthlyLimitReached => ErrorKind::MonthlyLimitReached,
        DomainError::LifetimeLimitReached => ErrorKind::LifetimeLimitReached,
        DomainError::InsufficientCredits => ErrorKind::InsufficientCredits,
        DomainError::InvalidReferralCode(_) => ErrorKind::InvalidReferralCode,
        DomainError::ReferralCodeNotFound => ErrorKind::ReferralCodeNotFound,
        DomainError::ReferralCodeExpired => ErrorKind::ReferralCodeExpired,
        DomainError::SelfReferralNotAllowed => ErrorKind::SelfReferralNotAllowed,
        // Outside the closed wire taxonomy: surface conservatively.
        DomainError::AlreadyGranted | DomainError::Validation(_) | DomainError::InvalidId(_) => {
            tracing::warn!(
                target: "classify::unknown",
                error = %err,
                "domain error outside the closed taxonomy"
            );
            ErrorKind::UnknownError
        }
    };
    ClassifiedError::new(kind, err.to_string())
}

fn classify_transport(failure: &TransportFailure) -> ClassifiedError {
    // 1) Machine-readable domain code wins over everything else.
    if let Some(code) = failure.code.as_deref() {
        if let Some(kind) = ErrorKind::from_code(code) {
            return ClassifiedError::new(kind, failure.message.clone());
        }
    }

    // 2) Status class.
    if failure.timed_out {
        return ClassifiedError::new(ErrorKind::NetworkError, failure.message.clone());
    }
    match failure.status {
        None => {
            // No response at all: the transport never reached the server.
            return ClassifiedError::new(ErrorKind::NetworkError, failure.message.clone());
        }
        Some(401) | Some(403) => {
            return ClassifiedError::new(ErrorKind::AuthenticationError, failure.message.clone());
        }
        Some(408) => {
            return ClassifiedError::new(ErrorKind::NetworkError, failure.message.clone());
        }
        Some(429) => {
            return ClassifiedError::new(ErrorKind::RateLimitError, failure.message.clone());
        }
        Some(status) if status >= 500 => {
            return ClassifiedError::new(ErrorKind::ServerError, failure.message.clone());
        }
        Some(_) => {}
    }

    // 3) Last-resort textual heuristics for unstructured upstream errors.
    if let Some(kind) = match_text(&failure.message) {
        return ClassifiedError::new(kind, failure.message.clone());
    }

    tracing::warn!(
        target: "classify::unknown",
        status = ?failure.status,
        message = %failure.message,
        "unclassifiable transport failure"
    );
    ClassifiedError::new(ErrorKind::UnknownError, failure.message.clone())
}

fn match_text(message: &str) -> Option<ErrorKind> {
    let text = message.to_ascii_lowercase();
    if text.contains("rate limit") || text.contains("too many requests") {
        return Some(ErrorKind::RateLimitError);
    }
    if text.contains("unauthorized") || text.contains("forbidden") || text.contains("authentication")
    {
        return Some(ErrorKind::AuthenticationError);
    }
    if text.contains("network")
        || text.contains("connection")
        || text.contains("offline")
        || text.contains("timed out")
        || text.contains("timeout")
    {
        return Some(ErrorKind::NetworkError);
    }
    None
}

/// The wire error contract: `{code, message, retryable}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ErrorEnvelope {
    /// Rebuild a classified error from a received envelope. The kind is the
    /// source of truth for retry policy; a tampered `retryable` flag is
    /// ignored.
    pub fn into_classified(self) -> ClassifiedError {
        ClassifiedError::new(self.code, self.message)
    }
}

impl From<&ClassifiedError> for ErrorEnvelope {
    fn from(value: &ClassifiedError) -> Self {
        Self {
            code: value.kind,
            message: value.message.clone(),
            retryable: value.retryable,
        }
    }
}
