//! Referral code value object.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use creditkit_core::{DomainError, DomainResult};

/// A referral code: fixed-length alphanumeric, case-insensitive.
///
/// Codes are normalized to uppercase on construction, so equality and hashing
/// already honor case-insensitive uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code(String);

impl Code {
    pub const LEN: usize = 8;

    /// Parse and normalize user-supplied input.
    pub fn parse(s: &str) -> DomainResult<Self> {
        let normalized = s.trim().to_ascii_uppercase();
        if normalized.len() != Self::LEN {
            return Err(DomainError::invalid_code(format!(
                "code must be {} characters",
                Self::LEN
            )));
        }
        if !normalized.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(DomainError::invalid_code("code must be alphanumeric"));
        }
        Ok(Self(normalized))
    }

    /// Mint a fresh code from UUIDv7 entropy.
    ///
    /// The tail of the uuid carries the random bits; the timestamped head would
    /// collide for codes minted in the same instant.
    pub fn generate() -> Self {
        let hex = Uuid::now_v7().simple().to_string();
        let tail = &hex[hex.len() - Self::LEN..];
        Self(tail.to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Code {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Code {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Code {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Code> for String {
    fn from(value: Code) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes_case() {
        let a = Code::parse("abcd1234").unwrap();
        let b = Code::parse("ABCD1234").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "ABCD1234");
    }

    #[test]
    fn parse_trims_whitespace() {
        let code = Code::parse("  abcd1234  ").unwrap();
        assert_eq!(code.as_str(), "ABCD1234");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = Code::parse("abc").unwrap_err();
        match err {
            DomainError::InvalidReferralCode(_) => {}
            _ => panic!("Expected InvalidReferralCode for short input"),
        }
    }

    #[test]
    fn parse_rejects_non_alphanumeric() {
        let err = Code::parse("abcd-123").unwrap_err();
        match err {
            DomainError::InvalidReferralCode(_) => {}
            _ => panic!("Expected InvalidReferralCode for punctuation"),
        }
    }

    #[test]
    fn generated_codes_are_well_formed() {
        let code = Code::generate();
        assert_eq!(code.as_str().len(), Code::LEN);
        assert!(code.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
        // Round-trips through parse.
        assert_eq!(Code::parse(code.as_str()).unwrap(), code);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Case variants of the same input always parse to the same code.
            #[test]
            fn parse_is_case_insensitive(s in "[a-zA-Z0-9]{8}") {
                let lower = Code::parse(&s.to_ascii_lowercase()).unwrap();
                let upper = Code::parse(&s.to_ascii_uppercase()).unwrap();
                prop_assert_eq!(lower, upper);
            }

            /// Arbitrary input never panics; accepted input is normalized.
            #[test]
            fn parse_never_panics(s in ".{0,32}") {
                if let Ok(code) = Code::parse(&s) {
                    prop_assert_eq!(code.as_str(), s.trim().to_ascii_uppercase());
                }
            }
        }
    }
}
