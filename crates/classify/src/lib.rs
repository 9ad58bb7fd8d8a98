//! `creditkit-classify` — failure classification.
//!
//! Maps every raw failure out of the accounting operations (typed domain
//! errors, transport failures) into a closed taxonomy carrying a retry policy
//! and a user-facing message key. No error reaches a human without passing
//! through [`classify`].

pub mod classifier;

pub use classifier::{
    ClassifiedError, ErrorEnvelope, ErrorKind, RawFailure, TransportFailure, classify,
};
