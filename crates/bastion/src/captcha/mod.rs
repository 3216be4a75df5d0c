//! Challenge issuance and verification.
//!
//! Only the text challenge is generated; other challenge kinds share the
//! cache record format but have no generator.

mod generator;
mod verifier;

pub use generator::CaptchaGenerator;
pub use verifier::CaptchaVerifier;

use serde::{Deserialize, Serialize};

/// Payload stored in [`bastion_common::CacheEntry::data`] for text challenges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChallengeData {
    /// The expected answer
    pub answer: String,
}
