//! Core types shared across Bastion components.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verification state of an issued challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    /// Issued, not yet answered correctly
    #[default]
    Pending,
    /// Answered correctly, awaiting consumption by the caller
    Verified,
}

/// Kind of payload stored for a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeType {
    /// Distorted text, answered by typing
    Text,
    /// Click-point puzzle
    Click,
    /// Slide-to-fit puzzle
    Slide,
    /// Rotate-to-align puzzle
    Rotate,
}

/// Record stored in the cache for every issued challenge.
///
/// `data` is opaque to the cache layer; only the issuing and verifying
/// code interprets it according to `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Challenge payload (expected answer, geometry, ...)
    pub data: serde_json::Value,

    /// Payload type tag
    pub kind: ChallengeType,

    /// Pending until verification succeeds
    pub status: ChallengeStatus,

    /// Creation timestamp (Unix epoch seconds)
    pub created_at: i64,
}

impl CacheEntry {
    pub fn new(kind: ChallengeType, data: serde_json::Value) -> Self {
        Self {
            data,
            kind,
            status: ChallengeStatus::Pending,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_verified(&self) -> bool {
        self.status == ChallengeStatus::Verified
    }

    /// Flip the entry to verified
    pub fn mark_verified(&mut self) {
        self.status = ChallengeStatus::Verified;
    }
}

/// Challenge data sent to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    /// Unique challenge ID
    pub challenge_id: String,

    /// Payload type
    pub kind: ChallengeType,

    /// Base64-encoded image data URI
    pub image_data: String,

    /// Instructions for the user
    pub instructions: String,

    /// Challenge expiry timestamp
    pub expires_at: i64,
}

/// Challenge verification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CaptchaResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
        }
    }
}

/// Every constraint a configuration violated, in check order
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(Vec<String>);

impl ValidationErrors {
    pub fn new(errors: Vec<String>) -> Self {
        Self(errors)
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.0.push(error.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// `Ok(())` when nothing was violated
    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}
