//! Challenge verification.
//!
//! A correct answer flips the entry to verified under the same key, so a
//! later status check can confirm it; a wrong answer burns the challenge.
//! Both transitions are single atomic backend operations, so concurrent
//! callers cannot redeem one challenge twice.

use bastion_common::{BastionError, CaptchaResult, ChallengeType};

use super::TextChallengeData;
use crate::resilience::GuardedCache;

/// Challenge verifier
#[derive(Debug, Default)]
pub struct CaptchaVerifier;

impl CaptchaVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Check an answer against the stored challenge
    pub async fn verify(
        &self,
        cache: &GuardedCache,
        challenge_id: &str,
        user_answer: &str,
    ) -> Result<CaptchaResult, BastionError> {
        let Some(entry) = cache.get_entry(challenge_id).await? else {
            return Ok(CaptchaResult::failed("Challenge expired or invalid"));
        };

        if entry.is_verified() {
            return Ok(CaptchaResult::failed("Challenge already verified"));
        }

        let success = match entry.kind {
            ChallengeType::Text => serde_json::from_value::<TextChallengeData>(entry.data.clone())
                .is_ok_and(|data| data.answer.eq_ignore_ascii_case(user_answer.trim())),
            kind => {
                tracing::warn!(challenge_id = %challenge_id, kind = ?kind, "Unsupported challenge kind");
                false
            }
        };

        if success {
            // Lost the race to a concurrent verify, or the entry expired meanwhile
            if !cache.mark_verified(challenge_id).await? {
                return Ok(CaptchaResult::failed("Challenge already verified"));
            }
            tracing::info!(challenge_id = %challenge_id, "Challenge verified");
            Ok(CaptchaResult::passed())
        } else {
            cache.delete_entry(challenge_id).await?;
            tracing::debug!(challenge_id = %challenge_id, "Challenge verification failed");
            Ok(CaptchaResult::failed("Incorrect answer"))
        }
    }

    /// Whether the challenge was verified; a verified entry is consumed
    pub async fn check_status(&self, cache: &GuardedCache, challenge_id: &str) -> Result<bool, BastionError> {
        cache.take_verified(challenge_id).await
    }
}
