//! Text challenge generation.
//!
//! Renders random characters into an SVG image the user must transcribe.

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::Rng;

use bastion_common::{BastionError, CacheEntry, CaptchaChallenge, ChallengeType};

use super::TextChallengeData;
use crate::resilience::GuardedCache;

const IMAGE_WIDTH: i32 = 200;
const IMAGE_HEIGHT: i32 = 80;

/// Challenge generator
pub struct CaptchaGenerator {
    answer_length: usize,
    noise_lines: usize,
}

impl Default for CaptchaGenerator {
    fn default() -> Self {
        Self::new(5, 15)
    }
}

impl CaptchaGenerator {
    pub fn new(answer_length: usize, noise_lines: usize) -> Self {
        Self {
            answer_length: answer_length.max(1),
            noise_lines,
        }
    }

    /// Issue a challenge and store its answer as a pending cache entry.
    ///
    /// `ttl_secs` only stamps `expires_at` for the client; the backend
    /// enforces its own configured TTL.
    pub async fn generate(
        &self,
        cache: &GuardedCache,
        ttl_secs: i64,
    ) -> Result<CaptchaChallenge, BastionError> {
        let challenge_id = generate_challenge_id();
        let answer = self.random_answer();
        let image_data = format!(
            "data:image/svg+xml;base64,{}",
            STANDARD.encode(self.render_svg(&answer))
        );

        let data = serde_json::to_value(TextChallengeData { answer })
            .map_err(|e| BastionError::Internal(e.to_string()))?;
        let entry = CacheEntry::new(ChallengeType::Text, data);
        cache.set_entry(&challenge_id, &entry).await?;

        tracing::debug!(challenge_id = %challenge_id, "Generated challenge");

        Ok(CaptchaChallenge {
            challenge_id,
            kind: ChallengeType::Text,
            image_data,
            instructions: "Type the characters shown above (case insensitive)".to_string(),
            expires_at: entry.created_at + ttl_secs,
        })
    }

    fn random_answer(&self) -> String {
        let mut rng = rand::rng();
        (0..self.answer_length)
            .map(|_| {
                let idx = rng.random_range(0..36u8);
                if idx < 10 {
                    (b'0' + idx) as char
                } else {
                    (b'A' + idx - 10) as char
                }
            })
            .collect()
    }

    fn render_svg(&self, text: &str) -> String {
        let mut rng = rand::rng();

        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{IMAGE_WIDTH}" height="{IMAGE_HEIGHT}">"#
        );
        svg.push_str(r##"<rect width="100%" height="100%" fill="#1a1a2e"/>"##);

        for _ in 0..self.noise_lines {
            let (x1, y1) = (rng.random_range(0..IMAGE_WIDTH), rng.random_range(0..IMAGE_HEIGHT));
            let (x2, y2) = (rng.random_range(0..IMAGE_WIDTH), rng.random_range(0..IMAGE_HEIGHT));
            let opacity = rng.random_range(20..50);
            svg.push_str(&format!(
                r#"<line x1="{x1}" y1="{y1}" x2="{x2}" y2="{y2}" stroke="rgba(255,255,255,0.{opacity})" stroke-width="1"/>"#
            ));
        }

        let char_width = IMAGE_WIDTH as f32 / (text.len() as f32 + 1.0);
        for (i, c) in text.chars().enumerate() {
            let x = char_width * (i as f32 + 0.8);
            let y = 50 + rng.random_range(-10..10);
            let rotation = rng.random_range(-15..15);
            let (r, g, b) = (
                rng.random_range(150..255),
                rng.random_range(150..255),
                rng.random_range(150..255),
            );
            svg.push_str(&format!(
                r#"<text x="{x}" y="{y}" font-family="monospace" font-size="32" font-weight="bold" fill="rgb({r},{g},{b})" transform="rotate({rotation} {x} {y})">{c}</text>"#
            ));
        }

        svg.push_str("</svg>");
        svg
    }
}

/// Random URL-safe challenge id
fn generate_challenge_id() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
