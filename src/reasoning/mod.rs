//! Reasoning service abstraction.
//!
//! Role loops call an external model through the [`ReasoningService`]
//! trait; OpenRouter is the shipped implementation. Callers must treat
//! malformed output as recoverable: [`extract_json`] returns a typed
//! error and every decision path has a deterministic fallback.

mod openrouter;

pub use openrouter::OpenRouterReasoner;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Token usage for one completion, if the provider reports it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Build a usage object with a consistent total.
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }

    /// Attributed cost in cents at `price_cents_per_1k` per 1k tokens,
    /// rounded up so spend is never under-counted.
    pub fn cost_cents(&self, price_cents_per_1k: i64) -> i64 {
        let price = price_cents_per_1k.max(0) as u64;
        ((self.total_tokens * price).div_ceil(1000)) as i64
    }
}

/// One completion from the reasoning service.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
}

/// Black-box reasoning call. Failures are transient-external by the
/// error taxonomy: callers recover locally, never propagate as fatal.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<Completion>;
}

/// Stand-in used when no API key is configured. Every call errors, so
/// the roles run entirely on their deterministic fallbacks.
pub struct DisabledReasoner;

#[async_trait]
impl ReasoningService for DisabledReasoner {
    async fn complete(&self, _prompt: &str) -> anyhow::Result<Completion> {
        anyhow::bail!("reasoning service disabled: no API key configured")
    }
}

/// Model output that failed to parse as the expected JSON shape.
#[derive(Debug, Error)]
#[error("malformed model output: {reason}")]
pub struct MalformedOutput {
    pub reason: String,
}

/// Pull a JSON value of type `T` out of model text. Tolerates prose and
/// markdown fences around the payload by scanning for the outermost
/// object or array.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, MalformedOutput> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    let candidate = outermost(trimmed, '{', '}')
        .or_else(|| outermost(trimmed, '[', ']'))
        .ok_or_else(|| MalformedOutput {
            reason: format!("no JSON payload in {:?}", truncate(trimmed, 120)),
        })?;

    serde_json::from_str(candidate).map_err(|e| MalformedOutput {
        reason: format!("{} in {:?}", e, truncate(candidate, 120)),
    })
}

fn outermost(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted reasoning doubles for unit tests.

    use std::sync::Mutex;

    use super::*;

    /// Returns queued responses in order, then errors.
    pub struct ScriptedReasoner {
        responses: Mutex<Vec<String>>,
    }

    impl ScriptedReasoner {
        pub fn new(responses: Vec<&str>) -> Self {
            let mut responses: Vec<String> = responses.into_iter().map(String::from).collect();
            responses.reverse();
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl ReasoningService for ScriptedReasoner {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<Completion> {
            let mut responses = self.responses.lock().unwrap();
            match responses.pop() {
                Some(text) => Ok(Completion {
                    text,
                    usage: TokenUsage::new(100, 50),
                }),
                None => anyhow::bail!("scripted reasoner exhausted"),
            }
        }
    }

    /// Always fails, for exercising deterministic fallbacks.
    pub struct FailingReasoner;

    #[async_trait]
    impl ReasoningService for FailingReasoner {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<Completion> {
            anyhow::bail!("reasoning service unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Decision {
        action: String,
        score: i64,
    }

    #[test]
    fn parses_bare_json() {
        let d: Decision = extract_json(r#"{"action": "reuse", "score": 7}"#).unwrap();
        assert_eq!(d.action, "reuse");
    }

    #[test]
    fn parses_json_wrapped_in_prose_and_fences() {
        let text = "Here is my decision:\n```json\n{\"action\": \"hire\", \"score\": 3}\n```\nLet me know.";
        let d: Decision = extract_json(text).unwrap();
        assert_eq!(d, Decision { action: "hire".into(), score: 3 });
    }

    #[test]
    fn parses_arrays() {
        let v: Vec<i64> = extract_json("ranked: [3, 1, 2]").unwrap();
        assert_eq!(v, vec![3, 1, 2]);
    }

    #[test]
    fn malformed_output_is_a_typed_error() {
        let err = extract_json::<Decision>("I cannot help with that").unwrap_err();
        assert!(err.reason.contains("no JSON payload"));

        let err = extract_json::<Decision>(r#"{"action": 12}"#).unwrap_err();
        assert!(!err.reason.is_empty());
    }

    #[test]
    fn cost_rounds_up() {
        assert_eq!(TokenUsage::new(100, 50).cost_cents(1), 1);
        assert_eq!(TokenUsage::new(1000, 1000).cost_cents(3), 6);
        assert_eq!(TokenUsage::new(0, 0).cost_cents(5), 0);
        assert_eq!(TokenUsage::new(1, 0).cost_cents(1000), 1);
    }
}
