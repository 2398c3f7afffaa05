//! AI-assisted matching
//!
//! Both features work the same way: build a prompt from user introductions,
//! ask the language model for a JSON answer, and validate that answer before
//! handing it out. A malformed answer is an error, never a partial result.

use async_trait::async_trait;
use log::error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod compatibility;
pub mod endpoint;
pub mod openai;
pub mod super_date;

pub use compatibility::{score_compatibility, CompatibilityReport};
pub use endpoint::EndpointResponse;
pub use openai::OpenAiClient;
pub use super_date::{pick_super_date, SuperDatePick};

/// A user's self-introduction, the input of every AI feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Introduction {
    pub user_id: String,
    pub nickname: String,
    pub bio: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub ideal_type: Option<String>,
}

impl Introduction {
    /// Plain-text rendering used inside prompts.
    pub fn describe(&self) -> String {
        let mut text = format!("Nickname: {}\nIntroduction: {}", self.nickname, self.bio.trim());
        if !self.interests.is_empty() {
            text.push_str(&format!("\nInterests: {}", self.interests.join(", ")));
        }
        if let Some(ideal) = self.ideal_type.as_deref().filter(|s| !s.trim().is_empty()) {
            text.push_str(&format!("\nIdeal type: {}", ideal.trim()));
        }
        text
    }

    pub(crate) fn validate(&self) -> Result<(), AiError> {
        if self.user_id.trim().is_empty() {
            return Err(AiError::Validation("user id is required".to_string()));
        }
        if self.bio.trim().is_empty() {
            return Err(AiError::Validation(format!("{} has no introduction", self.nickname)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Model request failed: {0}")]
    Request(String),

    #[error("Could not parse model output ({reason})")]
    Parse { reason: String, raw: String },

    #[error("AI API key is not configured")]
    MissingApiKey,
}

/// Text-in, text-out access to a language model.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, AiError>;
}

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("fenced block pattern is valid")
});

/// Models often wrap JSON in a Markdown code fence; take what is inside it.
pub fn extract_json(raw: &str) -> &str {
    match FENCED_JSON.captures(raw).and_then(|caps| caps.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

/// Log unusable model output and wrap it in a parse error.
pub(crate) fn reject(raw: &str, reason: String) -> AiError {
    error!("Unusable model output ({}): {}", reason, raw);
    AiError::Parse {
        reason,
        raw: raw.to_string(),
    }
}

/// Parse `raw` as a JSON object that has every field in `required`, then
/// deserialize it. Failures are logged together with the offending text.
pub fn parse_response<T: DeserializeOwned>(raw: &str, required: &[&str]) -> Result<T, AiError> {
    let value: Value =
        serde_json::from_str(extract_json(raw)).map_err(|e| reject(raw, format!("not JSON: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(reject(raw, "top level is not an object".to_string()));
    };
    if let Some(missing) = required.iter().find(|field| !object.contains_key(**field)) {
        return Err(reject(raw, format!("missing field `{missing}`")));
    }

    serde_json::from_value(value).map_err(|e| reject(raw, format!("unexpected shape: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Answer {
        score: u8,
    }

    #[test]
    fn test_extract_json_plain() {
        assert_eq!(extract_json("  {\"a\": 1}\n"), "{\"a\": 1}");
    }

    #[test]
    fn test_extract_json_fenced() {
        let raw = "Here you go:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_json(raw), "{\"a\": 1}");

        let bare_fence = "```\n{\"b\": 2}\n```";
        assert_eq!(extract_json(bare_fence), "{\"b\": 2}");
    }

    #[test]
    fn test_parse_response_ok() {
        let answer: Answer = parse_response("{\"score\": 80}", &["score"]).unwrap();
        assert_eq!(answer.score, 80);
    }

    #[test]
    fn test_parse_response_not_json() {
        let result: Result<Answer, _> = parse_response("I think they match well!", &["score"]);
        match result {
            Err(AiError::Parse { raw, .. }) => assert_eq!(raw, "I think they match well!"),
            other => panic!("Expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_missing_field() {
        let result: Result<Answer, _> = parse_response("{\"summary\": \"nice\"}", &["score"]);
        assert!(matches!(result, Err(AiError::Parse { .. })));
    }

    #[test]
    fn test_parse_response_not_an_object() {
        let result: Result<Answer, _> = parse_response("[1, 2, 3]", &["score"]);
        assert!(matches!(result, Err(AiError::Parse { .. })));
    }

    #[test]
    fn test_describe_skips_empty_parts() {
        let intro = Introduction {
            user_id: "u1".to_string(),
            nickname: "Mina".to_string(),
            bio: " Loves hiking ".to_string(),
            interests: vec![],
            ideal_type: Some("  ".to_string()),
        };
        assert_eq!(intro.describe(), "Nickname: Mina\nIntroduction: Loves hiking");
    }
}
