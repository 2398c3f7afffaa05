// Compatibility scoring between two users

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{parse_response, reject, AiError, Completion, Introduction, Prompt};

const SYSTEM_PROMPT: &str = "You are a matchmaking assistant for a dating app. \
Compare the two self-introductions and rate how well the two people would get along. \
Answer with a single JSON object and nothing else, shaped like \
{\"score\": <integer 0-100>, \"summary\": <one or two sentences>, \
\"strengths\": [<short phrases>], \"cautions\": [<short phrases>]}.";

const REQUIRED_FIELDS: &[&str] = &["score", "summary"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityReport {
    pub score: u8,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub cautions: Vec<String>,
}

pub fn build_prompt(a: &Introduction, b: &Introduction) -> Prompt {
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("Person A\n{}\n\nPerson B\n{}", a.describe(), b.describe()),
    }
}

pub fn parse_report(raw: &str) -> Result<CompatibilityReport, AiError> {
    let report: CompatibilityReport = parse_response(raw, REQUIRED_FIELDS)?;
    if report.score > 100 {
        return Err(reject(raw, format!("score {} is out of range", report.score)));
    }
    if report.summary.trim().is_empty() {
        return Err(reject(raw, "summary is empty".to_string()));
    }
    Ok(report)
}

/// Ask the model how compatible `a` and `b` are.
pub async fn score_compatibility<C: Completion + ?Sized>(
    client: &C,
    a: &Introduction,
    b: &Introduction,
) -> Result<CompatibilityReport, AiError> {
    a.validate()?;
    b.validate()?;
    if a.user_id == b.user_id {
        return Err(AiError::Validation("cannot match a user with themselves".to_string()));
    }

    debug!("Scoring compatibility of {} and {}", a.user_id, b.user_id);
    let raw = client.complete(&build_prompt(a, b)).await?;
    let report = parse_report(&raw)?;
    info!("Compatibility of {} and {}: {}", a.user_id, b.user_id, report.score);
    Ok(report)
}
