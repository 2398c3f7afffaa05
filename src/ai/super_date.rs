// "Super date": pick the single best match among candidates

use std::collections::HashSet;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{parse_response, reject, AiError, Completion, Introduction, Prompt};

const SYSTEM_PROMPT: &str = "You are a matchmaking assistant for a dating app. \
Given one person and a list of candidates, pick the single candidate they are most likely \
to enjoy a date with. Answer with a single JSON object and nothing else, shaped like \
{\"user_id\": <the chosen candidate's id>, \"score\": <integer 0-100>, \"reason\": <one or two sentences>}.";

const REQUIRED_FIELDS: &[&str] = &["user_id", "score", "reason"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperDatePick {
    pub user_id: String,
    pub score: u8,
    pub reason: String,
}

pub fn build_prompt(me: &Introduction, candidates: &[Introduction]) -> Prompt {
    let listing = candidates
        .iter()
        .map(|candidate| format!("Candidate id: {}\n{}", candidate.user_id, candidate.describe()))
        .collect::<Vec<_>>()
        .join("\n\n");
    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("Looking for a date\n{}\n\nCandidates\n{}", me.describe(), listing),
    }
}

/// Parse a pick and check it names one of `candidates`.
pub fn parse_pick(raw: &str, candidates: &[Introduction]) -> Result<SuperDatePick, AiError> {
    let pick: SuperDatePick = parse_response(raw, REQUIRED_FIELDS)?;
    if !candidates.iter().any(|candidate| candidate.user_id == pick.user_id) {
        return Err(reject(raw, format!("{} is not one of the candidates", pick.user_id)));
    }
    if pick.score > 100 {
        return Err(reject(raw, format!("score {} is out of range", pick.score)));
    }
    Ok(pick)
}

fn validate(me: &Introduction, candidates: &[Introduction]) -> Result<(), AiError> {
    me.validate()?;
    if candidates.is_empty() {
        return Err(AiError::Validation("no candidates to choose from".to_string()));
    }

    let mut seen = HashSet::new();
    for candidate in candidates {
        candidate.validate()?;
        if candidate.user_id == me.user_id {
            return Err(AiError::Validation("cannot match a user with themselves".to_string()));
        }
        if !seen.insert(candidate.user_id.as_str()) {
            return Err(AiError::Validation(format!("candidate {} is listed twice", candidate.user_id)));
        }
    }
    Ok(())
}

pub async fn pick_super_date<C: Completion + ?Sized>(
    client: &C,
    me: &Introduction,
    candidates: &[Introduction],
) -> Result<SuperDatePick, AiError> {
    validate(me, candidates)?;

    debug!("Picking a super date for {} among {} candidates", me.user_id, candidates.len());
    let raw = client.complete(&build_prompt(me, candidates)).await?;
    let pick = parse_pick(&raw, candidates)?;
    info!("Super date for {}: {} ({})", me.user_id, pick.user_id, pick.score);
    Ok(pick)
}
