// Request handlers for the AI features
// They never fail: every outcome is folded into an envelope the caller can
// serialize as-is.

use log::error;
use serde::{Deserialize, Serialize};

use super::{pick_super_date, score_compatibility, AiError, Completion, Introduction};
use super::{CompatibilityReport, SuperDatePick};

/// Shown instead of model or transport details.
pub const PROCESSING_FAILED: &str = "processing failed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointResponse<T> {
    Success { ok: SuccessFlag, data: T },
    Failure { ok: FailureFlag, error: String },
}

/// Serializes as `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuccessFlag;

/// Serializes as `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureFlag;

impl Serialize for SuccessFlag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(true)
    }
}

impl<'de> Deserialize<'de> for SuccessFlag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match bool::deserialize(deserializer)? {
            true => Ok(SuccessFlag),
            false => Err(serde::de::Error::custom("expected ok: true")),
        }
    }
}

impl Serialize for FailureFlag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(false)
    }
}

impl<'de> Deserialize<'de> for FailureFlag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match bool::deserialize(deserializer)? {
            false => Ok(FailureFlag),
            true => Err(serde::de::Error::custom("expected ok: false")),
        }
    }
}

impl<T> EndpointResponse<T> {
    pub fn success(data: T) -> Self {
        EndpointResponse::Success { ok: SuccessFlag, data }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        EndpointResponse::Failure {
            ok: FailureFlag,
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EndpointResponse::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            EndpointResponse::Success { data, .. } => Some(data),
            EndpointResponse::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            EndpointResponse::Success { .. } => None,
            EndpointResponse::Failure { error, .. } => Some(error),
        }
    }
}

impl<T> From<Result<T, AiError>> for EndpointResponse<T> {
    fn from(result: Result<T, AiError>) -> Self {
        match result {
            Ok(data) => EndpointResponse::success(data),
            // Validation messages are about the caller's own input
            Err(AiError::Validation(message)) => EndpointResponse::failure(message),
            Err(e) => {
                error!("AI request failed: {}", e);
                EndpointResponse::failure(PROCESSING_FAILED)
            }
        }
    }
}

pub async fn compatibility<C: Completion + ?Sized>(
    client: &C,
    a: &Introduction,
    b: &Introduction,
) -> EndpointResponse<CompatibilityReport> {
    score_compatibility(client, a, b).await.into()
}

pub async fn super_date<C: Completion + ?Sized>(
    client: &C,
    me: &Introduction,
    candidates: &[Introduction],
) -> EndpointResponse<SuperDatePick> {
    pick_super_date(client, me, candidates).await.into()
}
