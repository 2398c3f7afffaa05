// Chat-completions client over HTTP

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use super::{AiError, Completion, Prompt};
use crate::config::AiSettings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const TEMPERATURE: f32 = 0.7;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatTurn<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiClient {
    /// Build a client from settings. Fails when no API key is configured.
    pub fn from_settings(settings: &AiSettings) -> Result<Self, AiError> {
        let api_key = settings
            .get_api_key()
            .filter(|key| !key.trim().is_empty())
            .ok_or(AiError::MissingApiKey)?;

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AiError::Request(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl Completion for OpenAiClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String, AiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatTurn {
                    role: "system",
                    content: &prompt.system,
                },
                ChatTurn {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: TEMPERATURE,
        };

        debug!("POST {} with model {}", self.url(), self.model);
        let response = self
            .http
            .post(self.url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AiError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Model API answered {}: {}", status, body);
            return Err(AiError::Request(format!("HTTP {status}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AiError::Request(format!("malformed API response: {e}")))?;

        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AiError::Request("API response has no content".to_string()))
    }
}
