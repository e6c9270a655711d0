#[cfg(test)]
#[path = "gemini_test.rs"]
mod tests;

use std::time;

use crate::backend::Backend;
use crate::config::user_agent;
use crate::error::ChatError;
use crate::models::{
    ArcEventTx, BackendConnection, BackendPrompt, BackendResponse, Event, Message, Role,
};
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Gemini is served non-streaming: one `generateContent` call, one full
/// reply. The key travels as a query parameter, not a header.
#[derive(Debug)]
pub struct Gemini {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
}

#[async_trait]
impl Backend for Gemini {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        if prompt.model().is_empty() {
            bail!("no model is set");
        }

        let generate_req = GenerateRequest {
            contents: build_contents(&prompt),
            system_instruction: match prompt.system_prompt() {
                "" => None,
                system => Some(Content {
                    role: None,
                    parts: vec![Part {
                        text: system.to_string(),
                    }],
                }),
            },
            generation_config: GenerationConfig {
                temperature: prompt.temperature(),
                max_output_tokens: prompt.max_tokens(),
            },
        };

        let mut params = vec![];
        if let Some(key) = &self.api_key {
            params.push(("key", key));
        }

        let url = reqwest::Url::parse_with_params(
            &format!("{}/models/{}:generateContent", self.endpoint, prompt.model()),
            params.as_slice(),
        )
        .wrap_err("parsing url")?;

        let mut builder = reqwest::Client::new()
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        log::trace!("Sending generate request: {:?}", generate_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = builder.json(&generate_req).send() => {
                res.wrap_err("sending generate request")?
            }
        };

        if !res.status().is_success() {
            let http_code = res.status().as_u16();
            let resp = res.text().await.wrap_err("reading error response")?;
            log::error!("Error response: {}", resp);
            let message = serde_json::from_str::<ErrorResponse>(&resp)
                .map(|e| e.error.message)
                .unwrap_or(resp);
            return Err(ChatError::provider(&self.alias, http_code, message).into());
        }

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = res.json::<GenerateResponse>() => {
                res.wrap_err("parsing generate response")?
            }
        };

        let text = res
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .unwrap_or_default();

        event_tx
            .send(Event::ChatDelta(BackendResponse {
                generation: prompt.generation(),
                model: prompt.model().to_string(),
                text,
                done: false,
            }))
            .await?;
        event_tx
            .send(Event::ChatDelta(BackendResponse {
                generation: prompt.generation(),
                model: prompt.model().to_string(),
                text: String::new(),
                done: true,
            }))
            .await?;
        Ok(())
    }
}

impl Gemini {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = alias.to_string();
        self
    }
}

impl Default for Gemini {
    fn default() -> Self {
        Self {
            alias: "Gemini".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: None,
            timeout: None,
        }
    }
}

impl From<&BackendConnection> for Gemini {
    fn from(value: &BackendConnection) -> Self {
        let mut gemini = Gemini::default();

        if let Some(endpoint) = value.endpoint() {
            gemini.endpoint = endpoint.to_string();
        }

        if let Some(api_key) = value.api_key() {
            gemini.api_key = Some(api_key.to_string());
        }

        if let Some(alias) = value.alias() {
            gemini.alias = alias.to_string();
        }

        if let Some(timeout) = value.timeout_secs() {
            gemini.timeout = Some(time::Duration::from_secs(timeout as u64));
        }

        gemini
    }
}

fn build_contents(prompt: &BackendPrompt) -> Vec<Content> {
    prompt.turns().iter().map(Content::from).collect()
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    generation_config: GenerationConfig,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: ErrorPayload,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

impl From<&Message> for Content {
    fn from(msg: &Message) -> Self {
        Self {
            role: Some(match msg.role() {
                Role::Assistant => "model".to_string(),
                Role::User | Role::System => "user".to_string(),
            }),
            parts: vec![Part {
                text: msg.content().to_string(),
            }],
        }
    }
}
