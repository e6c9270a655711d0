#[cfg(test)]
#[path = "anthropic_test.rs"]
mod tests;

use std::time;

use crate::backend::Backend;
use crate::config::constants::{ANTHROPIC_VERSION, MAX_OUTPUT_TOKENS};
use crate::config::user_agent;
use crate::error::ChatError;
use crate::models::{
    ArcEventTx, BackendConnection, BackendPrompt, BackendResponse, Event, Role,
};
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Streaming goes through the legacy text-completions API (`Human:` /
/// `Assistant:` prompt, `completion` deltas); the non-streaming path
/// uses the messages API.
#[derive(Debug)]
pub struct Anthropic {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
    stream: bool,
}

#[async_trait]
impl Backend for Anthropic {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        if prompt.model().is_empty() {
            bail!("no model is set");
        }

        if self.stream {
            self.stream_completion(&prompt, event_tx).await
        } else {
            self.full_completion(&prompt, event_tx).await
        }
    }
}

impl Anthropic {
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

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = reqwest::Client::new()
            .post(format!("{}{}", self.endpoint, path))
            .header("Content-Type", "application/json")
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }

        req
    }

    async fn check_status(&self, res: reqwest::Response) -> Result<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }

        let http_code = res.status().as_u16();
        let resp = res.text().await.wrap_err("reading error response")?;
        log::error!("Error response: {}", resp);
        let message = serde_json::from_str::<ErrorResponse>(&resp)
            .map(|e| e.error.message)
            .unwrap_or(resp);
        Err(ChatError::provider(&self.alias, http_code, message).into())
    }

    async fn stream_completion(&self, prompt: &BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        let completion_req = CompletionRequest {
            model: prompt.model().to_string(),
            prompt: build_legacy_prompt(prompt),
            max_tokens_to_sample: prompt.max_tokens().unwrap_or(MAX_OUTPUT_TOKENS),
            temperature: prompt.temperature(),
            stream: true,
        };

        log::trace!("Sending completion request: {:?}", completion_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = self.request("/v1/complete").json(&completion_req).send() => {
                res.wrap_err("sending completion request")?
            }
        };
        let res = self.check_status(res).await?;

        let stream = res.bytes_stream().map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string())
        });
        let mut lines = StreamReader::new(stream).lines();

        loop {
            let line = tokio::select! {
                _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
                line = lines.next_line() => line.wrap_err("reading completion stream")?,
            };
            let Some(line) = line else { break };
            let line = line.trim();
            log::trace!("streaming response: {}", line);

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };

            let data = match serde_json::from_str::<CompletionResponse>(data) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("{}", ChatError::StreamParse(format!("{}: {}", err, data)));
                    continue;
                }
            };

            if let Some(text) = data.completion {
                if !text.is_empty() {
                    event_tx
                        .send(Event::ChatDelta(BackendResponse {
                            generation: prompt.generation(),
                            model: prompt.model().to_string(),
                            text,
                            done: false,
                        }))
                        .await?;
                }
            }

            if data.stop_reason.is_some() {
                break;
            }
        }

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

    async fn full_completion(&self, prompt: &BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        let messages_req = MessagesRequest {
            model: prompt.model().to_string(),
            max_tokens: prompt.max_tokens().unwrap_or(MAX_OUTPUT_TOKENS),
            system: match prompt.system_prompt() {
                "" => None,
                system => Some(system.to_string()),
            },
            messages: prompt.turns().iter().map(|m| MessageParam::from(m)).collect(),
            temperature: prompt.temperature(),
        };

        log::trace!("Sending messages request: {:?}", messages_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = self.request("/v1/messages").json(&messages_req).send() => {
                res.wrap_err("sending messages request")?
            }
        };
        let res = self.check_status(res).await?;

        let res = res
            .json::<MessagesResponse>()
            .await
            .wrap_err("parsing messages response")?;

        let text = res
            .content
            .first()
            .map(|block| block.text.clone())
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

impl Default for Anthropic {
    fn default() -> Self {
        Self {
            alias: "Anthropic".to_string(),
            endpoint: "https://api.anthropic.com".to_string(),
            api_key: None,
            timeout: None,
            stream: true,
        }
    }
}

impl From<&BackendConnection> for Anthropic {
    fn from(value: &BackendConnection) -> Self {
        let mut anthropic = Anthropic::default().with_stream(value.stream());

        if let Some(endpoint) = value.endpoint() {
            anthropic.endpoint = endpoint.to_string();
        }

        if let Some(api_key) = value.api_key() {
            anthropic.api_key = Some(api_key.to_string());
        }

        if let Some(alias) = value.alias() {
            anthropic.alias = alias.to_string();
        }

        if let Some(timeout) = value.timeout_secs() {
            anthropic.timeout = Some(time::Duration::from_secs(timeout as u64));
        }

        anthropic
    }
}

fn build_legacy_prompt(prompt: &BackendPrompt) -> String {
    let mut out = String::new();
    if !prompt.system_prompt().is_empty() {
        out.push_str(prompt.system_prompt());
    }
    for turn in prompt.turns() {
        let marker = match turn.role() {
            Role::Assistant => "Assistant",
            Role::User | Role::System => "Human",
        };
        out.push_str(&format!("\n\n{}: {}", marker, turn.content()));
    }
    out.push_str("\n\nAssistant:");
    out
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionRequest {
    model: String,
    prompt: String,
    max_tokens_to_sample: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionResponse {
    completion: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct MessageParam {
    role: String,
    content: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: ErrorPayload,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorPayload {
    #[serde(rename = "type", default)]
    err_type: String,
    message: String,
}

impl From<&crate::models::Message> for MessageParam {
    fn from(msg: &crate::models::Message) -> Self {
        Self {
            role: match msg.role() {
                Role::Assistant => "assistant".to_string(),
                Role::User | Role::System => "user".to_string(),
            },
            content: msg.content().to_string(),
        }
    }
}
