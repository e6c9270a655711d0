#[cfg(test)]
#[path = "openai_test.rs"]
mod tests;

use std::time;

use crate::backend::Backend;
use crate::config::user_agent;
use crate::error::ChatError;
use crate::models::{ArcEventTx, BackendConnection, BackendPrompt, BackendResponse, Event, Message};
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

#[derive(Debug)]
pub struct OpenAI {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
    stream: bool,
}

#[async_trait]
impl Backend for OpenAI {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        if prompt.model().is_empty() {
            bail!("no model is set");
        }

        let completion_req = CompletionRequest {
            model: prompt.model().to_string(),
            messages: build_messages(&prompt),
            stream: self.stream,
            max_tokens: prompt.max_tokens(),
            temperature: prompt.temperature(),
        };

        let mut req = reqwest::Client::new()
            .post(format!("{}/v1/chat/completions", self.endpoint))
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }

        log::trace!("Sending completion request: {:?}", completion_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = req.json(&completion_req).send() => {
                res.wrap_err("sending completion request")?
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

        if self.stream {
            self.stream_completion(res, &prompt, event_tx).await
        } else {
            self.full_completion(res, &prompt, event_tx).await
        }
    }
}

impl OpenAI {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn stream_completion(
        &self,
        res: reqwest::Response,
        prompt: &BackendPrompt,
        event_tx: ArcEventTx,
    ) -> Result<()> {
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
            if data == "[DONE]" {
                break;
            }

            let data = match serde_json::from_str::<CompletionResponse>(data) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("{}", ChatError::StreamParse(format!("{}: {}", err, data)));
                    continue;
                }
            };

            let Some(choice) = data.choices.first() else {
                continue;
            };
            let Some(text) = choice.delta.content.clone() else {
                continue;
            };

            event_tx
                .send(Event::ChatDelta(BackendResponse {
                    generation: prompt.generation(),
                    model: prompt.model().to_string(),
                    text,
                    done: false,
                }))
                .await?;
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

    async fn full_completion(
        &self,
        res: reqwest::Response,
        prompt: &BackendPrompt,
        event_tx: ArcEventTx,
    ) -> Result<()> {
        let res = res
            .json::<FullCompletionResponse>()
            .await
            .wrap_err("parsing completion response")?;

        let text = res
            .choices
            .first()
            .map(|c| c.message.content.clone())
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

impl Default for OpenAI {
    fn default() -> Self {
        Self {
            alias: "OpenAI".to_string(),
            endpoint: "https://api.openai.com".to_string(),
            api_key: None,
            timeout: None,
            stream: true,
        }
    }
}

impl From<&BackendConnection> for OpenAI {
    fn from(value: &BackendConnection) -> Self {
        let mut openai = OpenAI::default().with_stream(value.stream());

        if let Some(endpoint) = value.endpoint() {
            openai.endpoint = endpoint.to_string();
        }

        if let Some(api_key) = value.api_key() {
            openai.api_key = Some(api_key.to_string());
        }

        if let Some(alias) = value.alias() {
            openai.alias = alias.to_string();
        }

        if let Some(timeout) = value.timeout_secs() {
            openai.timeout = Some(time::Duration::from_secs(timeout as u64));
        }

        openai
    }
}

pub(crate) fn build_messages(prompt: &BackendPrompt) -> Vec<MessageRequest> {
    let mut messages = Vec::with_capacity(prompt.turns().len() + 1);
    if !prompt.system_prompt().is_empty() {
        messages.push(MessageRequest {
            role: "system".to_string(),
            content: prompt.system_prompt().to_string(),
        });
    }
    messages.extend(prompt.turns().iter().map(MessageRequest::from));
    messages
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MessageRequest {
    pub(crate) role: String,
    pub(crate) content: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<MessageRequest>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionDeltaResponse {
    content: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionChoiceResponse {
    delta: CompletionDeltaResponse,
    finish_reason: Option<String>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoiceResponse>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct FullMessageResponse {
    content: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct FullChoiceResponse {
    message: FullMessageResponse,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct FullCompletionResponse {
    choices: Vec<FullChoiceResponse>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: ErrorPayload,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorPayload {
    message: String,
    #[serde(rename = "type", default)]
    err_type: Option<String>,
    #[serde(default)]
    param: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl From<&Message> for MessageRequest {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role().to_string(),
            content: msg.content().to_string(),
        }
    }
}
