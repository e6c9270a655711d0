#[cfg(test)]
#[path = "rest_test.rs"]
mod tests;

use std::time;

use crate::backend::Backend;
use crate::backend::openai::{MessageRequest, build_messages};
use crate::config::user_agent;
use crate::error::ChatError;
use crate::models::{ArcEventTx, BackendConnection, BackendPrompt, BackendResponse, Event};
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Self-hosted gateways mount the OpenAI chat route in one of two
/// places. The adapter probes them in order and streams from the first
/// one that accepts the request; once a body has started, failures are
/// final.
const PATH_VARIANTS: [&str; 2] = ["/v1/chat/completions", "/api/v1/chat/completions"];

#[derive(Debug)]
pub struct Rest {
    alias: String,
    endpoint: String,
    api_key: Option<String>,
    timeout: Option<time::Duration>,
    stream: bool,
}

#[async_trait]
impl Backend for Rest {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        if prompt.model().is_empty() {
            bail!("no model is set");
        }
        if self.endpoint.is_empty() {
            bail!("endpoint is not set");
        }

        let completion_req = CompletionRequest {
            model: prompt.model().to_string(),
            messages: build_messages(&prompt),
            stream: self.stream,
            max_tokens: prompt.max_tokens(),
            temperature: prompt.temperature(),
        };

        let mut last_err: Option<eyre::Report> = None;
        for path in PATH_VARIANTS {
            match self.request(path, &completion_req, &prompt).await {
                Ok(res) => {
                    return if self.stream {
                        self.stream_completion(res, &prompt, event_tx).await
                    } else {
                        self.full_completion(res, &prompt, event_tx).await
                    };
                }
                Err(err) => {
                    if ChatError::is_abort(&err) {
                        return Err(err);
                    }
                    log::debug!("endpoint variant {} failed: {}", path, err);
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap())
    }
}

impl Rest {
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

    /// Sends the request to one path variant and checks the status.
    /// Everything up to here may fall through to the next variant.
    async fn request(
        &self,
        path: &str,
        completion_req: &CompletionRequest,
        prompt: &BackendPrompt,
    ) -> Result<reqwest::Response> {
        let mut req = reqwest::Client::new()
            .post(format!("{}{}", self.endpoint, path))
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        if let Some(token) = &self.api_key {
            req = req.bearer_auth(token);
        }

        log::trace!("Sending completion request to {}: {:?}", path, completion_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = req.json(completion_req).send() => {
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

        Ok(res)
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

impl Default for Rest {
    fn default() -> Self {
        Self {
            alias: "REST".to_string(),
            endpoint: String::new(),
            api_key: None,
            timeout: None,
            stream: true,
        }
    }
}

impl From<&BackendConnection> for Rest {
    fn from(value: &BackendConnection) -> Self {
        let mut rest = Rest::default().with_stream(value.stream());

        if let Some(endpoint) = value.endpoint() {
            rest.endpoint = endpoint.to_string();
        }

        if let Some(api_key) = value.api_key() {
            rest.api_key = Some(api_key.to_string());
        }

        if let Some(alias) = value.alias() {
            rest.alias = alias.to_string();
        }

        if let Some(timeout) = value.timeout_secs() {
            rest.timeout = Some(time::Duration::from_secs(timeout as u64));
        }

        rest
    }
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
}
