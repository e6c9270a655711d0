#[cfg(test)]
#[path = "ollama_test.rs"]
mod tests;

use std::time;

use crate::backend::Backend;
use crate::config::user_agent;
use crate::error::ChatError;
use crate::models::{
    ArcEventTx, BackendConnection, BackendPrompt, BackendResponse, Event, Message,
};
use async_trait::async_trait;
use eyre::{Context, Result, bail};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

/// Local Ollama daemon. No auth; the response stream is one JSON object
/// per line, terminated by the first object with `done: true`.
#[derive(Debug)]
pub struct Ollama {
    alias: String,
    endpoint: String,
    timeout: Option<time::Duration>,
    stream: bool,
}

#[async_trait]
impl Backend for Ollama {
    fn name(&self) -> &str {
        &self.alias
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        if prompt.model().is_empty() {
            bail!("no model is set");
        }

        let chat_req = ChatRequest {
            model: prompt.model().to_string(),
            messages: build_messages(&prompt),
            stream: self.stream,
            options: ChatOptions {
                temperature: prompt.temperature(),
                num_predict: prompt.max_tokens(),
            },
        };

        let mut req = reqwest::Client::new()
            .post(format!("{}/api/chat", self.endpoint))
            .header("Content-Type", "application/json")
            .header("User-Agent", user_agent());

        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        log::trace!("Sending chat request: {:?}", chat_req);

        let res = tokio::select! {
            _ = prompt.cancel_token().cancelled() => return Err(ChatError::Aborted.into()),
            res = req.json(&chat_req).send() => {
                res.wrap_err("sending chat request")?
            }
        };

        if !res.status().is_success() {
            let http_code = res.status().as_u16();
            let resp = res.text().await.wrap_err("reading error response")?;
            log::error!("Error response: {}", resp);
            let message = serde_json::from_str::<ErrorResponse>(&resp)
                .map(|e| e.error)
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

impl Ollama {
    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
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
                line = lines.next_line() => line.wrap_err("reading chat stream")?,
            };
            let Some(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            log::trace!("streaming response: {}", line);

            let data = match serde_json::from_str::<ChatResponse>(line) {
                Ok(data) => data,
                Err(err) => {
                    log::warn!("{}", ChatError::StreamParse(format!("{}: {}", err, line)));
                    continue;
                }
            };

            if let Some(message) = data.message {
                if !message.content.is_empty() {
                    event_tx
                        .send(Event::ChatDelta(BackendResponse {
                            generation: prompt.generation(),
                            model: prompt.model().to_string(),
                            text: message.content,
                            done: false,
                        }))
                        .await?;
                }
            }

            if data.done {
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

    async fn full_completion(
        &self,
        res: reqwest::Response,
        prompt: &BackendPrompt,
        event_tx: ArcEventTx,
    ) -> Result<()> {
        let res = res
            .json::<ChatResponse>()
            .await
            .wrap_err("parsing chat response")?;

        let text = res.message.map(|m| m.content).unwrap_or_default();

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

impl Default for Ollama {
    fn default() -> Self {
        Self {
            alias: "Ollama".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            timeout: None,
            stream: true,
        }
    }
}

impl From<&BackendConnection> for Ollama {
    fn from(value: &BackendConnection) -> Self {
        let mut ollama = Ollama::default().with_stream(value.stream());

        if let Some(endpoint) = value.endpoint() {
            ollama.endpoint = endpoint.to_string();
        }

        if let Some(alias) = value.alias() {
            ollama.alias = alias.to_string();
        }

        if let Some(timeout) = value.timeout_secs() {
            ollama.timeout = Some(time::Duration::from_secs(timeout as u64));
        }

        ollama
    }
}

fn build_messages(prompt: &BackendPrompt) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(prompt.turns().len() + 1);
    if !prompt.system_prompt().is_empty() {
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: prompt.system_prompt().to_string(),
        });
    }
    messages.extend(prompt.turns().iter().map(ChatMessage::from));
    messages
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ChatResponse {
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Default, Debug, Serialize, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl From<&Message> for ChatMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role().to_string(),
            content: msg.content().to_string(),
        }
    }
}
