use crate::config::defaults;
use crate::models::Message;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tokio_util::sync::CancellationToken;

#[derive(Hash, PartialEq, Eq, Deserialize, Serialize, Debug, Clone, Copy)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "ollama")]
    Ollama,
    #[serde(rename = "rest")]
    Rest,
    #[serde(rename = "mistral")]
    Mistral,
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl ProviderKind {
    /// Routing priority. A model id claimed by several connections is
    /// owned by the lowest-priority-value kind.
    pub fn priority(&self) -> u8 {
        match self {
            ProviderKind::OpenAI => 0,
            ProviderKind::Anthropic => 1,
            ProviderKind::Ollama => 2,
            ProviderKind::Rest => 3,
            ProviderKind::Mistral => 4,
            ProviderKind::Gemini => 5,
            ProviderKind::OpenRouter => 6,
        }
    }

    pub fn default_alias(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Ollama => "Ollama",
            ProviderKind::Rest => "REST",
            ProviderKind::Mistral => "Mistral",
            ProviderKind::Gemini => "Gemini",
            ProviderKind::OpenRouter => "OpenRouter",
        }
    }
}

impl Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.default_alias())
    }
}

/// One configured provider connection. The `models` list doubles as the
/// routing table entry for this connection.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct BackendConnection {
    #[serde(default)]
    enabled: bool,
    kind: ProviderKind,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "defaults::stream")]
    stream: bool,
    #[serde(default)]
    models: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<u16>,
}

impl BackendConnection {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            enabled: false,
            kind,
            alias: None,
            endpoint: None,
            api_key: None,
            stream: true,
            models: Vec::new(),
            timeout_secs: None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    pub fn add_model(mut self, model: impl Into<String>) -> Self {
        self.models.push(model.into());
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u16) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    pub fn timeout_secs(&self) -> Option<u16> {
        self.timeout_secs
    }
}

/// One completion request, handed to an adapter. `turns` end with the
/// user turn the reply answers; the system prompt is carried separately
/// because providers disagree on where it goes.
pub struct BackendPrompt {
    model: String,
    system_prompt: String,
    turns: Vec<Message>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    generation: u64,
    cancel: CancellationToken,
}

impl BackendPrompt {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_prompt: String::new(),
            turns: vec![],
            max_tokens: None,
            temperature: None,
            generation: 0,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = system_prompt.into();
        self
    }

    pub fn with_turns(mut self, turns: Vec<Message>) -> Self {
        self.turns = turns;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn temperature(&self) -> Option<f32> {
        self.temperature
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One fragment of a completion. `generation` ties the fragment to the
/// request that produced it so superseded requests can be ignored.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub generation: u64,
    pub model: String,
    pub text: String,
    pub done: bool,
}
