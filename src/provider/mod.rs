//! Model providers and the gateway that turns a review prompt into an answer
//!
//! `ProviderGateway` is the seam the review driver talks to. `HttpGateway`
//! is the real implementation; tests substitute scripted fakes.

mod anthropic;
mod gemini;
mod openai;

use crate::error::SessionError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Gemini,
    Anthropic,
}

const ALL_PROVIDERS: [Provider; 3] = [Provider::OpenAi, Provider::Gemini, Provider::Anthropic];

impl Provider {
    pub fn all() -> &'static [Provider] {
        &ALL_PROVIDERS
    }

    /// Key used in model ids and the credential map
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Gemini => "gemini",
            Provider::Anthropic => "anthropic",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OpenAI",
            Provider::Gemini => "Gemini",
            Provider::Anthropic => "Anthropic",
        }
    }

    /// Fast, cheap model
    pub fn light_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Gemini => "gemini-1.5-flash",
            Provider::Anthropic => "claude-3-5-haiku-latest",
        }
    }

    /// Stronger, slower model
    pub fn heavy_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Gemini => "gemini-1.5-pro",
            Provider::Anthropic => "claude-3-5-sonnet-latest",
        }
    }

    pub fn models(&self) -> [&'static str; 2] {
        [self.light_model(), self.heavy_model()]
    }

    pub fn light(&self) -> ModelId {
        ModelId::new(*self, self.light_model())
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Provider::all()
            .iter()
            .copied()
            .find(|p| p.as_str() == wanted)
            .ok_or_else(|| SessionError::UnknownProvider(s.to_string()))
    }
}

/// `provider.model`, e.g. `gemini.gemini-1.5-flash`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId {
    provider: Provider,
    model: String,
}

impl ModelId {
    pub fn new(provider: Provider, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Parse `provider.model`. Only the first dot separates the two, so
    /// model names may contain dots of their own.
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        let (provider, model) = raw
            .split_once('.')
            .ok_or_else(|| SessionError::UnknownModel(raw.to_string()))?;
        if model.is_empty() {
            return Err(SessionError::UnknownModel(raw.to_string()));
        }
        Ok(Self::new(provider.parse()?, model))
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the model is one we offer for its provider.
    pub fn is_cataloged(&self) -> bool {
        self.provider.models().contains(&self.model.as_str())
    }

    /// Every selectable model, grouped by provider.
    pub fn catalog() -> Vec<ModelId> {
        Provider::all()
            .iter()
            .flat_map(|p| p.models().into_iter().map(move |m| ModelId::new(*p, m)))
            .collect()
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Provider::OpenAi.light()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.provider.as_str(), self.model)
    }
}

impl FromStr for ModelId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelId {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelId> for String {
    fn from(value: ModelId) -> Self {
        value.to_string()
    }
}

/// Everything a provider needs for one completion
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub provider: Provider,
    pub model: String,
    pub credential: String,
    /// Markdown prompt
    pub prompt: String,
    /// Cancelled when the user aborts or the request times out
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("{provider} error ({status}): {body}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },
    #[error("{provider} request failed: {message}")]
    Transport { provider: Provider, message: String },
    #[error("Failed to parse {provider} response: {message}")]
    Decode { provider: Provider, message: String },
    #[error("request cancelled")]
    Cancelled,
    #[error("provider call panicked: {0}")]
    Panicked(String),
}

/// One-shot completion. The whole answer arrives at once.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError>;
}

/// Direct HTTPS calls to each provider's public API.
#[derive(Debug, Clone, Default)]
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new() -> Self {
        Self::default()
    }

    async fn dispatch(&self, request: &GatewayRequest) -> Result<String, GatewayError> {
        match request.provider {
            Provider::OpenAi => openai::complete(&self.client, request).await,
            Provider::Gemini => gemini::complete(&self.client, request).await,
            Provider::Anthropic => anthropic::complete(&self.client, request).await,
        }
    }
}

#[async_trait]
impl ProviderGateway for HttpGateway {
    async fn complete(&self, request: GatewayRequest) -> Result<String, GatewayError> {
        tracing::debug!(
            provider = request.provider.as_str(),
            model = %request.model,
            prompt_chars = request.prompt.chars().count(),
            "sending review request"
        );
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(GatewayError::Cancelled),
            result = self.dispatch(&request) => result,
        }
    }
}

/// Send a prepared request and return the body of a successful response.
async fn send(
    provider: Provider,
    builder: reqwest::RequestBuilder,
) -> Result<String, GatewayError> {
    let transport = |err: reqwest::Error| GatewayError::Transport {
        provider,
        message: err.to_string(),
    };

    let response = builder.send().await.map_err(transport)?;
    let status = response.status();
    let text = response.text().await.map_err(transport)?;

    if !status.is_success() {
        tracing::warn!(provider = provider.as_str(), status = status.as_u16(), "provider returned an error");
        return Err(GatewayError::Status {
            provider,
            status: status.as_u16(),
            body: text,
        });
    }
    Ok(text)
}

fn decode<T: serde::de::DeserializeOwned>(provider: Provider, text: &str) -> Result<T, GatewayError> {
    serde_json::from_str(text).map_err(|e| GatewayError::Decode {
        provider,
        message: e.to_string(),
    })
}
