use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer the question using the provided context.";
// Local models can take a while to load on first request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request to {backend} failed: {source}")]
    Http {
        backend: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Error: {} - {body}", .status.as_u16())]
    Status { status: StatusCode, body: String },
    #[error("could not decode {backend} response: {message}")]
    Decode {
        backend: &'static str,
        message: String,
    },
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(&self, question: &str, context: &str) -> Result<String, LlmError>;
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!("Context: {context}\n\nQuestion: {question}\n\nAnswer:")
}

fn http_client() -> Result<Client, LlmError> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(LlmError::Client)
}

async fn post_json<Req: Serialize + Sync, Resp: for<'de> Deserialize<'de>>(
    backend: &'static str,
    request: reqwest::RequestBuilder,
    body: &Req,
) -> Result<Resp, LlmError> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|source| LlmError::Http { backend, source })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status { status, body });
    }

    response.json().await.map_err(|e| LlmError::Decode {
        backend,
        message: e.to_string(),
    })
}

#[derive(Debug, Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Local inference through Ollama's `/api/generate`.
pub struct OllamaGenerator {
    client: Client,
    url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, LlmError> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt: build_prompt(question, context),
            stream: false,
        };
        debug!(url = %self.url, model = %self.model, "ollama generate");
        let response: OllamaGenerateResponse =
            post_json(self.name(), self.client.post(&self.url), &request).await?;
        Ok(response.response)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Cloud completion through an OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiGenerator {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: http_client()?,
            url: url.into(),
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_owned(),
                    content: SYSTEM_PROMPT.to_owned(),
                },
                ChatMessage {
                    role: "user".to_owned(),
                    content: build_prompt(question, context),
                },
            ],
        };
        debug!(url = %self.url, model = %self.model, "chat completion");
        let response: ChatResponse = post_json(
            self.name(),
            self.client.post(&self.url).bearer_auth(&self.api_key),
            &request,
        )
        .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Decode {
                backend: self.name(),
                message: "response contained no choices".to_owned(),
            })
    }
}
