use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use apiagent_core::config::{LlmConfig, LlmProvider};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Text-generation gateway. Output is untrusted text with no shape guarantee.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

#[async_trait]
impl<T> LlmClient for Arc<T>
where
    T: LlmClient + ?Sized,
{
    async fn complete(&self, prompt: &str) -> Result<String> {
        (**self).complete(prompt).await
    }
}

const ANTHROPIC_API_VERSION: &str = "2023-06-01";

const OLLAMA_MODEL_ALIASES: &[(&str, &str)] = &[
    ("llama3.1", "llama3.1:8b"),
    ("mistral", "mistral:7b"),
    ("tulu3", "tulu3:8b"),
    ("qwen3", "qwen3:14b"),
    ("gemma3", "gemma3:12b"),
    ("deepseek", "deepseek-r1:14b"),
    ("gpt", "gpt-oss:20b"),
];

/// Expands short Ollama model names to their pinned tags; anything else is
/// passed through trimmed.
pub fn resolve_ollama_model(name: &str) -> String {
    let trimmed = name.trim();
    OLLAMA_MODEL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == trimmed)
        .map(|(_, model)| (*model).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Builds the gateway client for the configured provider.
pub fn build_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let http = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build llm http client")?;
    let base_url = config.effective_base_url();

    let client: Arc<dyn LlmClient> = match config.provider {
        LlmProvider::Ollama => {
            Arc::new(OllamaClient::new(http, base_url, resolve_ollama_model(&config.model)))
        }
        LlmProvider::Anthropic => Arc::new(AnthropicClient::new(
            http,
            base_url,
            config.model.clone(),
            required_key(config)?,
            config.max_tokens,
        )),
        LlmProvider::OpenAi => Arc::new(OpenAiClient::new(
            http,
            base_url,
            config.model.clone(),
            required_key(config)?,
        )),
    };

    Ok(client)
}

fn required_key(config: &LlmConfig) -> Result<SecretString> {
    config
        .api_key
        .clone()
        .with_context(|| format!("llm.api_key is required for {}", config.provider.as_str()))
}

async fn read_success_body(response: reqwest::Response, provider: &str) -> Result<String> {
    let status = response.status();
    let body = response.text().await.with_context(|| format!("{provider}: failed to read body"))?;
    if !status.is_success() {
        warn!(provider, status = %status, "llm provider returned a non-success status");
        anyhow::bail!("{provider}: HTTP {status} body={body}");
    }
    Ok(body)
}

/// Local Ollama server, `POST /api/generate` without streaming.
pub struct OllamaClient {
    http: Client,
    url: String,
    model: String,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub fn new(http: Client, base_url: impl AsRef<str>, model: impl Into<String>) -> Self {
        let url = format!("{}/api/generate", base_url.as_ref().trim_end_matches('/'));
        Self { http, url, model: model.into() }
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = OllamaRequest { model: &self.model, prompt, stream: false };
        let response = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("ollama: http error")?;

        let body = read_success_body(response, "ollama").await?;
        let parsed: OllamaResponse = serde_json::from_str(&body).context("ollama: parse")?;
        Ok(parsed.response)
    }
}

/// Anthropic Messages API.
pub struct AnthropicClient {
    http: Client,
    url: String,
    model: String,
    api_key: SecretString,
    max_tokens: u32,
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicClient {
    pub fn new(
        http: Client,
        base_url: impl AsRef<str>,
        model: impl Into<String>,
        api_key: SecretString,
        max_tokens: u32,
    ) -> Self {
        let url = format!("{}/v1/messages", base_url.as_ref().trim_end_matches('/'));
        Self { http, url, model: model.into(), api_key, max_tokens }
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![ChatMessage { role: "user", content: prompt }],
        };
        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&request)
            .send()
            .await
            .context("anthropic: http error")?;

        let body = read_success_body(response, "anthropic").await?;
        let parsed: AnthropicResponse = serde_json::from_str(&body).context("anthropic: parse")?;
        let text = parsed
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<String>();
        Ok(text.trim().to_string())
    }
}

/// OpenAI Responses API.
pub struct OpenAiClient {
    http: Client,
    url: String,
    model: String,
    api_key: SecretString,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    output: Vec<OpenAiOutputItem>,
}

#[derive(Deserialize)]
struct OpenAiOutputItem {
    #[serde(default)]
    content: Vec<OpenAiContent>,
}

#[derive(Deserialize)]
struct OpenAiContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl OpenAiClient {
    pub fn new(
        http: Client,
        base_url: impl AsRef<str>,
        model: impl Into<String>,
        api_key: SecretString,
    ) -> Self {
        let url = format!("{}/v1/responses", base_url.as_ref().trim_end_matches('/'));
        Self { http, url, model: model.into(), api_key }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = OpenAiRequest { model: &self.model, input: prompt };
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .context("openai: http error")?;

        let body = read_success_body(response, "openai").await?;
        let parsed: OpenAiResponse = serde_json::from_str(&body).context("openai: parse")?;
        let text = parsed
            .output
            .into_iter()
            .flat_map(|item| item.content)
            .filter(|content| content.kind == "output_text")
            .filter_map(|content| content.text)
            .collect::<String>();
        Ok(text.trim().to_string())
    }
}
