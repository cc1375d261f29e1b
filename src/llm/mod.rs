pub mod narrative;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::settings::Settings;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o";
const OPENAI_TEMPERATURE: f64 = 0.4;
const OPENAI_MAX_TOKENS: u32 = 1200;

/// A text-generation backend: prompt in, text out.
///
/// Futures are not required to be `Send`; generation runs on the caller's task.
#[async_trait(?Send)]
pub trait TextGenerator {
    /// Model identifier recorded alongside generated text.
    fn model(&self) -> &str;

    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Build the generator selected by `llm_provider` / `llm_model`.
pub async fn create_generator(settings: &Settings) -> Result<Box<dyn TextGenerator>> {
    match settings.llm_provider.as_str() {
        "openai" => Ok(Box::new(OpenAiGenerator::from_env(settings.llm_model.clone())?)),
        provider @ ("bedrock" | "anthropic") => {
            let model = settings.llm_model.as_deref().unwrap_or("claude-sonnet-4-5");
            let agent = build_agent(provider, model).await?;
            Ok(Box::new(AgentGenerator {
                agent,
                model: format!("{provider}/{model}"),
            }))
        }
        other => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

// ── mixtape ────────────────────────────────────────────────────────

/// Claude through a mixtape agent.
pub struct AgentGenerator {
    agent: mixtape_core::Agent,
    model: String,
}

#[async_trait(?Send)]
impl TextGenerator for AgentGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        let prompt = format!("{system}\n\n{prompt}");
        let response = self
            .agent
            .run(&prompt)
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;
        Ok(response.text().trim().to_string())
    }
}

async fn build_agent(provider: &str, model_name: &str) -> Result<mixtape_core::Agent> {
    // Each combination needs its own builder call since the model types are different.
    match (provider, model_name) {
        ("bedrock", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("bedrock", _) => mixtape_core::Agent::builder()
            .bedrock(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", "claude-haiku-4-5" | "haiku") => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeHaiku4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        ("anthropic", _) => mixtape_core::Agent::builder()
            .anthropic_from_env(mixtape_core::ClaudeSonnet4_5)
            .build()
            .await
            .map_err(|e| Error::Llm(e.to_string())),
        (other, _) => Err(Error::Config(format!("unknown llm_provider: {other}"))),
    }
}

// ── OpenAI ─────────────────────────────────────────────────────────

/// OpenAI-compatible chat completions client.
pub struct OpenAiGenerator {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiGenerator {
    pub fn new(api_key: impl Into<String>, model: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    /// Build from `OPENAI_API_KEY`. `OPENAI_BASE_URL` points it at another
    /// OpenAI-compatible endpoint.
    pub fn from_env(model: Option<String>) -> Result<Self> {
        let key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("OPENAI_API_KEY is not set".into()))?;
        let generator = Self::new(key, model);
        match std::env::var("OPENAI_BASE_URL") {
            Ok(url) if !url.trim().is_empty() => Ok(generator.with_base_url(url)),
            _ => Ok(generator),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(&self, system: &str, prompt: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": OPENAI_TEMPERATURE,
            "max_tokens": OPENAI_MAX_TOKENS,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        })
    }
}

fn completion_text(body: &Value) -> Result<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::Llm("response has no message content".into()))
}

#[async_trait(?Send)]
impl TextGenerator for OpenAiGenerator {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        log::debug!("Requesting completion from {} ({} chars)", self.model, prompt.len());
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.request_body(system, prompt))
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited { retry_after: None });
        }
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("completion request failed ({status}): {detail}")));
        }
        let body: Value = resp.json().await?;
        completion_text(&body)
    }
}
