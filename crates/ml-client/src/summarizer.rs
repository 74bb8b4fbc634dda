use async_trait::async_trait;
use forecast_core::{Forecast, TensorOutput};
use serde_json::json;
use std::time::Duration;

use crate::error::{EnrichmentError, EnrichmentResult};

/// Produces a short natural-language description of a model output.
#[async_trait]
pub trait TextSummarizer: Send + Sync {
    /// An empty reply is an error, not an empty summary.
    async fn summarize(&self, output: &TensorOutput, context: &Forecast) -> EnrichmentResult<String>;
}

/// Settings for an OpenAI-compatible chat completion endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            max_tokens: 128,
            temperature: 0.2,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Summarizer that asks a chat completion model for the description.
pub struct ChatSummarizer {
    client: reqwest::Client,
    config: LlmConfig,
    api_key: String,
}

impl ChatSummarizer {
    pub fn new(config: LlmConfig) -> EnrichmentResult<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            EnrichmentError::Config(
                "LLM API key not provided. Set OPENAI_API_KEY or llm_api_key.".into(),
            )
        })?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn build_prompt(output: &TensorOutput, context: &Forecast) -> String {
        let context = serde_json::to_string(context).unwrap_or_default();
        format!(
            "Summarize the following tensor model output for a trading forecast. Output: {}. Context: {}",
            output, context
        )
    }
}

#[async_trait]
impl TextSummarizer for ChatSummarizer {
    async fn summarize(&self, output: &TensorOutput, context: &Forecast) -> EnrichmentResult<String> {
        let req_body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "user", "content": Self::build_prompt(output, context)}
            ],
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        });

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        tracing::debug!("Calling LLM at {} with model {}", url, self.config.model);

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&req_body)
            .send()
            .await?;

        if !res.status().is_success() {
            let status = res.status();
            let err_text = res.text().await.unwrap_or_default();
            return Err(EnrichmentError::Summarization(format!(
                "LLM API error ({}): {}",
                status, err_text
            )));
        }

        let resp_json: serde_json::Value = res.json().await?;
        let content = resp_json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| EnrichmentError::Summarization("No content in LLM response".into()))?;

        Ok(content.to_string())
    }
}
