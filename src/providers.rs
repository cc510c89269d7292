//! Concrete embedding and generation providers.
//!
//! Both talk to OpenAI-compatible HTTP APIs (`/embeddings` and
//! `/chat/completions`) through `reqwest`, with exponential backoff on
//! rate limits, server errors, and transport failures. Client errors
//! other than 429 fail immediately and are reported as non-retryable.
//!
//! The `disabled` variants satisfy the traits without any network access
//! so commands that never embed or generate (stats, history, clear) work
//! without credentials.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use docchat_core::{Capability, CoreError, Embedder, Generator};

use crate::config::{EmbeddingConfig, GenerationConfig};

const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Build the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => {
            let model = config
                .model
                .clone()
                .context("embedding.model is required for the openai provider")?;
            let dims = config
                .dims
                .context("embedding.dims is required for the openai provider")?;
            Ok(Arc::new(OpenAiEmbedder {
                client: http_client(config.timeout_secs)?,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: read_api_key()?,
                model,
                dims,
                max_retries: config.max_retries,
            }))
        }
        other => anyhow::bail!("Unknown embedding provider: '{}'", other),
    }
}

/// Build the generator named by the configuration.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            let model = config
                .model
                .clone()
                .context("generation.model is required for the openai provider")?;
            Ok(Arc::new(OpenAiGenerator {
                client: http_client(config.timeout_secs)?,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                api_key: read_api_key()?,
                model,
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                max_retries: config.max_retries,
            }))
        }
        other => anyhow::bail!("Unknown generation provider: '{}'", other),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn read_api_key() -> Result<String> {
    std::env::var(API_KEY_ENV)
        .with_context(|| format!("{} environment variable not set", API_KEY_ENV))
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CoreError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": text,
        });

        let response = post_with_retry(
            &self.client,
            &url,
            &self.api_key,
            &body,
            self.max_retries,
            Capability::Embedding,
        )
        .await?;

        let vector: Vec<f32> = response["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| {
                CoreError::provider(
                    Capability::Embedding,
                    "Response missing data[0].embedding",
                    false,
                )
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        if vector.len() != self.dims {
            return Err(CoreError::provider(
                Capability::Embedding,
                format!(
                    "Model '{}' returned {} dimensions, configured for {}",
                    self.model,
                    vector.len(),
                    self.dims
                ),
                false,
            ));
        }

        Ok(vector)
    }
}

/// Generator backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = post_with_retry(
            &self.client,
            &url,
            &self.api_key,
            &body,
            self.max_retries,
            Capability::Generation,
        )
        .await?;

        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| {
                CoreError::provider(
                    Capability::Generation,
                    "Response missing choices[0].message.content",
                    false,
                )
            })
    }
}

/// POST a JSON body, retrying transient failures with exponential backoff.
///
/// 429 and 5xx responses and transport errors get up to `max_retries`
/// total attempts, delayed 1, 2, 4, ... seconds (capped at 32). Other
/// non-success statuses fail immediately as non-retryable.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Value,
    max_retries: u32,
    capability: Capability,
) -> Result<Value, CoreError> {
    let mut last_error = CoreError::provider(capability, "No request attempted", true);

    for attempt in 1..=max_retries.max(1) {
        if attempt > 1 {
            let delay = 1u64 << (attempt - 2).min(5);
            debug!(%url, attempt, delay_secs = delay, "retrying provider request");
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }

        let result = client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!(%url, attempt, error = %err, "provider request failed");
                last_error =
                    CoreError::provider(capability, format!("Request failed: {err}"), true);
                continue;
            }
        };

        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|err| {
                CoreError::provider(capability, format!("Invalid JSON response: {err}"), false)
            });
        }

        let text = response.text().await.unwrap_or_default();
        let retryable = status.as_u16() == 429 || status.is_server_error();
        let error = CoreError::provider(
            capability,
            format!("HTTP {status}: {}", text.chars().take(200).collect::<String>()),
            retryable,
        );
        if !retryable {
            return Err(error);
        }
        warn!(%url, attempt, %status, "provider returned retryable status");
        last_error = error;
    }

    Err(last_error)
}

/// Placeholder embedder for configurations without an embedding backend.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CoreError> {
        Err(CoreError::provider(
            Capability::Embedding,
            "Embedding provider is disabled. Set embedding.provider in the config.",
            false,
        ))
    }
}

/// Placeholder generator for configurations without a generation backend.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, CoreError> {
        Err(CoreError::provider(
            Capability::Generation,
            "Generation provider is disabled. Set generation.provider in the config.",
            false,
        ))
    }
}
