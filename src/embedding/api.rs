//! API-based embedding provider (OpenAI-compatible).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ApiEmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::utils::truncate_str;

use super::EmbeddingProvider;

/// Upper bound on error body bytes carried into error messages.
const MAX_ERROR_BODY: usize = 512;

/// OpenAI-compatible API embedding provider.
pub struct ApiEmbeddingProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

/// OpenAI embedding request format.
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    dimensions: usize,
    encoding_format: &'a str,
}

/// OpenAI embedding response format.
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// OpenAI error response format.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl ApiEmbeddingProvider {
    /// Create a new API embedding provider from configuration.
    pub fn from_config(config: &ApiEmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                EmbeddingError::Api(
                    "API key not provided and OPENAI_API_KEY env var not set".to_string(),
                )
            })?;

        Self::new(&config.base_url, &config.model, &api_key, config.timeout_secs)
    }

    /// Create a new API embedding provider with explicit parameters.
    pub fn new(base_url: &str, model: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Api(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Make an embedding request to the API.
    async fn request_embeddings(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: dimension,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Api("Request timed out".to_string())
                } else if e.is_connect() {
                    EmbeddingError::Api(format!("Connection failed: {}", e))
                } else {
                    EmbeddingError::Api(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();

        if status.is_success() {
            let result: EmbeddingResponse = response.json().await.map_err(|e| {
                EmbeddingError::Api(format!("Failed to parse response: {}", e))
            })?;

            // Sort by index to ensure correct order
            let mut data = result.data;
            data.sort_by_key(|d| d.index);

            Ok(data.into_iter().map(|d| d.embedding).collect())
        } else if status.as_u16() == 429 {
            Err(EmbeddingError::RateLimited.into())
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(classify_error(status.as_u16(), &error_text).into())
        }
    }
}

/// Map a non-success response body to an error, singling out token-limit failures.
fn classify_error(status: u16, body: &str) -> EmbeddingError {
    let (message, code) = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(parsed) => (parsed.error.message, parsed.error.code),
        Err(_) => (truncate_str(body, MAX_ERROR_BODY).to_string(), None),
    };

    if is_token_limit(&message, code.as_deref()) {
        EmbeddingError::TokenLimit(message)
    } else {
        EmbeddingError::Api(format!("API error ({}): {}", status, message))
    }
}

fn is_token_limit(message: &str, code: Option<&str>) -> bool {
    if code == Some("context_length_exceeded") {
        return true;
    }
    let message = message.to_lowercase();
    message.contains("token count")
        || message.contains("maximum context length")
        || message.contains("too many tokens")
}

#[async_trait]
impl EmbeddingProvider for ApiEmbeddingProvider {
    async fn embed(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        self.request_embeddings(texts, dimension).await
    }

    fn name(&self) -> &str {
        &self.model
    }
}
