//! Black-box oracle client.
//!
//! The oracle accepts a prompt plus a strict output schema and returns
//! JSON. Two planner features sit on top of it: free-text metadata
//! extraction (normalizer) and LLM-backed ranking. Both validate the
//! returned document themselves; the client only guarantees that the
//! response parses as JSON.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::OracleConfig;
use crate::error::{PlannerError, Result};

/// A prompt-plus-schema completion service.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Submits a prompt with a strict output schema and returns the
    /// JSON the model produced.
    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Value>;
}

/// HTTP oracle client.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    client: Client,
    base_url: String,
    token: Option<String>,
    model: String,
}

impl HttpOracle {
    /// Creates an oracle client from configuration.
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            token: config.token.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, prompt: &str, schema: &Value) -> Result<Value> {
        let url = format!("{}/v1/generate", self.base_url);
        let mut request = self.client.post(&url).json(&json!({
            "model": self.model,
            "prompt": prompt,
            "response_schema": schema,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            // Keep the status on the error so 5xx classifies as transient.
            let error = response.error_for_status().expect_err("status checked");
            return Err(PlannerError::Http(error));
        }

        let body: Value = response.json().await?;
        // The service wraps the model output in a `content` field; some
        // deployments return the document bare.
        Ok(body.get("content").cloned().unwrap_or(body))
    }
}

/// Strips a markdown code fence from model output, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}
