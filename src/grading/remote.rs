//! HTTP evaluator.
//!
//! Posts the evaluation request to `{base-url}/functions/v1/{function}`
//! with the configured bearer key.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::EvaluatorSettings;
use crate::error::SightSingError;

use super::evaluator::{EvaluationRequest, EvaluationResponse, Evaluator};

/// JSON-over-HTTP seam, replaceable in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: Value,
    ) -> Result<Value, SightSingError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, SightSingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SightSingError::Evaluator(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: Value,
    ) -> Result<Value, SightSingError> {
        let mut request = self.client.post(url).json(&body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key).header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SightSingError::Evaluator(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SightSingError::Evaluator(format!("HTTP {}: {}", status, text)));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SightSingError::Evaluator(format!("invalid JSON body: {}", e)))
    }
}

pub struct RemoteEvaluator<T: Transport = HttpTransport> {
    transport: T,
    url: String,
    api_key: Option<String>,
}

impl RemoteEvaluator<HttpTransport> {
    /// Build from settings. Fails when no base URL is configured.
    pub fn from_settings(settings: &EvaluatorSettings) -> Result<Self, SightSingError> {
        let base = settings.base_url.as_deref().ok_or_else(|| {
            SightSingError::Config("evaluator.base-url is not set".to_string())
        })?;
        let url = format!(
            "{}/functions/v1/{}",
            base.trim_end_matches('/'),
            settings.function
        );
        let transport = HttpTransport::new(Duration::from_secs(settings.timeout_secs))?;
        Ok(Self::new(transport, url, settings.api_key()))
    }
}

impl<T: Transport> RemoteEvaluator<T> {
    pub fn new(transport: T, url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            transport,
            url: url.into(),
            api_key,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl<T: Transport> Evaluator for RemoteEvaluator<T> {
    fn name(&self) -> &str {
        "remote"
    }

    async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<EvaluationResponse, SightSingError> {
        let body = serde_json::to_value(request)
            .map_err(|e| SightSingError::Encoding(e.to_string()))?;
        log::debug!("posting evaluation request to {}", self.url);
        let value = self
            .transport
            .post_json(&self.url, self.api_key.as_deref(), body)
            .await?;

        // Edge functions report failures as a 200 with an `error` field
        if let Some(message) = value.get("error").and_then(Value::as_str) {
            return Err(SightSingError::Evaluator(message.to_string()));
        }
        let response: EvaluationResponse = serde_json::from_value(value)
            .map_err(|e| SightSingError::Evaluator(format!("unexpected response: {}", e)))?;

        let a = &response.assessment;
        let scores = [
            a.pitch_accuracy,
            a.rhythm_accuracy,
            a.timing_accuracy,
            a.overall_score,
        ];
        if scores.iter().any(|s| !s.is_finite()) {
            return Err(SightSingError::Evaluator(
                "assessment contains a non-numeric score".to_string(),
            ));
        }
        Ok(response)
    }
}
