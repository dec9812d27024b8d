use std::time::Instant;

use async_trait::async_trait;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::warn;

use crate::analyzer::{AnalysisResult, Analyzer, AnalyzerError, ThreatLevel};

/// Concrete [`Analyzer`] wrapping an LLM toxicity-classification endpoint.
/// Knows nothing about email beyond the fact that it is handed a body of
/// text; the endpoint is expected to return the "Four Horsemen" taxonomy
/// directly so this layer stays a thin transport adapter.
pub struct LlmAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct LlmResponse {
    toxicity_score: f64,
    horsemen_detected: Vec<crate::analyzer::HorsemenDetection>,
    reasoning: String,
}

impl LlmAnalyzer {
    pub fn new(endpoint: String, api_key: String) -> Result<Self, AnalyzerError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            format!("Bearer {api_key}")
                .parse()
                .map_err(|_| AnalyzerError::InvalidResponse("invalid api key".into()))?,
        );
        headers.insert(CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(ACCEPT, "application/json".parse().unwrap());

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| AnalyzerError::Upstream(e.to_string()))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl Analyzer for LlmAnalyzer {
    async fn analyze(&self, content: &str, sender_hint: &str) -> Result<AnalysisResult, AnalyzerError> {
        let start = Instant::now();

        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "content": content,
                "sender_hint": sender_hint,
            }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "analyzer upstream request failed");
                AnalyzerError::Upstream(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(AnalyzerError::Upstream(format!(
                "analyzer returned status {}",
                response.status()
            )));
        }

        let body: LlmResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::InvalidResponse(e.to_string()))?;

        if !(0.0..=1.0).contains(&body.toxicity_score) {
            return Err(AnalyzerError::InvalidResponse(
                "toxicity_score out of range".into(),
            ));
        }

        Ok(AnalysisResult {
            threat_level: ThreatLevel::from_score(body.toxicity_score),
            toxicity_score: body.toxicity_score,
            horsemen_detected: body.horsemen_detected,
            reasoning: body.reasoning,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
