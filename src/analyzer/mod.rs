mod llm;
mod mock;

pub use llm::LlmAnalyzer;
pub use mock::MockAnalyzer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("analysis timed out")]
    Timeout,
    #[error("upstream analyzer error: {0}")]
    Upstream(String),
    #[error("analyzer returned an invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Canonical derivation from score, used by both analyzer
    /// implementations and the decision engine for cross-validation. On an
    /// exact threshold boundary the lower-severity bucket applies (0.30
    /// lands in `safe`, 0.90 lands in `high`, not `critical`).
    pub fn from_score(score: f64) -> Self {
        if score <= 0.30 {
            ThreatLevel::Safe
        } else if score <= 0.55 {
            ThreatLevel::Low
        } else if score <= 0.70 {
            ThreatLevel::Medium
        } else if score <= 0.90 {
            ThreatLevel::High
        } else {
            ThreatLevel::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horseman {
    Criticism,
    Contempt,
    Defensiveness,
    Stonewalling,
}

impl std::fmt::Display for Horseman {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Horseman::Criticism => "criticism",
            Horseman::Contempt => "contempt",
            Horseman::Defensiveness => "defensiveness",
            Horseman::Stonewalling => "stonewalling",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HorsemenDetection {
    pub horseman: Horseman,
    pub confidence: f64,
    pub severity: Severity,
    pub indicators: Vec<String>,
}

/// Produced by the [`Analyzer`], consumed by the decision engine. Lives only
/// in the orchestrator's call stack and is discarded after action
/// selection; it is never written anywhere durable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub toxicity_score: f64,
    pub threat_level: ThreatLevel,
    pub horsemen_detected: Vec<HorsemenDetection>,
    pub reasoning: String,
    pub processing_time_ms: u64,
}

impl AnalysisResult {
    pub fn safe(&self) -> bool {
        self.threat_level == ThreatLevel::Safe
    }
}

/// Contract for LLM toxicity analysis. Deliberately text-agnostic: the port
/// accepts any string content, the concrete implementation wrapping an LLM
/// client is the only part of the system that knows it is handling email.
/// The hard wall-clock ceiling from the configuration is enforced by the
/// orchestrator via `tokio::time::timeout`, not by implementations of this
/// trait.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, content: &str, sender_hint: &str) -> Result<AnalysisResult, AnalyzerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threat_level_boundaries() {
        assert_eq!(ThreatLevel::from_score(0.0), ThreatLevel::Safe);
        assert_eq!(ThreatLevel::from_score(0.30), ThreatLevel::Safe);
        assert_eq!(ThreatLevel::from_score(0.31), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.55), ThreatLevel::Low);
        assert_eq!(ThreatLevel::from_score(0.56), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.70), ThreatLevel::Medium);
        assert_eq!(ThreatLevel::from_score(0.71), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(0.90), ThreatLevel::High);
        assert_eq!(ThreatLevel::from_score(0.91), ThreatLevel::Critical);
        assert_eq!(ThreatLevel::from_score(1.0), ThreatLevel::Critical);
    }
}
