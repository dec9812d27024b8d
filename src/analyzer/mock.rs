use async_trait::async_trait;

use crate::analyzer::{
    AnalysisResult, Analyzer, AnalyzerError, Horseman, HorsemenDetection, Severity, ThreatLevel,
};

/// Deterministic analyzer used by tests: returns a fixed result keyed by
/// substring match against a small table, rather than calling out to any
/// network service. This is a real implementation of [`Analyzer`], not a
/// mocking-framework stub.
pub struct MockAnalyzer {
    table: Vec<(&'static str, AnalysisResult)>,
    default_score: f64,
}

impl Default for MockAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self {
            table: vec![
                (
                    "pathetic as usual",
                    AnalysisResult {
                        toxicity_score: 0.63,
                        threat_level: ThreatLevel::Medium,
                        horsemen_detected: vec![
                            HorsemenDetection {
                                horseman: Horseman::Contempt,
                                confidence: 0.9,
                                severity: Severity::High,
                                indicators: vec!["pathetic as usual".to_owned()],
                            },
                            HorsemenDetection {
                                horseman: Horseman::Criticism,
                                confidence: 0.6,
                                severity: Severity::Medium,
                                indicators: vec!["the report is wrong".to_owned()],
                            },
                        ],
                        reasoning: "contempt and criticism detected".to_owned(),
                        processing_time_ms: 1,
                    },
                ),
                (
                    "you always forget everything",
                    AnalysisResult {
                        toxicity_score: 0.42,
                        threat_level: ThreatLevel::Low,
                        horsemen_detected: vec![HorsemenDetection {
                            horseman: Horseman::Criticism,
                            confidence: 0.7,
                            severity: Severity::Low,
                            indicators: vec!["you always forget everything".to_owned()],
                        }],
                        reasoning: "mild criticism pattern".to_owned(),
                        processing_time_ms: 1,
                    },
                ),
            ],
            default_score: 0.05,
        }
    }

    /// Builds a mock that always produces the given score, useful for
    /// boundary and property tests that want full control over the
    /// resulting `threat_level` without constructing indicator text.
    pub fn with_fixed_score(score: f64) -> Self {
        Self {
            table: Vec::new(),
            default_score: score,
        }
    }
}

#[async_trait]
impl Analyzer for MockAnalyzer {
    async fn analyze(&self, content: &str, _sender_hint: &str) -> Result<AnalysisResult, AnalyzerError> {
        let lower = content.to_lowercase();
        for (needle, result) in &self.table {
            if lower.contains(needle) {
                return Ok(result.clone());
            }
        }

        Ok(AnalysisResult {
            toxicity_score: self.default_score,
            threat_level: ThreatLevel::from_score(self.default_score),
            horsemen_detected: Vec::new(),
            reasoning: "no known pattern matched".to_owned(),
            processing_time_ms: 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_known_pattern() {
        let analyzer = MockAnalyzer::new();
        let result = analyzer
            .analyze("Fine, whatever. You're pathetic as usual and the report is wrong.", "x")
            .await
            .unwrap();
        assert_eq!(result.threat_level, ThreatLevel::Medium);
    }

    #[tokio::test]
    async fn falls_back_to_default_safe_score() {
        let analyzer = MockAnalyzer::new();
        let result = analyzer.analyze("Want to grab lunch at noon?", "x").await.unwrap();
        assert!(result.safe());
    }
}
