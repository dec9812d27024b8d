use serde::{Deserialize, Serialize};

use crate::analyzer::{AnalysisResult, ThreatLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ForwardClean,
    ForwardWithContext,
    RedactHarmful,
    SummarizeOnly,
    BlockEntirely,
}

/// `{ action, rationale, transformation_hint }`. `rationale` is a short
/// digest only (threat level + horsemen names) — never the analyzer's free
/// text `reasoning`, nor any quoted indicator, so that blocked-message
/// logging cannot leak message content even at `info` level.
#[derive(Debug, Clone)]
pub struct ProtectionDecision {
    pub action: Action,
    pub rationale: String,
    pub transformation_hint: AnalysisResult,
}

/// Graduated-action policy as data: one row per threat-level bucket so a
/// future per-tenant override needs only a different table, not new code.
#[derive(Debug, Clone)]
pub struct DecisionPolicy {
    table: Vec<(ThreatLevel, Action)>,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            table: vec![
                (ThreatLevel::Safe, Action::ForwardClean),
                (ThreatLevel::Low, Action::ForwardWithContext),
                (ThreatLevel::Medium, Action::RedactHarmful),
                (ThreatLevel::High, Action::SummarizeOnly),
                (ThreatLevel::Critical, Action::BlockEntirely),
            ],
        }
    }
}

impl DecisionPolicy {
    fn action_for(&self, threat_level: ThreatLevel) -> Action {
        self.table
            .iter()
            .find(|(level, _)| *level == threat_level)
            .map(|(_, action)| *action)
            .unwrap_or(Action::ForwardWithContext)
    }
}

fn rationale_digest(analysis: &AnalysisResult) -> String {
    if analysis.horsemen_detected.is_empty() {
        format!("{:?}", analysis.threat_level)
    } else {
        let names: Vec<String> = analysis
            .horsemen_detected
            .iter()
            .map(|h| h.horseman.to_string())
            .collect();
        format!("{:?}: {}", analysis.threat_level, names.join(", "))
    }
}

/// Pure function mapping an [`AnalysisResult`] to a [`ProtectionDecision`].
/// `decide(r) == decide(r)` for identical `r`: no I/O, no mutable state.
pub fn decide(analysis_result: AnalysisResult, policy: &DecisionPolicy) -> ProtectionDecision {
    let action = policy.action_for(analysis_result.threat_level);
    let rationale = rationale_digest(&analysis_result);
    ProtectionDecision {
        action,
        rationale,
        transformation_hint: analysis_result,
    }
}

/// The orchestrator's fallback when the analyzer reports
/// `AnalysisUnavailable`: the core fails open for deliverability rather
/// than closed, because a false positive from a silent block is judged
/// worse than a missed toxic email.
pub fn decide_analysis_unavailable() -> ProtectionDecision {
    ProtectionDecision {
        action: Action::ForwardWithContext,
        rationale: "analysis-unavailable".to_owned(),
        transformation_hint: AnalysisResult {
            toxicity_score: 0.0,
            threat_level: ThreatLevel::Low,
            horsemen_detected: Vec::new(),
            reasoning: "analysis-unavailable".to_owned(),
            processing_time_ms: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f64) -> AnalysisResult {
        AnalysisResult {
            toxicity_score: score,
            threat_level: ThreatLevel::from_score(score),
            horsemen_detected: Vec::new(),
            reasoning: String::new(),
            processing_time_ms: 0,
        }
    }

    #[test]
    fn boundary_030_is_forward_clean() {
        let decision = decide(result(0.30), &DecisionPolicy::default());
        assert_eq!(decision.action, Action::ForwardClean);
    }

    #[test]
    fn boundary_090_is_summarize_not_block() {
        let decision = decide(result(0.90), &DecisionPolicy::default());
        assert_eq!(decision.action, Action::SummarizeOnly);
    }

    #[test]
    fn is_pure() {
        let a = decide(result(0.5), &DecisionPolicy::default());
        let b = decide(result(0.5), &DecisionPolicy::default());
        assert_eq!(a.action, b.action);
        assert_eq!(a.rationale, b.rationale);
    }

    #[test]
    fn safe_forwards_clean() {
        let decision = decide(result(0.05), &DecisionPolicy::default());
        assert_eq!(decision.action, Action::ForwardClean);
    }

    #[test]
    fn critical_blocks() {
        let decision = decide(result(0.95), &DecisionPolicy::default());
        assert_eq!(decision.action, Action::BlockEntirely);
    }
}
