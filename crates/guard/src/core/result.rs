use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::finding::Redaction;
use crate::core::source::SourceDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Decision {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "BLOCK")]
    Block,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allow => write!(f, "ALLOW"),
            Self::Warn => write!(f, "WARN"),
            Self::Block => write!(f, "BLOCK"),
        }
    }
}

/// The external contract of a scan: everything a client learns about a
/// piece of untrusted content. Original bytes never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardResult {
    pub decision: Decision,
    pub risk_score: f64,
    pub reasons: Vec<String>,
    pub source: SourceDescriptor,
    pub content_hash: String,
    pub sanitized_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_id: Option<String>,
    pub redactions: Vec<Redaction>,
    pub cache_hit: bool,
    pub policy_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
}

impl GuardResult {
    /// A boundary-level BLOCK produced before any bytes reached the
    /// pipeline (SSRF, missing approval, fetch failure). There is nothing
    /// to hash, sanitize, or quarantine.
    pub fn blocked(
        reason: &str,
        source: SourceDescriptor,
        policy_version: impl Into<String>,
    ) -> Self {
        Self {
            decision: Decision::Block,
            risk_score: 1.0,
            reasons: vec![reason.to_string()],
            source,
            content_hash: String::new(),
            sanitized_text: String::new(),
            quarantine_id: None,
            redactions: Vec::new(),
            cache_hit: false,
            policy_version: policy_version.into(),
            approval_id: None,
        }
    }

    pub fn with_approval_id(mut self, approval_id: impl Into<String>) -> Self {
        self.approval_id = Some(approval_id.into());
        self
    }
}

/// Round a risk score to the 4-decimal precision the decision layer and
/// the external contract use.
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Decision::Block).unwrap(), "\"BLOCK\"");
        let parsed: Decision = serde_json::from_str("\"WARN\"").unwrap();
        assert_eq!(parsed, Decision::Warn);
    }

    #[test]
    fn round_score_is_stable_at_four_decimals() {
        assert_eq!(round_score(0.123_449), 0.1234);
        assert_eq!(round_score(0.123_45), 0.1235);
        assert_eq!(round_score(1.0), 1.0);
    }
}
