use std::time::Instant;

use crate::core::finding::{codes, Finding, Redaction};
use crate::core::result::Decision;
use crate::core::source::SourceDescriptor;
use crate::shadow::ShadowText;

/// Mutable state threaded through the pipeline stages for one scan.
///
/// Lives only for the duration of a single scan; stages mutate it strictly
/// in pipeline order. `original` is never modified after construction —
/// the content hash and the quarantine copy both come from it.
pub struct ScanState {
    pub original: Vec<u8>,
    pub normalized: String,
    pub sanitized: String,
    pub shadow: Option<ShadowText>,
    pub findings: Vec<Finding>,
    pub redactions: Vec<Redaction>,
    pub source: SourceDescriptor,
    /// Written by the scorer; rounded at the result boundary.
    pub risk_score: f64,
    /// Written by the decider.
    pub decision: Option<Decision>,
    max_findings: usize,
    deadline: Option<Instant>,
    truncated: bool,
}

impl ScanState {
    pub fn new(original: Vec<u8>, source: SourceDescriptor) -> Self {
        Self {
            original,
            normalized: String::new(),
            sanitized: String::new(),
            shadow: None,
            findings: Vec::new(),
            redactions: Vec::new(),
            source,
            risk_score: 0.0,
            decision: None,
            max_findings: usize::MAX,
            deadline: None,
            truncated: false,
        }
    }

    pub fn with_limits(mut self, max_findings: usize, deadline: Option<Instant>) -> Self {
        self.max_findings = max_findings;
        self.deadline = deadline;
        self
    }

    /// Record a finding, honoring the per-scan cap. Once the cap is hit a
    /// single `RULE_LIMIT_REACHED` marker is appended and further findings
    /// are dropped.
    pub fn push_finding(&mut self, finding: Finding) -> bool {
        if self.truncated {
            return false;
        }
        if self.findings.len() >= self.max_findings {
            self.mark_truncated();
            return false;
        }
        self.findings.push(finding);
        true
    }

    pub fn mark_truncated(&mut self) {
        if !self.truncated {
            self.truncated = true;
            self.findings
                .push(Finding::new(codes::RULE_LIMIT_REACHED, 0.1));
        }
    }

    pub fn truncated(&self) -> bool {
        self.truncated
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.findings.iter().any(|f| f.code == code)
    }

    /// Distinct reason codes in first-occurrence order. Finding order is
    /// rule-declaration order, then first-match offset, so this is the
    /// deterministic reason list the result carries.
    pub fn reason_codes(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for finding in &self.findings {
            if !seen.iter().any(|c| c == &finding.code) {
                seen.push(finding.code.clone());
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ScanState {
        ScanState::new(Vec::new(), SourceDescriptor::inline("req-test"))
    }

    #[test]
    fn reason_codes_deduplicate_in_order() {
        let mut s = state();
        s.push_finding(Finding::new("B_CODE", 0.5));
        s.push_finding(Finding::new("A_CODE", 0.5));
        s.push_finding(Finding::new("B_CODE", 0.5));
        assert_eq!(s.reason_codes(), vec!["B_CODE", "A_CODE"]);
    }

    #[test]
    fn finding_cap_appends_marker_once() {
        let mut s = state().with_limits(2, None);
        assert!(s.push_finding(Finding::new("ONE", 0.5)));
        assert!(s.push_finding(Finding::new("TWO", 0.5)));
        assert!(!s.push_finding(Finding::new("THREE", 0.5)));
        assert!(!s.push_finding(Finding::new("FOUR", 0.5)));
        assert!(s.truncated());
        assert_eq!(s.findings.len(), 3);
        assert_eq!(s.findings[2].code, codes::RULE_LIMIT_REACHED);
    }
}
