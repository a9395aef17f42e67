//! Risk scoring, the fifth pipeline stage.
//!
//! Deterministic noisy-or over the weights of distinct reason codes:
//! `1 − ∏(1 − wᵢ)`, clamped to [0, 1]. Duplicate codes collapse to their
//! first occurrence, so score is independent of how often (or where) a
//! pattern matched and of text length.

use std::collections::HashSet;

use crate::core::{ScanState, Stage};
use crate::error::Result;

pub struct Scorer;

impl Stage for Scorer {
    fn name(&self) -> &'static str {
        "score"
    }

    fn apply(&self, state: &mut ScanState) -> Result<()> {
        let mut seen = HashSet::new();
        let mut survival = 1.0f64;
        for finding in &state.findings {
            if seen.insert(finding.code.as_str()) {
                survival *= 1.0 - finding.weight.clamp(0.0, 1.0);
            }
        }
        state.risk_score = (1.0 - survival).clamp(0.0, 1.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Finding, ScanState, SourceDescriptor};

    fn score(findings: Vec<Finding>) -> f64 {
        let mut state = ScanState::new(Vec::new(), SourceDescriptor::inline("req-sc"));
        for finding in findings {
            state.push_finding(finding);
        }
        Scorer.apply(&mut state).unwrap();
        state.risk_score
    }

    #[test]
    fn single_weight_passes_through() {
        assert!((score(vec![Finding::new("A", 0.7)]) - 0.7).abs() < 1e-9);
    }

    #[test]
    fn independent_weights_combine() {
        let s = score(vec![Finding::new("A", 0.7), Finding::new("B", 0.6)]);
        assert!((s - 0.88).abs() < 1e-9);
    }

    #[test]
    fn duplicate_codes_collapse() {
        let once = score(vec![Finding::new("A", 0.5)]);
        let twice = score(vec![Finding::new("A", 0.5), Finding::new("A", 0.5)]);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_findings_score_zero() {
        assert_eq!(score(Vec::new()), 0.0);
    }
}
