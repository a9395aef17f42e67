//! Policy profiles and the decision stage.
//!
//! Decisions are a pure function of the profile, the rounded risk score,
//! and the reason set. Hard-block reasons override the score bands; the
//! bands themselves widen monotonically from strict to permissive, which
//! is what makes profile behavior monotone: anything strict allows,
//! balanced and permissive allow too.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{codes, round_score, Decision, ScanState, Stage};
use crate::detect::rule::Tier;
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Strict,
    Balanced,
    Permissive,
}

impl Default for Profile {
    fn default() -> Self {
        Self::Balanced
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Balanced => "balanced",
            Self::Permissive => "permissive",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "strict" => Ok(Self::Strict),
            "balanced" => Ok(Self::Balanced),
            "permissive" => Ok(Self::Permissive),
            other => Err(GuardError::Config(format!("unknown profile {other:?}"))),
        }
    }

    /// Which detector rules are active under this profile.
    pub fn tier(self) -> Tier {
        match self {
            Self::Strict => Tier::Strict,
            Self::Balanced => Tier::Balanced,
            Self::Permissive => Tier::Permissive,
        }
    }

    /// `(warn_at, block_at)`: ALLOW below the first, BLOCK at or above
    /// the second.
    pub fn thresholds(self) -> (f64, f64) {
        match self {
            Self::Strict => (0.20, 0.40),
            Self::Balanced => (0.35, 0.65),
            Self::Permissive => (0.55, 0.80),
        }
    }

    /// Reasons that block regardless of score.
    pub fn is_hard_block(self, reason: &str) -> bool {
        match reason {
            codes::SSRF_BLOCKED
            | codes::NEW_SOURCE_REQUIRES_APPROVAL
            | codes::TAG_CHARS
            | codes::SIZE_EXCEEDED => true,
            codes::ENCODING_INVALID => self == Self::Strict,
            _ => false,
        }
    }

    /// Reasons for which a BLOCK withholds even the sanitized rendering.
    pub fn hides_sanitized(self, reason: &str) -> bool {
        matches!(reason, codes::SECRET_EXFIL | codes::SSRF_BLOCKED)
    }

    /// Whether WARN outcomes are quarantined too.
    pub fn quarantines_warns(self) -> bool {
        self == Self::Strict
    }
}

pub fn decide(profile: Profile, risk_score: f64, reasons: &[String]) -> Decision {
    if reasons.iter().any(|r| profile.is_hard_block(r)) {
        return Decision::Block;
    }
    let score = round_score(risk_score);
    let (warn_at, block_at) = profile.thresholds();
    if score >= block_at {
        Decision::Block
    } else if score >= warn_at {
        Decision::Warn
    } else {
        Decision::Allow
    }
}

pub struct Decider {
    profile: Profile,
}

impl Decider {
    pub fn new(profile: Profile) -> Self {
        Self { profile }
    }
}

impl Stage for Decider {
    fn name(&self) -> &'static str {
        "decide"
    }

    fn apply(&self, state: &mut ScanState) -> Result<()> {
        let reasons = state.reason_codes();
        state.decision = Some(decide(self.profile, state.risk_score, &reasons));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasons(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn threshold_bands() {
        assert_eq!(decide(Profile::Balanced, 0.10, &[]), Decision::Allow);
        assert_eq!(decide(Profile::Balanced, 0.35, &[]), Decision::Warn);
        assert_eq!(decide(Profile::Balanced, 0.64, &[]), Decision::Warn);
        assert_eq!(decide(Profile::Balanced, 0.65, &[]), Decision::Block);
    }

    #[test]
    fn hard_block_overrides_low_score() {
        let decision = decide(Profile::Permissive, 0.0, &reasons(&["SSRF_BLOCKED"]));
        assert_eq!(decision, Decision::Block);
        let decision = decide(Profile::Permissive, 0.0, &reasons(&["TAG_CHARS"]));
        assert_eq!(decision, Decision::Block);
    }

    #[test]
    fn encoding_invalid_hard_blocks_only_in_strict() {
        let codes = reasons(&["ENCODING_INVALID"]);
        assert_eq!(decide(Profile::Strict, 0.0, &codes), Decision::Block);
        assert_eq!(decide(Profile::Balanced, 0.0, &codes), Decision::Allow);
    }

    #[test]
    fn score_rounding_applies_before_comparison() {
        // 0.64996 rounds to 0.65, the balanced block threshold.
        assert_eq!(decide(Profile::Balanced, 0.649_96, &[]), Decision::Block);
        assert_eq!(decide(Profile::Balanced, 0.649_4, &[]), Decision::Warn);
    }

    #[test]
    fn profiles_are_monotone_on_score() {
        for score in [0.0, 0.15, 0.25, 0.45, 0.60, 0.70, 0.85, 1.0] {
            let strict = decide(Profile::Strict, score, &[]);
            let balanced = decide(Profile::Balanced, score, &[]);
            let permissive = decide(Profile::Permissive, score, &[]);
            if strict == Decision::Allow {
                assert_eq!(balanced, Decision::Allow);
                assert_eq!(permissive, Decision::Allow);
            }
            if permissive == Decision::Block {
                assert_eq!(balanced, Decision::Block);
                assert_eq!(strict, Decision::Block);
            }
        }
    }
}
