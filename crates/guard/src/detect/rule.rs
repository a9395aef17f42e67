//! Rule model for the instruction-likeness detector.
//!
//! Rules are declared in a data file (see `packs.rs`) and compiled once at
//! policy-snapshot load. A matcher is a small tagged variant rather than a
//! trait object: there are exactly three kinds and the dispatch sites want
//! to treat them differently (phrase rules get a second, shadow-projected
//! pass; regex and structural rules do not).

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use regex::Regex;
use serde::Deserialize;

use crate::error::{GuardError, Result};
use crate::shadow::collapse_phrase;

/// Minimum collapsed length for a phrase to participate in shadow
/// matching. Shorter projections match too freely once separators are
/// gone.
const SHADOW_MIN_LEN: usize = 8;

/// The loosest profile that still runs a rule. Active sets compose as
/// `permissive ⊂ balanced ⊂ strict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Permissive,
    Balanced,
    Strict,
}

impl Tier {
    fn rank(self) -> u8 {
        match self {
            Self::Permissive => 1,
            Self::Balanced => 2,
            Self::Strict => 3,
        }
    }

    /// Whether a rule of this tier is active under the given profile tier.
    pub fn active_under(self, profile: Tier) -> bool {
        self.rank() <= profile.rank()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatcherDef {
    Phrase { phrases: Vec<String> },
    Regex { pattern: String },
    Structural { predicate: StructuralPredicate },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralPredicate {
    /// A line starting with a numbered marker and an imperative verb,
    /// with a dangerous term later in the same line.
    NumberedImperative,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleDef {
    pub code: String,
    pub tier: Tier,
    pub weight: f64,
    pub matcher: MatcherDef,
}

pub struct CompiledRule {
    pub code: String,
    pub tier: Tier,
    pub weight: f64,
    pub matcher: CompiledMatcher,
}

pub enum CompiledMatcher {
    Phrase(PhraseMatcher),
    Regex(Regex),
    Structural(StructuralPredicate),
}

/// Case-folded literal set matched against the folded normalized text and
/// (for phrases long enough to survive collapsing) against the shadow.
pub struct PhraseMatcher {
    pub direct: AhoCorasick,
    /// Per-pattern flags: does the phrase start/end with an ASCII
    /// alphanumeric? Boundary checks only apply on those sides, so CJK
    /// phrases — which have no word separators — still match.
    pub edges: Vec<(bool, bool)>,
    pub shadow: Option<AhoCorasick>,
}

pub fn compile_rule(def: &RuleDef) -> Result<CompiledRule> {
    if !(def.weight > 0.0 && def.weight <= 1.0) {
        return Err(GuardError::Config(format!(
            "rule {} has weight {} outside (0, 1]",
            def.code, def.weight
        )));
    }
    let matcher = match &def.matcher {
        MatcherDef::Phrase { phrases } => CompiledMatcher::Phrase(compile_phrases(&def.code, phrases)?),
        MatcherDef::Regex { pattern } => {
            let regex = Regex::new(pattern).map_err(|err| {
                GuardError::Config(format!("rule {}: bad regex: {err}", def.code))
            })?;
            CompiledMatcher::Regex(regex)
        }
        MatcherDef::Structural { predicate } => CompiledMatcher::Structural(*predicate),
    };
    Ok(CompiledRule {
        code: def.code.clone(),
        tier: def.tier,
        weight: def.weight,
        matcher,
    })
}

fn compile_phrases(code: &str, phrases: &[String]) -> Result<PhraseMatcher> {
    if phrases.is_empty() {
        return Err(GuardError::Config(format!("rule {code} has an empty phrase set")));
    }
    let folded: Vec<String> = phrases.iter().map(|p| p.to_lowercase()).collect();
    let edges = folded
        .iter()
        .map(|p| {
            let first = p.chars().next().is_some_and(|c| c.is_ascii_alphanumeric());
            let last = p.chars().next_back().is_some_and(|c| c.is_ascii_alphanumeric());
            (first, last)
        })
        .collect();

    let direct = AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostFirst)
        .build(&folded)
        .map_err(|err| GuardError::Config(format!("rule {code}: {err}")))?;

    let collapsed: Vec<String> = folded
        .iter()
        .map(|p| collapse_phrase(p))
        .filter(|c| c.len() >= SHADOW_MIN_LEN)
        .collect();
    let shadow = if collapsed.is_empty() {
        None
    } else {
        Some(
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostFirst)
                .build(&collapsed)
                .map_err(|err| GuardError::Config(format!("rule {code}: {err}")))?,
        )
    };

    Ok(PhraseMatcher {
        direct,
        edges,
        shadow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_composition_is_nested() {
        assert!(Tier::Permissive.active_under(Tier::Permissive));
        assert!(Tier::Permissive.active_under(Tier::Strict));
        assert!(!Tier::Strict.active_under(Tier::Balanced));
        assert!(Tier::Balanced.active_under(Tier::Strict));
    }

    #[test]
    fn weight_outside_unit_interval_is_rejected() {
        let def = RuleDef {
            code: "X".to_string(),
            tier: Tier::Permissive,
            weight: 1.5,
            matcher: MatcherDef::Regex { pattern: "x".to_string() },
        };
        assert!(compile_rule(&def).is_err());
    }

    #[test]
    fn short_phrases_skip_shadow_matching() {
        let def = RuleDef {
            code: "X".to_string(),
            tier: Tier::Permissive,
            weight: 0.5,
            matcher: MatcherDef::Phrase { phrases: vec!["no".to_string()] },
        };
        let compiled = compile_rule(&def).unwrap();
        match compiled.matcher {
            CompiledMatcher::Phrase(p) => assert!(p.shadow.is_none()),
            _ => panic!("expected phrase matcher"),
        }
    }
}
