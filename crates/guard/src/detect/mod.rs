//! Instruction-likeness detection, the third pipeline stage.
//!
//! Rules come from the compiled pack on the policy snapshot and run in
//! declaration order: core rules first, then language packs gated by the
//! script hint. Phrase rules get two chances — a direct match against the
//! case-folded normalized text, and a second pass against the shadow
//! projection that survives zero-width stuffing and separator tricks.
//! Shadow-only hits are reported under `<CODE>_OBFUSCATED` at 0.8× weight.
//! A code already hit is suppressed for the rest of the scan, so the
//! reason list is deterministic: rule-declaration order, first match wins.

pub mod language;
pub mod packs;
pub mod rule;

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::{codes, Finding, ScanState, Span, Stage};
use crate::error::Result;
use crate::normalize::line_of;
use crate::shadow::ShadowText;

use language::script_hints;
use packs::CompiledRulePack;
use rule::{CompiledMatcher, PhraseMatcher, StructuralPredicate, Tier};

pub struct Detector {
    pack: Arc<CompiledRulePack>,
    profile_tier: Tier,
}

impl Detector {
    pub fn new(pack: Arc<CompiledRulePack>, profile_tier: Tier) -> Self {
        Self { pack, profile_tier }
    }
}

impl Stage for Detector {
    fn name(&self) -> &'static str {
        "detect"
    }

    fn apply(&self, state: &mut ScanState) -> Result<()> {
        let folded = FoldedText::fold(&state.normalized);
        let hints = script_hints(&state.normalized);
        let shadow = state.shadow.clone();

        let mut seen: HashSet<String> = HashSet::new();
        let mut matched: Vec<Finding> = Vec::new();
        let mut deadline_hit = false;

        let active_packs = self.pack.languages.iter().filter(|pack| match &hints {
            // Uncertain input runs every loaded pack.
            None => true,
            Some(set) => set.iter().any(|script| script.as_key() == pack.script),
        });
        let rules = self
            .pack
            .core
            .iter()
            .chain(active_packs.flat_map(|pack| pack.rules.iter()))
            .filter(|rule| rule.tier.active_under(self.profile_tier));

        for rule in rules {
            if state.deadline_exceeded() {
                deadline_hit = true;
                break;
            }
            // First hit wins for a code family: once either CODE or
            // CODE_OBFUSCATED is recorded, later rules for the same code
            // are suppressed.
            let obfuscated = format!("{}{}", rule.code, codes::OBFUSCATED_SUFFIX);
            if seen.contains(&rule.code) || seen.contains(&obfuscated) {
                continue;
            }
            match &rule.matcher {
                CompiledMatcher::Phrase(phrase) => {
                    if let Some((start, end)) = match_direct(phrase, &folded) {
                        let line = line_of(&state.normalized, start);
                        seen.insert(rule.code.clone());
                        matched.push(
                            Finding::new(&rule.code, rule.weight).with_span(Span::new(start, end, line)),
                        );
                    } else if let Some(shadow) = &shadow {
                        if let Some((start, end)) = match_shadow(phrase, shadow, &state.normalized) {
                            let line = line_of(&state.normalized, start);
                            seen.insert(obfuscated.clone());
                            matched.push(
                                Finding::new(obfuscated, rule.weight * 0.8)
                                    .with_span(Span::new(start, end, line)),
                            );
                        }
                    }
                }
                CompiledMatcher::Regex(regex) => {
                    if let Some(found) = regex.find(&state.normalized) {
                        let start = state.normalized[..found.start()].chars().count();
                        let end = start + state.normalized[found.start()..found.end()].chars().count();
                        let line = line_of(&state.normalized, start);
                        seen.insert(rule.code.clone());
                        matched.push(
                            Finding::new(&rule.code, rule.weight).with_span(Span::new(start, end, line)),
                        );
                    }
                }
                CompiledMatcher::Structural(predicate) => {
                    if let Some((start, end)) = match_structural(*predicate, &folded) {
                        let line = line_of(&state.normalized, start);
                        seen.insert(rule.code.clone());
                        matched.push(
                            Finding::new(&rule.code, rule.weight).with_span(Span::new(start, end, line)),
                        );
                    }
                }
            }
        }

        for finding in matched {
            state.push_finding(finding);
        }
        if deadline_hit {
            state.mark_truncated();
        }
        Ok(())
    }
}

/// Case-folded copy of the normalized text with a byte→char back-mapping,
/// so ASCII and non-ASCII phrases alike match case-insensitively and spans
/// still point into the normalized text.
struct FoldedText {
    text: String,
    byte_to_char: Vec<usize>,
}

impl FoldedText {
    fn fold(normalized: &str) -> Self {
        let mut text = String::with_capacity(normalized.len());
        let mut byte_to_char = Vec::with_capacity(normalized.len());
        for (char_idx, ch) in normalized.chars().enumerate() {
            for lowered in ch.to_lowercase() {
                text.push(lowered);
                for _ in 0..lowered.len_utf8() {
                    byte_to_char.push(char_idx);
                }
            }
        }
        Self { text, byte_to_char }
    }

    fn char_span(&self, byte_start: usize, byte_end: usize) -> (usize, usize) {
        let start = self.byte_to_char[byte_start];
        let end = self.byte_to_char[byte_end - 1] + 1;
        (start, end)
    }
}

fn match_direct(phrase: &PhraseMatcher, folded: &FoldedText) -> Option<(usize, usize)> {
    for found in phrase.direct.find_iter(&folded.text) {
        let (needs_start, needs_end) = phrase.edges[found.pattern().as_usize()];
        if boundary_clean(&folded.text, found.start(), found.end(), needs_start, needs_end) {
            return Some(folded.char_span(found.start(), found.end()));
        }
    }
    None
}

/// Shadow matches are collapsed-text substring hits, so they would fire
/// inside ordinary words ("eco·system message·s"). A hit only counts when
/// the mapped-back span sits on word-ish boundaries in the normalized
/// text — invisible separators are not alphanumeric, so real stuffing
/// still passes.
fn match_shadow(
    phrase: &PhraseMatcher,
    shadow: &ShadowText,
    normalized: &str,
) -> Option<(usize, usize)> {
    let automaton = phrase.shadow.as_ref()?;
    for found in automaton.find_iter(shadow.text()) {
        let Some((start, end)) = shadow.original_span(found.start(), found.end()) else {
            continue;
        };
        let before_ok = start == 0
            || normalized
                .chars()
                .nth(start - 1)
                .is_none_or(|ch| !ch.is_alphanumeric());
        let after_ok = normalized.chars().nth(end).is_none_or(|ch| !ch.is_alphanumeric());
        if before_ok && after_ok {
            return Some((start, end));
        }
    }
    None
}

/// Word-ish boundary check, applied only on sides where the phrase itself
/// is ASCII-alphanumeric. Scripts without separators skip the check.
fn boundary_clean(
    text: &str,
    start: usize,
    end: usize,
    needs_start: bool,
    needs_end: bool,
) -> bool {
    let start_ok = !needs_start
        || text[..start]
            .chars()
            .next_back()
            .is_none_or(|ch| !ch.is_alphanumeric());
    let end_ok = !needs_end
        || text[end..]
            .chars()
            .next()
            .is_none_or(|ch| !ch.is_alphanumeric());
    start_ok && end_ok
}

const IMPERATIVE_VERBS: &[&str] = &[
    "run", "execute", "delete", "remove", "ignore", "disable", "send", "paste", "install",
    "override", "skip", "download",
];

const DANGEROUS_TERMS: &[&str] = &[
    "command", "shell", "terminal", "bash", "powershell", "sudo", "curl", "wget", "credentials",
    "secrets", "token", "password", "backdoor", "security", "tests",
];

fn match_structural(predicate: StructuralPredicate, folded: &FoldedText) -> Option<(usize, usize)> {
    match predicate {
        StructuralPredicate::NumberedImperative => numbered_imperative(folded),
    }
}

/// `"3. run this in your terminal"` style lines: numbered marker, an
/// imperative verb, and a dangerous term later on the same line.
fn numbered_imperative(folded: &FoldedText) -> Option<(usize, usize)> {
    let mut offset = 0usize;
    for line in folded.text.split('\n') {
        if !line.is_empty() && numbered_imperative_line(line) {
            return Some(folded.char_span(offset, offset + line.len()));
        }
        offset += line.len() + 1;
    }
    None
}

fn numbered_imperative_line(line: &str) -> bool {
    let mut rest = line.trim_start();
    rest = rest.strip_prefix("step").map(str::trim_start).unwrap_or(rest);

    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return false;
    }
    rest = &rest[digits..];
    rest = match rest.strip_prefix(['.', ')', ':']) {
        Some(after) => after.trim_start(),
        None => return false,
    };
    rest = rest.strip_prefix("please").map(str::trim_start).unwrap_or(rest);

    let verb: String = rest.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if !IMPERATIVE_VERBS.contains(&verb.as_str()) {
        return false;
    }

    line.split(|c: char| !c.is_ascii_alphanumeric())
        .any(|word| DANGEROUS_TERMS.contains(&word))
}
