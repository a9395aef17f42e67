//! Encoding and Unicode canonicalization, the first pipeline stage.
//!
//! Raw bytes are decoded (UTF-8 by default, UTF-16 by BOM sniff), NFKC
//! normalized so compatibility variants collapse onto their plain forms,
//! newline-canonicalized, and scanned for hazard characters: bidi
//! controls, zero-width characters, Unicode tag characters, and long
//! private-use runs. Hazards are *flagged with spans*, not removed — the
//! sanitizer later collapses each flagged run into a visible placeholder.

use unicode_normalization::UnicodeNormalization;

use crate::core::{codes, Finding, ScanState, Span, Stage};
use crate::error::Result;
use crate::shadow::ShadowText;

pub const WEIGHT_BIDI_CONTROL: f64 = 0.6;
pub const WEIGHT_ZERO_WIDTH: f64 = 0.4;
pub const WEIGHT_TAG_CHARS: f64 = 0.7;
pub const WEIGHT_PRIVATE_USE_RUN: f64 = 0.3;
pub const WEIGHT_ENCODING_INVALID: f64 = 0.3;

const PRIVATE_USE_RUN_MIN: usize = 4;

pub struct Normalizer;

impl Stage for Normalizer {
    fn name(&self) -> &'static str {
        "normalize"
    }

    fn apply(&self, state: &mut ScanState) -> Result<()> {
        let (decoded, invalid) = decode(&state.original);
        if invalid {
            state.push_finding(Finding::new(codes::ENCODING_INVALID, WEIGHT_ENCODING_INVALID));
        }

        let normalized: String = decoded.nfkc().collect();
        let normalized = canonicalize_newlines(&normalized);
        let normalized = normalized.strip_prefix('\u{FEFF}').unwrap_or(&normalized).to_string();

        for finding in scan_hazards(&normalized) {
            state.push_finding(finding);
        }

        state.shadow = Some(ShadowText::project(&normalized));
        state.normalized = normalized;
        Ok(())
    }
}

/// Decode bytes to text, returning whether any invalid sequences were
/// replaced with U+FFFD.
fn decode(bytes: &[u8]) -> (String, bool) {
    if let Some(payload) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(payload, u16::from_le_bytes);
    }
    if let Some(payload) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(payload, u16::from_be_bytes);
    }
    match String::from_utf8_lossy(bytes) {
        std::borrow::Cow::Borrowed(text) => (text.to_string(), false),
        std::borrow::Cow::Owned(text) => (text, true),
    }
}

fn decode_utf16(payload: &[u8], from_bytes: fn([u8; 2]) -> u16) -> (String, bool) {
    let mut invalid = payload.len() % 2 != 0;
    let units: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| from_bytes([pair[0], pair[1]]))
        .collect();
    let text: String = char::decode_utf16(units.into_iter())
        .map(|result| {
            result.unwrap_or_else(|_| {
                invalid = true;
                '\u{FFFD}'
            })
        })
        .collect();
    (text, invalid)
}

fn canonicalize_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(ch);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hazard {
    Bidi,
    ZeroWidth,
    Tag,
    PrivateUse,
}

impl Hazard {
    fn classify(ch: char) -> Option<Self> {
        match ch {
            '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}' => Some(Self::Bidi),
            '\u{200B}'..='\u{200F}' | '\u{2060}' | '\u{FEFF}' => Some(Self::ZeroWidth),
            '\u{E0000}'..='\u{E007F}' => Some(Self::Tag),
            '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}' | '\u{100000}'..='\u{10FFFD}' => {
                Some(Self::PrivateUse)
            }
            _ => None,
        }
    }

    fn finding(self, span: Span) -> Option<Finding> {
        let (code, weight) = match self {
            Self::Bidi => (codes::BIDI_CONTROL, WEIGHT_BIDI_CONTROL),
            Self::ZeroWidth => (codes::ZERO_WIDTH, WEIGHT_ZERO_WIDTH),
            Self::Tag => (codes::TAG_CHARS, WEIGHT_TAG_CHARS),
            Self::PrivateUse => {
                if span.len() < PRIVATE_USE_RUN_MIN {
                    return None;
                }
                (codes::PRIVATE_USE_RUN, WEIGHT_PRIVATE_USE_RUN)
            }
        };
        Some(Finding::new(code, weight).with_span(span))
    }
}

/// One finding per contiguous run of a hazard category, span in char
/// indices of the normalized text.
fn scan_hazards(normalized: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut run: Option<(Hazard, usize, usize)> = None;

    for (idx, ch) in normalized.chars().enumerate() {
        let hazard = Hazard::classify(ch);
        match (&mut run, hazard) {
            (Some((kind, _, end)), Some(current)) if *kind == current => *end = idx + 1,
            (current_run, next) => {
                if let Some((kind, start, end)) = current_run.take() {
                    let span_line = line_of(normalized, start);
                    findings.extend(kind.finding(Span::new(start, end, span_line)));
                }
                if let Some(kind) = next {
                    *current_run = Some((kind, idx, idx + 1));
                }
            }
        }
    }
    if let Some((kind, start, end)) = run {
        let span_line = line_of(normalized, start);
        findings.extend(kind.finding(Span::new(start, end, span_line)));
    }
    findings
}

/// 1-based line number of a char index.
pub fn line_of(text: &str, char_idx: usize) -> usize {
    1 + text
        .chars()
        .take(char_idx)
        .filter(|&ch| ch == '\n')
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SourceDescriptor;

    fn run(bytes: &[u8]) -> ScanState {
        let mut state = ScanState::new(bytes.to_vec(), SourceDescriptor::inline("req-n"));
        Normalizer.apply(&mut state).unwrap();
        state
    }

    #[test]
    fn crlf_and_bare_cr_become_lf() {
        let state = run(b"a\r\nb\rc");
        assert_eq!(state.normalized, "a\nb\nc");
    }

    #[test]
    fn nfkc_collapses_compatibility_variants() {
        // Fullwidth "ｉｇｎｏｒｅ" folds onto plain ASCII.
        let state = run("ｉｇｎｏｒｅ".as_bytes());
        assert_eq!(state.normalized, "ignore");
    }

    #[test]
    fn invalid_utf8_is_replaced_and_flagged() {
        let state = run(b"ok \xFF\xFE\xFF bad");
        assert!(state.has_code(codes::ENCODING_INVALID));
        assert!(state.normalized.contains('\u{FFFD}'));
    }

    #[test]
    fn utf16le_bom_is_sniffed() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "hi".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let state = run(&bytes);
        assert_eq!(state.normalized, "hi");
        assert!(!state.has_code(codes::ENCODING_INVALID));
    }

    #[test]
    fn leading_bom_stripped_interior_bom_flagged() {
        let state = run("\u{FEFF}head \u{FEFF}tail".as_bytes());
        assert!(!state.normalized.starts_with('\u{FEFF}'));
        assert!(state.has_code(codes::ZERO_WIDTH));
    }

    #[test]
    fn bidi_run_is_one_finding_with_span() {
        let state = run("ab\u{202E}\u{202D}cd".as_bytes());
        let bidi: Vec<_> = state
            .findings
            .iter()
            .filter(|f| f.code == codes::BIDI_CONTROL)
            .collect();
        assert_eq!(bidi.len(), 1);
        let span = bidi[0].span.unwrap();
        assert_eq!((span.start, span.end), (2, 4));
    }

    #[test]
    fn short_private_use_run_is_ignored() {
        let state = run("x\u{E000}\u{E001}\u{E002}x".as_bytes());
        assert!(!state.has_code(codes::PRIVATE_USE_RUN));
        let state = run("x\u{E000}\u{E001}\u{E002}\u{E003}x".as_bytes());
        assert!(state.has_code(codes::PRIVATE_USE_RUN));
    }

    #[test]
    fn shadow_is_projected() {
        let state = run(b"Make Test");
        assert_eq!(state.shadow.as_ref().unwrap().text(), "maketest");
    }
}
