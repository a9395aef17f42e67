//! Collapsed alphanumeric projection of normalized text.
//!
//! The shadow is the normalized text lowercased with everything outside
//! `[a-z0-9]` removed, plus an index mapping each shadow position back to
//! the char position it came from. Phrase rules run against it so that
//! zero-width insertion, punctuation stuffing, or spacing tricks cannot
//! split a phrase the direct matcher would otherwise find.

/// Shadow text plus the back-mapping into the normalized text.
#[derive(Debug, Clone)]
pub struct ShadowText {
    text: String,
    /// `map[i]` is the char index in the normalized text that produced
    /// shadow byte `i`. The shadow is pure ASCII, so byte and char
    /// positions coincide.
    map: Vec<usize>,
}

impl ShadowText {
    pub fn project(normalized: &str) -> Self {
        let mut text = String::new();
        let mut map = Vec::new();
        for (char_idx, ch) in normalized.chars().enumerate() {
            for lowered in ch.to_lowercase() {
                if lowered.is_ascii_alphanumeric() {
                    text.push(lowered);
                    map.push(char_idx);
                }
            }
        }
        Self { text, map }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Map a shadow match back to a `(start, end)` char range in the
    /// normalized text. `end` is exclusive.
    pub fn original_span(&self, shadow_start: usize, shadow_end: usize) -> Option<(usize, usize)> {
        if shadow_start >= shadow_end || shadow_end > self.map.len() {
            return None;
        }
        let start = self.map[shadow_start];
        let end = self.map[shadow_end - 1] + 1;
        Some((start, end))
    }
}

/// Collapse a phrase the same way the shadow collapses text, so phrase
/// bytes and shadow bytes compare directly.
pub fn collapse_phrase(phrase: &str) -> String {
    phrase
        .chars()
        .flat_map(char::to_lowercase)
        .filter(char::is_ascii_alphanumeric)
        .collect()
}
