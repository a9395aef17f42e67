//! Markup neutralization, the second pipeline stage.
//!
//! The sanitizer renders markup inert without discarding the text a
//! reviewer needs, and never changes the line count: reason spans recorded
//! against the normalized text stay usable against the sanitized
//! rendering. Hazard runs flagged by the normalizer become visible
//! `[U+XXXX×N]` placeholders. Fenced code blocks are opaque text — markup
//! inside them is neither stripped nor rewritten.
//!
//! The whole transformation is idempotent: a second pass over its own
//! output is a no-op. That holds because stripped output contains no raw
//! `<` outside fences (stray ones are escaped to `&lt;`), placeholders
//! contain no hazard characters, and rewritten links are no longer links.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::{codes, ScanState, Span, Stage};
use crate::error::Result;

const DANGEROUS_ELEMENTS: [&str; 5] = ["script", "style", "iframe", "object", "embed"];

static MD_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"!\[(?P<alt>[^\]\n]*)\]\((?P<url>[^)\s]+)(?:\s+[^)\n]*)?\)").unwrap()
});
static MD_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<text>[^\]\n]+)\]\((?P<url>[^)\s]+)(?:\s+[^)\n]*)?\)").unwrap()
});

pub struct Sanitizer;

impl Stage for Sanitizer {
    fn name(&self) -> &'static str {
        "sanitize"
    }

    fn apply(&self, state: &mut ScanState) -> Result<()> {
        let hazard_spans: Vec<Span> = state
            .findings
            .iter()
            .filter(|f| {
                matches!(
                    f.code.as_str(),
                    codes::BIDI_CONTROL
                        | codes::ZERO_WIDTH
                        | codes::TAG_CHARS
                        | codes::PRIVATE_USE_RUN
                )
            })
            .filter_map(|f| f.span)
            .collect();

        let collapsed = collapse_hazards(&state.normalized, &hazard_spans);
        state.sanitized = sanitize_markup(&collapsed);
        Ok(())
    }
}

/// Replace each flagged hazard run with `[U+XXXX×N]`, where `XXXX` is the
/// first code point of the run and `N` the run length.
fn collapse_hazards(text: &str, spans: &[Span]) -> String {
    if spans.is_empty() {
        return text.to_string();
    }
    let mut sorted: Vec<Span> = spans.to_vec();
    sorted.sort_by_key(|s| s.start);

    let mut out = String::with_capacity(text.len());
    let mut next_span = sorted.iter().peekable();
    let mut skip_until = 0usize;

    for (idx, ch) in text.chars().enumerate() {
        if let Some(span) = next_span.peek() {
            if idx == span.start {
                out.push_str(&format!("[U+{:04X}×{}]", ch as u32, span.len()));
                skip_until = span.end;
                next_span.next();
            }
        }
        if idx < skip_until {
            continue;
        }
        out.push(ch);
    }
    out
}

/// HTML and markdown neutralization outside fenced code regions.
///
/// Both the fence state and the dangerous-element state span lines, so a
/// `<script>` opened on one line swallows every line through its close tag
/// while the newlines themselves survive.
fn sanitize_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_fence = false;
    let mut fence_marker = "";
    let mut in_dangerous: Option<&'static str> = None;

    let mut first = true;
    for line in text.split('\n') {
        if !first {
            out.push('\n');
        }
        first = false;

        if let Some(element) = in_dangerous {
            let chars: Vec<char> = line.chars().collect();
            if let Some(end) = find_close_tag(&chars, 0, element) {
                in_dangerous = None;
                let rest: String = chars[end..].iter().collect();
                let stripped = strip_html_line(&rest, &mut in_dangerous);
                out.push_str(&rewrite_markdown(&stripped));
            }
            continue;
        }

        let trimmed = line.trim_start();
        if in_fence {
            out.push_str(line);
            if trimmed.starts_with(fence_marker) {
                in_fence = false;
            }
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence_marker = if trimmed.starts_with("```") { "```" } else { "~~~" };
            in_fence = true;
            out.push_str(line);
            continue;
        }

        let stripped = strip_html_line(line, &mut in_dangerous);
        out.push_str(&rewrite_markdown(&stripped));
    }
    out
}

/// Strip HTML from one line. Dangerous elements are dropped with their
/// content (setting `in_dangerous` when the close tag is not on this
/// line); other tags are removed keeping inner text; a `<` that does not
/// open a tag is escaped so re-sanitization cannot see new markup.
fn strip_html_line(line: &str, in_dangerous: &mut Option<&'static str>) -> String {
    let chars: Vec<char> = line.chars().collect();
    let mut out = String::with_capacity(line.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '<' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        if let Some(element) = dangerous_open_at(&chars, i) {
            match find_close_tag(&chars, i + 1, element) {
                Some(end) => i = end,
                None => {
                    *in_dangerous = Some(element);
                    break;
                }
            }
        } else if let Some(end) = tag_end(&chars, i) {
            i = end;
        } else {
            out.push_str("&lt;");
            i += 1;
        }
    }
    out
}

fn dangerous_open_at(chars: &[char], start: usize) -> Option<&'static str> {
    for element in DANGEROUS_ELEMENTS {
        let name: Vec<char> = element.chars().collect();
        let end = start + 1 + name.len();
        if end > chars.len() {
            continue;
        }
        let candidate: String = chars[start + 1..end].iter().collect::<String>().to_ascii_lowercase();
        if candidate == element {
            // Must be followed by whitespace, '>', or '/' to be a tag.
            match chars.get(end) {
                Some(&ch) if ch == '>' || ch == '/' || ch.is_whitespace() => return Some(element),
                None => return Some(element),
                _ => {}
            }
        }
    }
    None
}

/// Index just past `</element ... >`, or None when the close tag is not on
/// this line.
fn find_close_tag(chars: &[char], from: usize, element: &str) -> Option<usize> {
    let needle: Vec<char> = format!("</{element}").chars().collect();
    let mut i = from;
    'outer: while i + needle.len() <= chars.len() {
        for (offset, expected) in needle.iter().enumerate() {
            if !chars[i + offset].eq_ignore_ascii_case(expected) {
                i += 1;
                continue 'outer;
            }
        }
        let mut j = i + needle.len();
        while j < chars.len() && chars[j] != '>' {
            j += 1;
        }
        return if j < chars.len() { Some(j + 1) } else { None };
    }
    None
}

/// Index just past a regular tag's `>`, or None when `<` does not open a
/// tag (no name char, or unterminated on this line).
fn tag_end(chars: &[char], start: usize) -> Option<usize> {
    let next = chars.get(start + 1)?;
    if !(next.is_ascii_alphabetic() || *next == '/' || *next == '!') {
        return None;
    }
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == '>' {
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn rewrite_markdown(line: &str) -> String {
    let without_images = MD_IMAGE.replace_all(line, |caps: &regex::Captures<'_>| {
        let alt = &caps["alt"];
        let url = &caps["url"];
        if is_http_url(url) {
            caps[0].to_string()
        } else {
            alt.to_string()
        }
    });

    MD_LINK
        .replace_all(&without_images, |caps: &regex::Captures<'_>| {
            let text = &caps["text"];
            let url = &caps["url"];
            if !is_http_url(url) || text_misrepresents_url(text, url) {
                format!("{text} ({url})")
            } else {
                caps[0].to_string()
            }
        })
        .into_owned()
}

fn is_http_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A link whose visible text itself reads as a URL pointing at a different
/// host than the actual target.
fn text_misrepresents_url(text: &str, url: &str) -> bool {
    let Some(text_host) = host_of(text) else {
        return false;
    };
    match host_of(url) {
        Some(url_host) => !text_host.eq_ignore_ascii_case(&url_host),
        None => true,
    }
}

fn host_of(candidate: &str) -> Option<String> {
    let trimmed = candidate.trim();
    let rest = if let Some(stripped) = trimmed.strip_prefix("https://") {
        stripped
    } else if let Some(stripped) = trimmed.strip_prefix("http://") {
        stripped
    } else if trimmed.starts_with("www.") {
        trimmed
    } else {
        return None;
    };
    let host: String = rest
        .chars()
        .take_while(|&ch| ch != '/' && ch != '?' && ch != '#' && ch != ':')
        .collect();
    if host.contains('.') {
        Some(host.to_ascii_lowercase())
    } else {
        None
    }
}
