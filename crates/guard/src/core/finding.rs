use serde::{Deserialize, Serialize};

/// Stable reason codes shared by the detector, the structural stages, and
/// the fetcher boundary. Codes are part of the external contract: audit
/// records and GuardResults carry them verbatim, so they never change
/// meaning between releases.
pub mod codes {
    pub const ROLE_IMPERSONATION: &str = "ROLE_IMPERSONATION";
    pub const PERSONA_SHIFT: &str = "PERSONA_SHIFT";
    pub const STEALTH_INSTRUCTION: &str = "STEALTH_INSTRUCTION";
    pub const POLICY_OVERRIDE: &str = "POLICY_OVERRIDE";
    pub const PROCESS_SABOTAGE: &str = "PROCESS_SABOTAGE";
    pub const CODE_TAMPERING_COERCION: &str = "CODE_TAMPERING_COERCION";
    pub const TOOL_COERCION: &str = "TOOL_COERCION";
    pub const EXFIL_REQUEST: &str = "EXFIL_REQUEST";
    pub const MULTI_STEP_INSTRUCTION: &str = "MULTI_STEP_INSTRUCTION";

    pub const BIDI_CONTROL: &str = "BIDI_CONTROL";
    pub const ZERO_WIDTH: &str = "ZERO_WIDTH";
    pub const TAG_CHARS: &str = "TAG_CHARS";
    pub const PRIVATE_USE_RUN: &str = "PRIVATE_USE_RUN";
    pub const ENCODING_INVALID: &str = "ENCODING_INVALID";

    pub const SECRET_FOUND: &str = "SECRET_FOUND";
    pub const SECRET_EXFIL: &str = "SECRET_EXFIL";

    pub const SIZE_EXCEEDED: &str = "SIZE_EXCEEDED";
    pub const SSRF_BLOCKED: &str = "SSRF_BLOCKED";
    pub const NETWORK_DISABLED: &str = "NETWORK_DISABLED";
    pub const UNSUPPORTED_URL_SCHEME: &str = "UNSUPPORTED_URL_SCHEME";
    pub const NEW_SOURCE_REQUIRES_APPROVAL: &str = "NEW_SOURCE_REQUIRES_APPROVAL";
    pub const FETCH_FAILED: &str = "FETCH_FAILED";
    pub const RULE_LIMIT_REACHED: &str = "RULE_LIMIT_REACHED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

    /// Suffix appended to a phrase rule's code when only the shadow
    /// projection matched.
    pub const OBFUSCATED_SUFFIX: &str = "_OBFUSCATED";
}

/// Half-open char-index range into the normalized text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    /// 1-based line of `start`, kept so reviewers can line up findings
    /// with the sanitized rendering.
    pub line: usize,
}

impl Span {
    pub fn new(start: usize, end: usize, line: usize) -> Self {
        Self { start, end, line }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// A single detection outcome accumulated on the scan state.
///
/// Multiple findings may carry the same code (one per span); reason lists
/// and the scorer collapse them to distinct codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    pub weight: f64,
}

impl Finding {
    pub fn new(code: impl Into<String>, weight: f64) -> Self {
        Self {
            code: code.into(),
            span: None,
            weight,
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

/// Per-kind redaction tally reported on the GuardResult.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redaction {
    pub kind: String,
    pub count: usize,
}

impl Redaction {
    pub fn new(kind: impl Into<String>, count: usize) -> Self {
        Self {
            kind: kind.into(),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_length() {
        let span = Span::new(3, 8, 1);
        assert_eq!(span.len(), 5);
        assert!(!span.is_empty());
        assert!(Span::new(4, 4, 2).is_empty());
    }

    #[test]
    fn finding_builder_attaches_span() {
        let finding = Finding::new(codes::ZERO_WIDTH, 0.4).with_span(Span::new(0, 2, 1));
        assert_eq!(finding.code, "ZERO_WIDTH");
        assert_eq!(finding.span.unwrap().end, 2);
    }
}
