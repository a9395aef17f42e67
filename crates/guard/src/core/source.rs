use serde::{Deserialize, Serialize};

/// Where the scanned bytes came from. Serialized verbatim into
/// GuardResults, quarantine records, and audit lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub request_id: String,
}

impl SourceDescriptor {
    pub fn file(path: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            kind: "file".to_string(),
            path: Some(path.into()),
            url: None,
            domain: None,
            request_id: request_id.into(),
        }
    }

    pub fn web(
        url: impl Into<String>,
        domain: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: "web".to_string(),
            path: None,
            url: Some(url.into()),
            domain: Some(domain.into()),
            request_id: request_id.into(),
        }
    }

    pub fn repo(
        url: impl Into<String>,
        path: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: "repo".to_string(),
            path: Some(path.into()),
            url: Some(url.into()),
            domain: None,
            request_id: request_id.into(),
        }
    }

    /// Descriptor for text handed to the pipeline directly (tests, the
    /// one-shot CLI scan).
    pub fn inline(request_id: impl Into<String>) -> Self {
        Self {
            kind: "inline".to_string(),
            path: None,
            url: None,
            domain: None,
            request_id: request_id.into(),
        }
    }
}
