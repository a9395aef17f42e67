//! Web fetcher: scheme and allowlist enforcement, SSRF checks on literal
//! and resolved addresses, a manual redirect loop that re-runs every
//! check per hop, byte caps, and readability-style main-content
//! extraction for `readable_text` mode.

use std::io::{self, Read};
use std::net::IpAddr;
use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::config::NetworkPolicy;
use crate::core::codes;
use crate::error::{GuardError, Result};
use crate::fetch::FetchOutcome;

const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    ReadableText,
    RawText,
}

/// One HTTP exchange, body already capped by the transport.
pub struct HttpReply {
    pub status: u16,
    pub location: Option<String>,
    pub body: Vec<u8>,
    pub truncated: bool,
}

pub trait HttpTransport: Send + Sync {
    fn get(&self, url: &str, max_bytes: u64) -> io::Result<HttpReply>;
}

pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent("BridgeWarden/0.2")
            .build()
            .map_err(|err| GuardError::Fetch(err.to_string()))?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, url: &str, max_bytes: u64) -> io::Result<HttpReply> {
        let response = self.client.get(url).send().map_err(io::Error::other)?;
        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let mut body = Vec::new();
        let mut reader = response.take(max_bytes + 1);
        reader.read_to_end(&mut body).map_err(io::Error::other)?;
        let truncated = body.len() as u64 > max_bytes;
        body.truncate(max_bytes as usize);
        Ok(HttpReply {
            status,
            location,
            body,
            truncated,
        })
    }
}

type Resolver = dyn Fn(&str) -> io::Result<Vec<IpAddr>> + Send + Sync;

pub struct WebFetcher {
    transport: Arc<dyn HttpTransport>,
    resolver: Arc<Resolver>,
    network: NetworkPolicy,
}

impl WebFetcher {
    pub fn new(network: NetworkPolicy) -> Result<Self> {
        let timeout = Duration::from_secs_f64(network.timeout_seconds);
        Ok(Self {
            transport: Arc::new(ReqwestTransport::new(timeout)?),
            resolver: Arc::new(system_resolve),
            network,
        })
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<Resolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Fetch a URL through the policy checks. `host_allowed` is the
    /// caller's combined allowlist (static config plus approvals) and is
    /// re-consulted on every redirect hop.
    pub fn fetch(
        &self,
        url: &str,
        mode: FetchMode,
        max_bytes: Option<u64>,
        host_allowed: &dyn Fn(&str) -> bool,
    ) -> Result<FetchOutcome> {
        if !self.network.enabled {
            return Ok(FetchOutcome::Denied {
                reason: codes::NETWORK_DISABLED,
            });
        }
        let cap = max_bytes
            .unwrap_or(self.network.web_max_bytes)
            .min(self.network.web_max_bytes);
        if cap == 0 {
            return Err(GuardError::InvalidArgument("max_bytes must be positive".to_string()));
        }

        let mut current = normalize_raw_file_url(url)?;

        for _hop in 0..=MAX_REDIRECTS {
            if let Some(denied) = self.check_hop(&current, host_allowed) {
                return Ok(denied);
            }

            let reply = match self.transport.get(current.as_str(), cap) {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(url = %current, error = %err, "web fetch failed");
                    return Ok(FetchOutcome::Denied {
                        reason: codes::FETCH_FAILED,
                    });
                }
            };

            if matches!(reply.status, 301 | 302 | 303 | 307 | 308) {
                let Some(location) = reply.location else {
                    return Ok(FetchOutcome::Denied {
                        reason: codes::FETCH_FAILED,
                    });
                };
                current = current
                    .join(&location)
                    .map_err(|_| GuardError::InvalidArgument(format!("bad redirect {location:?}")))?;
                continue;
            }
            if reply.status >= 400 {
                tracing::debug!(url = %current, status = reply.status, "web fetch http error");
                return Ok(FetchOutcome::Denied {
                    reason: codes::FETCH_FAILED,
                });
            }
            if reply.truncated {
                return Ok(FetchOutcome::Denied {
                    reason: codes::SIZE_EXCEEDED,
                });
            }

            let bytes = match mode {
                FetchMode::RawText => reply.body,
                FetchMode::ReadableText => {
                    let text = String::from_utf8_lossy(&reply.body);
                    extract_readable_text(&text).into_bytes()
                }
            };
            return Ok(FetchOutcome::Bytes(bytes));
        }

        tracing::debug!(url, "redirect limit exhausted");
        Ok(FetchOutcome::Denied {
            reason: codes::FETCH_FAILED,
        })
    }

    fn check_hop(&self, url: &Url, host_allowed: &dyn Fn(&str) -> bool) -> Option<FetchOutcome> {
        if !matches!(url.scheme(), "http" | "https") {
            return Some(FetchOutcome::Denied {
                reason: codes::UNSUPPORTED_URL_SCHEME,
            });
        }
        let Some(host) = url.host_str() else {
            return Some(FetchOutcome::Denied {
                reason: codes::FETCH_FAILED,
            });
        };
        let host = normalize_host(host);

        match self.ssrf_risk(&host) {
            SsrfVerdict::Safe => {}
            SsrfVerdict::Risky => {
                tracing::warn!(%host, "ssrf target rejected");
                return Some(FetchOutcome::Denied {
                    reason: codes::SSRF_BLOCKED,
                });
            }
            SsrfVerdict::Unresolvable => {
                return Some(FetchOutcome::Denied {
                    reason: codes::FETCH_FAILED,
                });
            }
        }

        if !host_allowed(&host) {
            return Some(FetchOutcome::Denied {
                reason: codes::NEW_SOURCE_REQUIRES_APPROVAL,
            });
        }
        None
    }

    fn ssrf_risk(&self, host: &str) -> SsrfVerdict {
        if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
            return if ip_is_forbidden(ip) {
                SsrfVerdict::Risky
            } else {
                SsrfVerdict::Safe
            };
        }
        match (self.resolver)(host) {
            Ok(ips) if ips.is_empty() => SsrfVerdict::Unresolvable,
            Ok(ips) => {
                if ips.into_iter().any(ip_is_forbidden) {
                    SsrfVerdict::Risky
                } else {
                    SsrfVerdict::Safe
                }
            }
            Err(_) => SsrfVerdict::Unresolvable,
        }
    }
}

enum SsrfVerdict {
    Safe,
    Risky,
    Unresolvable,
}

fn system_resolve(host: &str) -> io::Result<Vec<IpAddr>> {
    Ok((host, 0u16)
        .to_socket_addrs()?
        .map(|addr| addr.ip())
        .collect())
}

/// Addresses the gateway refuses to talk to: loopback, RFC1918,
/// link-local, unique-local, unspecified, broadcast, multicast — and the
/// IPv4-mapped IPv6 forms of all of those.
fn ip_is_forbidden(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_multicast()
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return ip_is_forbidden(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
        }
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Rewrite well-known web UI file URLs to their raw equivalents before
/// fetching, so the content host is checked up front instead of being
/// reached through a cross-host redirect.
pub fn normalize_raw_file_url(raw: &str) -> Result<Url> {
    let url =
        Url::parse(raw).map_err(|_| GuardError::InvalidArgument(format!("malformed url {raw:?}")))?;
    let Some(host) = url.host_str().map(normalize_host) else {
        return Ok(url);
    };
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    // github.com/<org>/<repo>/{blob,raw}/<ref>/<path> → raw.githubusercontent.com
    if host == "github.com" && segments.len() >= 5 && matches!(segments[2], "blob" | "raw") {
        let (org, repo, git_ref) = (segments[0], segments[1], segments[3]);
        let tail = segments[4..].join("/");
        let rewritten = format!("https://raw.githubusercontent.com/{org}/{repo}/{git_ref}/{tail}");
        return Url::parse(&rewritten)
            .map_err(|_| GuardError::InvalidArgument(format!("malformed url {raw:?}")));
    }

    // GitLab-style /<group>/<project>/-/blob/<ref>/<path> → /-/raw/
    if let Some(idx) = segments.iter().position(|s| *s == "-") {
        if idx >= 2 && segments.get(idx + 1).is_some_and(|s| matches!(*s, "blob" | "raw")) {
            let mut rewritten = url.clone();
            let mut path = segments[..idx].join("/");
            path.push_str("/-/raw/");
            path.push_str(&segments[idx + 2..].join("/"));
            rewritten.set_path(&path);
            rewritten.set_query(None);
            rewritten.set_fragment(None);
            return Ok(rewritten);
        }
    }

    // bitbucket.org/<owner>/<repo>/{src,raw}/<ref>/<path> → /raw/
    if host == "bitbucket.org" && segments.len() >= 4 && matches!(segments[2], "src" | "raw") {
        let mut rewritten = url.clone();
        let path = format!(
            "{}/{}/raw/{}",
            segments[0],
            segments[1],
            segments[3..].join("/")
        );
        rewritten.set_path(&path);
        rewritten.set_query(None);
        rewritten.set_fragment(None);
        return Ok(rewritten);
    }

    Ok(url)
}

const DROPPED_ELEMENTS: [&str; 9] = [
    "script", "style", "noscript", "nav", "header", "footer", "aside", "svg", "form",
];
const BREAK_ELEMENTS: [&str; 13] = [
    "p", "div", "br", "li", "tr", "h1", "h2", "h3", "h4", "h5", "h6", "section", "article",
];

/// Readability-style main-content extraction: drop chrome elements with
/// their content, turn block boundaries into newlines, strip the rest of
/// the markup, decode the common entities, and collapse the whitespace.
/// Non-HTML input passes through unchanged.
pub fn extract_readable_text(input: &str) -> String {
    if !input.contains('<') {
        return input.to_string();
    }
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '<' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        let Some((name, tag_end)) = parse_tag(&chars, i) else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        if DROPPED_ELEMENTS.contains(&name.as_str()) && !name.starts_with('/') {
            i = skip_element(&chars, tag_end, &name);
            continue;
        }
        let bare = name.trim_start_matches('/');
        if BREAK_ELEMENTS.contains(&bare) {
            out.push('\n');
        }
        i = tag_end;
    }

    let decoded = decode_entities(&out);
    collapse_whitespace(&decoded)
}

/// `(lowercased tag name possibly /-prefixed, index past '>')`, or None
/// when this `<` opens no tag.
fn parse_tag(chars: &[char], start: usize) -> Option<(String, usize)> {
    let mut i = start + 1;
    let mut name = String::new();
    if chars.get(i) == Some(&'/') {
        name.push('/');
        i += 1;
    }
    if !chars.get(i)?.is_ascii_alphabetic() && chars.get(i) != Some(&'!') {
        return None;
    }
    while let Some(&ch) = chars.get(i) {
        if ch.is_ascii_alphanumeric() || ch == '!' {
            name.push(ch.to_ascii_lowercase());
            i += 1;
        } else {
            break;
        }
    }
    while let Some(&ch) = chars.get(i) {
        i += 1;
        if ch == '>' {
            return Some((name, i));
        }
    }
    None
}

fn skip_element(chars: &[char], from: usize, name: &str) -> usize {
    let closer: Vec<char> = format!("</{name}").chars().collect();
    let mut i = from;
    'outer: while i + closer.len() <= chars.len() {
        for (offset, expected) in closer.iter().enumerate() {
            if !chars[i + offset].eq_ignore_ascii_case(expected) {
                i += 1;
                continue 'outer;
            }
        }
        let mut j = i + closer.len();
        while j < chars.len() && chars[j] != '>' {
            j += 1;
        }
        return (j + 1).min(chars.len());
    }
    chars.len()
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run == 1 && !out.is_empty() {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(trimmed);
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeTransport {
        replies: Mutex<HashMap<String, HttpReply>>,
    }

    impl FakeTransport {
        fn new(entries: Vec<(&str, HttpReply)>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(
                    entries
                        .into_iter()
                        .map(|(url, reply)| (url.to_string(), reply))
                        .collect(),
                ),
            })
        }
    }

    impl HttpTransport for FakeTransport {
        fn get(&self, url: &str, _max_bytes: u64) -> io::Result<HttpReply> {
            self.replies
                .lock()
                .unwrap()
                .remove(url)
                .ok_or_else(|| io::Error::other(format!("unexpected url {url}")))
        }
    }

    fn ok(body: &str) -> HttpReply {
        HttpReply {
            status: 200,
            location: None,
            body: body.as_bytes().to_vec(),
            truncated: false,
        }
    }

    fn redirect(to: &str) -> HttpReply {
        HttpReply {
            status: 302,
            location: Some(to.to_string()),
            body: Vec::new(),
            truncated: false,
        }
    }

    fn fetcher(transport: Arc<FakeTransport>) -> WebFetcher {
        let mut network = NetworkPolicy::default();
        network.enabled = true;
        WebFetcher {
            transport,
            resolver: Arc::new(|_host: &str| Ok(vec!["93.184.216.34".parse().unwrap()])),
            network,
        }
    }

    fn allow_all(_: &str) -> bool {
        true
    }

    #[test]
    fn disabled_network_denies_everything() {
        let transport = FakeTransport::new(vec![]);
        let mut web = fetcher(transport);
        web.network.enabled = false;
        let outcome = web
            .fetch("https://example.com/", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Denied { reason: "NETWORK_DISABLED" }));
    }

    #[test]
    fn literal_loopback_is_ssrf_blocked() {
        let web = fetcher(FakeTransport::new(vec![]));
        let outcome = web
            .fetch("http://127.0.0.1:8000/x", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Denied { reason: "SSRF_BLOCKED" }));
    }

    #[test]
    fn hostname_resolving_private_is_ssrf_blocked() {
        let web = fetcher(FakeTransport::new(vec![])).with_resolver(Arc::new(|_host: &str| {
            Ok(vec!["10.0.0.7".parse().unwrap()])
        }));
        let outcome = web
            .fetch("https://internal.example/", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Denied { reason: "SSRF_BLOCKED" }));
    }

    #[test]
    fn unallowed_host_requires_approval() {
        let web = fetcher(FakeTransport::new(vec![]));
        let outcome = web
            .fetch("https://unknown.example/", FetchMode::RawText, None, &|_| false)
            .unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::Denied { reason: "NEW_SOURCE_REQUIRES_APPROVAL" }
        ));
    }

    #[test]
    fn non_http_scheme_is_denied() {
        let web = fetcher(FakeTransport::new(vec![]));
        let outcome = web
            .fetch("ftp://example.com/file", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::Denied { reason: "UNSUPPORTED_URL_SCHEME" }
        ));
    }

    #[test]
    fn redirects_are_followed_with_rechecks() {
        let transport = FakeTransport::new(vec![
            ("https://docs.example/a", redirect("https://docs.example/b")),
            ("https://docs.example/b", ok("made it")),
        ]);
        let web = fetcher(transport);
        match web
            .fetch("https://docs.example/a", FetchMode::RawText, None, &allow_all)
            .unwrap()
        {
            FetchOutcome::Bytes(bytes) => assert_eq!(bytes, b"made it"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn redirect_to_unallowed_host_is_denied() {
        let transport = FakeTransport::new(vec![(
            "https://docs.example/a",
            redirect("https://evil.example/b"),
        )]);
        let web = fetcher(transport);
        let allowed = |host: &str| host == "docs.example";
        let outcome = web
            .fetch("https://docs.example/a", FetchMode::RawText, None, &allowed)
            .unwrap();
        assert!(matches!(
            outcome,
            FetchOutcome::Denied { reason: "NEW_SOURCE_REQUIRES_APPROVAL" }
        ));
    }

    #[test]
    fn too_many_redirects_fail() {
        let transport = FakeTransport::new(vec![
            ("https://d.example/1", redirect("https://d.example/2")),
            ("https://d.example/2", redirect("https://d.example/3")),
            ("https://d.example/3", redirect("https://d.example/4")),
            ("https://d.example/4", redirect("https://d.example/5")),
        ]);
        let web = fetcher(transport);
        let outcome = web
            .fetch("https://d.example/1", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Denied { reason: "FETCH_FAILED" }));
    }

    #[test]
    fn truncated_body_is_size_exceeded() {
        let mut reply = ok("partial");
        reply.truncated = true;
        let transport = FakeTransport::new(vec![("https://d.example/big", reply)]);
        let web = fetcher(transport);
        let outcome = web
            .fetch("https://d.example/big", FetchMode::RawText, None, &allow_all)
            .unwrap();
        assert!(matches!(outcome, FetchOutcome::Denied { reason: "SIZE_EXCEEDED" }));
    }

    #[test]
    fn github_blob_url_is_rewritten_to_raw() {
        let url = normalize_raw_file_url("https://github.com/org/repo/blob/main/src/lib.rs").unwrap();
        assert_eq!(
            url.as_str(),
            "https://raw.githubusercontent.com/org/repo/main/src/lib.rs"
        );
    }

    #[test]
    fn gitlab_blob_url_is_rewritten_to_raw() {
        let url =
            normalize_raw_file_url("https://gitlab.example/group/proj/-/blob/main/a.rs?x=1").unwrap();
        assert_eq!(url.path(), "/group/proj/-/raw/main/a.rs");
        assert!(url.query().is_none());
    }

    #[test]
    fn readable_text_extracts_main_content() {
        let html = "<html><head><style>.x{}</style></head><body>\
                    <nav>menu menu</nav><p>Real content &amp; more.</p>\
                    <script>track()</script><footer>legal</footer></body></html>";
        let text = extract_readable_text(html);
        assert_eq!(text, "Real content & more.");
    }
}
