//! The eight `bw_*` tools: wiring between the RPC surface, the fetchers,
//! the stores, and the guard pipeline.
//!
//! Every tool reads the policy snapshot once at entry and uses it for the
//! whole call, so a concurrent reload never changes a request mid-flight.
//! Policy denials surface as ordinary results (a BLOCK GuardResult or a
//! denied repo report); `GuardError`s bubble up to the server loop and
//! become JSON-RPC errors without running the pipeline.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use bridgewarden_guard::approvals::{ApprovalKind, ApprovalRecord, ApprovalStatus, ApprovalStore};
use bridgewarden_guard::audit::AuditLog;
use bridgewarden_guard::codes;
use bridgewarden_guard::config::GuardConfig;
use bridgewarden_guard::fetch::web::{normalize_host, normalize_raw_file_url, FetchMode};
use bridgewarden_guard::fetch::{FetchGate, FetchOutcome, HttpTransport};
use bridgewarden_guard::pipeline::GuardPipeline;
use bridgewarden_guard::policy::{PolicyHandle, PolicySnapshot};
use bridgewarden_guard::quarantine::{QuarantineStore, QuarantineView};
use bridgewarden_guard::{
    FileFetcher, GuardError, GuardResult, RepoFetcher, RepoScanReport, RepoScanRequest, Result,
    SourceDescriptor, WebFetcher,
};

pub struct Gateway {
    policy: PolicyHandle,
    config_path: Option<PathBuf>,
    data_dir: PathBuf,
    base_dir: PathBuf,
    quarantine: Arc<QuarantineStore>,
    audit: Arc<AuditLog>,
    approvals: Arc<ApprovalStore>,
    gate: FetchGate,
    web_transport: Option<Arc<dyn HttpTransport>>,
    web_resolver: Option<Arc<dyn Fn(&str) -> std::io::Result<Vec<IpAddr>> + Send + Sync>>,
    repo_transport: Option<Arc<dyn HttpTransport>>,
}

impl Gateway {
    pub fn new(
        config: GuardConfig,
        data_dir: impl Into<PathBuf>,
        base_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let snapshot = PolicySnapshot::load(config)?;
        let gate = FetchGate::new(snapshot.config.limits.max_concurrent_fetches);
        Ok(Self {
            policy: PolicyHandle::new(snapshot),
            config_path: None,
            quarantine: Arc::new(QuarantineStore::new(data_dir.join("quarantine"))?),
            audit: Arc::new(AuditLog::new(data_dir.join("logs").join("audit.jsonl"))?),
            approvals: Arc::new(ApprovalStore::new(data_dir.join("approvals"))?),
            gate,
            data_dir,
            base_dir: base_dir.into(),
            web_transport: None,
            web_resolver: None,
            repo_transport: None,
        })
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_web_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.web_transport = Some(transport);
        self
    }

    pub fn with_web_resolver(
        mut self,
        resolver: Arc<dyn Fn(&str) -> std::io::Result<Vec<IpAddr>> + Send + Sync>,
    ) -> Self {
        self.web_resolver = Some(resolver);
        self
    }

    pub fn with_repo_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.repo_transport = Some(transport);
        self
    }

    /// Re-read the config file and swap the policy snapshot. In-flight
    /// requests keep the snapshot they started with.
    pub fn reload_policy(&self) -> Result<()> {
        let config = match &self.config_path {
            Some(path) => GuardConfig::load(path)?,
            None => GuardConfig::default(),
        };
        self.policy.reload(config)
    }

    pub fn policy_version(&self) -> String {
        self.policy.current().version.clone()
    }

    fn pipeline(&self, snapshot: &Arc<PolicySnapshot>) -> GuardPipeline {
        GuardPipeline::new(snapshot.clone())
            .with_quarantine(self.quarantine.clone())
            .with_audit(self.audit.clone())
    }

    /// Boundary-level BLOCK: no pipeline run, but it still lands in the
    /// audit log.
    fn audited_block(
        &self,
        reason: &str,
        source: SourceDescriptor,
        snapshot: &PolicySnapshot,
    ) -> GuardResult {
        let result = GuardResult::blocked(reason, source, snapshot.version.clone());
        if let Err(err) = self.audit.append(&result) {
            tracing::warn!(error = %err, "audit append failed");
        }
        result
    }

    pub fn read_file(
        &self,
        path: &str,
        repo_id: Option<&str>,
        mode: Option<&str>,
    ) -> Result<GuardResult> {
        let snapshot = self.policy.current();
        let request_id = request_id();
        let source = SourceDescriptor::file(path, &request_id);

        if repo_id.is_some() {
            // Repo snapshots persist manifests, not file contents.
            return Ok(self.audited_block("REPO_ID_UNSUPPORTED", source, &snapshot));
        }
        match mode.unwrap_or("safe") {
            "safe" => {}
            "raw" => return Ok(self.audited_block("RAW_MODE_NOT_ALLOWED", source, &snapshot)),
            other => {
                return Err(GuardError::InvalidArgument(format!("unknown mode {other:?}")))
            }
        }

        let fetcher = FileFetcher::new(&self.base_dir, snapshot.config.limits.file_max_bytes)?;
        let _permit = self.gate.acquire();
        match fetcher.fetch(path)? {
            FetchOutcome::Bytes(bytes) => Ok(self.pipeline(&snapshot).scan(bytes, source)),
            FetchOutcome::Denied { reason } => Ok(self.audited_block(reason, source, &snapshot)),
        }
    }

    pub fn web_fetch(
        &self,
        url: &str,
        mode: Option<&str>,
        max_bytes: Option<u64>,
    ) -> Result<GuardResult> {
        let snapshot = self.policy.current();
        let request_id = request_id();
        let mode = match mode.unwrap_or("readable_text") {
            "readable_text" => FetchMode::ReadableText,
            "raw_text" => FetchMode::RawText,
            other => return Err(GuardError::InvalidArgument(format!("unknown mode {other:?}"))),
        };

        let normalized = normalize_raw_file_url(url)?;
        let domain = normalized.host_str().map(normalize_host).unwrap_or_default();
        let source = SourceDescriptor::web(url, &domain, &request_id);

        let mut web = WebFetcher::new(snapshot.config.network.clone())?;
        if let Some(transport) = &self.web_transport {
            web = web.with_transport(transport.clone());
        }
        if let Some(resolver) = &self.web_resolver {
            web = web.with_resolver(resolver.clone());
        }

        let require_approval = snapshot.config.approvals.require_approval;
        let static_hosts: Vec<String> = snapshot
            .config
            .network
            .allowed_web_hosts
            .iter()
            .chain(snapshot.config.approvals.allowed_web_domains.iter())
            .map(|h| normalize_host(h))
            .collect();
        let approvals = self.approvals.clone();
        let allowed = move |host: &str| -> bool {
            if !require_approval {
                return true;
            }
            static_hosts.iter().any(|h| h == host)
                || approvals
                    .is_approved(ApprovalKind::WebDomain, host)
                    .unwrap_or(false)
        };

        let _permit = self.gate.acquire();
        match web.fetch(url, mode, max_bytes, &allowed)? {
            FetchOutcome::Bytes(bytes) => Ok(self.pipeline(&snapshot).scan(bytes, source)),
            FetchOutcome::Denied { reason } if reason == codes::NEW_SOURCE_REQUIRES_APPROVAL => {
                let approval = self.approvals.request(ApprovalKind::WebDomain, &domain)?;
                Ok(self
                    .audited_block(reason, source, &snapshot)
                    .with_approval_id(approval.approval_id))
            }
            FetchOutcome::Denied { reason } => Ok(self.audited_block(reason, source, &snapshot)),
        }
    }

    pub fn fetch_repo(&self, request: RepoScanRequest) -> Result<RepoScanReport> {
        let snapshot = self.policy.current();
        let request_id = request_id();

        if !snapshot.config.network.enabled {
            return Ok(RepoScanReport::denied(codes::NETWORK_DISABLED));
        }

        let host = normalize_raw_file_url(&request.url)?
            .host_str()
            .map(normalize_host)
            .unwrap_or_default();
        let allowed = !snapshot.config.approvals.require_approval
            || snapshot.config.approvals.allowed_repo_urls.contains(&request.url)
            || snapshot
                .config
                .network
                .allowed_repo_hosts
                .iter()
                .any(|h| normalize_host(h) == host)
            || self.approvals.is_approved(ApprovalKind::RepoUrl, &request.url)?;
        if !allowed {
            let approval = self.approvals.request(ApprovalKind::RepoUrl, &request.url)?;
            return Ok(RepoScanReport::denied(codes::NEW_SOURCE_REQUIRES_APPROVAL)
                .with_approval_id(approval.approval_id));
        }

        let mut fetcher =
            RepoFetcher::new(snapshot.config.network.clone(), self.data_dir.join("repos"))?;
        if let Some(transport) = &self.repo_transport {
            fetcher = fetcher.with_transport(transport.clone());
        }

        let _permit = self.gate.acquire();
        fetcher.fetch_and_scan(&self.pipeline(&snapshot), &request, &request_id)
    }

    pub fn quarantine_get(&self, quarantine_id: &str) -> Result<QuarantineView> {
        let snapshot = self.policy.current();
        self.quarantine
            .view(quarantine_id, snapshot.config.limits.quarantine_excerpt_bytes)
    }

    pub fn request_approval(&self, kind: &str, target: &str) -> Result<ApprovalRecord> {
        self.approvals.request(parse_kind(kind)?, target)
    }

    pub fn get_approval(&self, approval_id: &str) -> Result<ApprovalRecord> {
        self.approvals.get(approval_id)
    }

    pub fn list_approvals(
        &self,
        status: Option<&str>,
        kind: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ApprovalRecord>> {
        let status = status.map(parse_status).transpose()?;
        let kind = kind.map(parse_kind).transpose()?;
        self.approvals.list(status, kind, limit)
    }

    pub fn decide_approval(
        &self,
        approval_id: &str,
        decision: &str,
        notes: Option<&str>,
    ) -> Result<ApprovalRecord> {
        let decision = match parse_status(decision)? {
            ApprovalStatus::Pending => {
                return Err(GuardError::InvalidArgument(
                    "decision must be APPROVED or DENIED".to_string(),
                ))
            }
            resolved => resolved,
        };
        self.approvals.decide(approval_id, decision, None, notes)
    }
}

fn request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}

fn parse_kind(kind: &str) -> Result<ApprovalKind> {
    match kind {
        "web_domain" => Ok(ApprovalKind::WebDomain),
        "repo_url" => Ok(ApprovalKind::RepoUrl),
        "upstream_mcp_server" => Ok(ApprovalKind::UpstreamMcpServer),
        other => Err(GuardError::InvalidArgument(format!("unknown approval kind {other:?}"))),
    }
}

fn parse_status(status: &str) -> Result<ApprovalStatus> {
    match status {
        "PENDING" => Ok(ApprovalStatus::Pending),
        "APPROVED" => Ok(ApprovalStatus::Approved),
        "DENIED" => Ok(ApprovalStatus::Denied),
        other => Err(GuardError::InvalidArgument(format!("unknown status {other:?}"))),
    }
}
