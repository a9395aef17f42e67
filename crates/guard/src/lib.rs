//! BridgeWarden guard — the inspection pipeline and policy surface.
//!
//! Untrusted bytes enter through `GuardPipeline::scan` and pass through a
//! fixed sequence of stages: normalize, sanitize, detect, redact, score,
//! decide. The result is a policy decision with a sanitized rendering, a
//! stable content hash, and — on BLOCK — a quarantine handle. Fetchers
//! (file, web, repo) feed the pipeline at its contract boundary; the
//! approvals store and audit log close the loop for human review.

pub mod approvals;
pub mod audit;
pub mod config;
pub mod core;
pub mod decide;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod hash;
pub mod normalize;
pub mod pipeline;
pub mod policy;
pub mod quarantine;
pub mod redact;
pub mod sanitize;
pub mod score;
pub mod shadow;

pub use approvals::{ApprovalKind, ApprovalRecord, ApprovalStatus, ApprovalStore};
pub use audit::{AuditLog, AuditRecord};
pub use config::{ApprovalPolicy, GuardConfig, NetworkPolicy, ScanLimits};
pub use core::{codes, Decision, Finding, GuardResult, Redaction, SourceDescriptor};
pub use decide::Profile;
pub use error::{GuardError, Result};
pub use fetch::file::FileFetcher;
pub use fetch::repo::{RepoFetcher, RepoScanReport, RepoScanRequest};
pub use fetch::web::{FetchMode, WebFetcher};
pub use fetch::{FetchGate, FetchOutcome};
pub use pipeline::GuardPipeline;
pub use policy::{PolicyHandle, PolicySnapshot};
pub use quarantine::{QuarantineStore, QuarantineView};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
