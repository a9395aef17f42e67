//! Per-source approval store.
//!
//! One JSON file per approval under `<data-dir>/approvals/`. A record is
//! born PENDING and transitions to APPROVED or DENIED exactly once; the
//! transition is a read-modify-write under an exclusive advisory lock on
//! the record file. Requesting approval for a kind+target that already
//! has a PENDING record returns that record instead of minting another.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, Write};
use std::path::PathBuf;

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GuardError, Result};
use crate::quarantine::now_rfc3339;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    WebDomain,
    RepoUrl,
    UpstreamMcpServer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub kind: ApprovalKind,
    pub target: String,
    pub status: ApprovalStatus,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

pub struct ApprovalStore {
    root: PathBuf,
}

impl ApprovalStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Create a PENDING request, or return the existing PENDING record
    /// for the same kind+target.
    pub fn request(&self, kind: ApprovalKind, target: &str) -> Result<ApprovalRecord> {
        if let Some(pending) = self.find(Some(ApprovalStatus::Pending), Some(kind), target)? {
            return Ok(pending);
        }
        let record = ApprovalRecord {
            approval_id: format!("a_{}", Uuid::new_v4().simple()),
            kind,
            target: target.to_string(),
            status: ApprovalStatus::Pending,
            created_at: now_rfc3339(),
            decided_at: None,
            decided_by: None,
            notes: None,
        };
        let payload = serde_json::to_vec(&record)?;
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(self.record_path(&record.approval_id))?;
        file.write_all(&payload)?;
        file.sync_all()?;
        tracing::info!(approval_id = %record.approval_id, target, "approval requested");
        Ok(record)
    }

    pub fn get(&self, approval_id: &str) -> Result<ApprovalRecord> {
        validate_id(approval_id)?;
        let path = self.record_path(approval_id);
        if !path.exists() {
            return Err(GuardError::NotFound(format!("approval {approval_id}")));
        }
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Directory scan with in-memory filters, newest first.
    pub fn list(
        &self,
        status: Option<ApprovalStatus>,
        kind: Option<ApprovalKind>,
        limit: usize,
    ) -> Result<Vec<ApprovalRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let raw = fs::read_to_string(&path)?;
            let record: ApprovalRecord = serde_json::from_str(&raw)?;
            if status.is_some_and(|s| s != record.status) {
                continue;
            }
            if kind.is_some_and(|k| k != record.kind) {
                continue;
            }
            records.push(record);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records.truncate(limit);
        Ok(records)
    }

    /// Resolve a PENDING record. An already-decided record is returned
    /// unchanged — the transition happens at most once.
    pub fn decide(
        &self,
        approval_id: &str,
        decision: ApprovalStatus,
        decided_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<ApprovalRecord> {
        if decision == ApprovalStatus::Pending {
            return Err(GuardError::InvalidArgument(
                "decision must be APPROVED or DENIED".to_string(),
            ));
        }
        validate_id(approval_id)?;
        let path = self.record_path(approval_id);
        if !path.exists() {
            return Err(GuardError::NotFound(format!("approval {approval_id}")));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        file.lock_exclusive()?;
        let outcome = Self::decide_locked(&mut file, decision, decided_by, notes);
        let _ = FileExt::unlock(&file);
        let record = outcome?;
        tracing::info!(approval_id, status = ?record.status, "approval decided");
        Ok(record)
    }

    fn decide_locked(
        file: &mut fs::File,
        decision: ApprovalStatus,
        decided_by: Option<&str>,
        notes: Option<&str>,
    ) -> Result<ApprovalRecord> {
        let mut raw = String::new();
        file.read_to_string(&mut raw)?;
        let mut record: ApprovalRecord = serde_json::from_str(&raw)?;

        if record.status != ApprovalStatus::Pending {
            return Ok(record);
        }
        record.status = decision;
        record.decided_at = Some(now_rfc3339());
        record.decided_by = decided_by.map(str::to_string);
        record.notes = notes.map(str::to_string);

        let payload = serde_json::to_vec(&record)?;
        file.rewind()?;
        file.set_len(0)?;
        file.write_all(&payload)?;
        file.sync_all()?;
        Ok(record)
    }

    pub fn is_approved(&self, kind: ApprovalKind, target: &str) -> Result<bool> {
        Ok(self
            .find(Some(ApprovalStatus::Approved), Some(kind), target)?
            .is_some())
    }

    fn find(
        &self,
        status: Option<ApprovalStatus>,
        kind: Option<ApprovalKind>,
        target: &str,
    ) -> Result<Option<ApprovalRecord>> {
        let matches = self.list(status, kind, usize::MAX)?;
        Ok(matches.into_iter().find(|r| r.target == target))
    }

    fn record_path(&self, approval_id: &str) -> PathBuf {
        self.root.join(format!("{approval_id}.json"))
    }
}

fn validate_id(approval_id: &str) -> Result<()> {
    let well_formed = approval_id.starts_with("a_")
        && approval_id.len() > 2
        && approval_id[2..].chars().all(|c| c.is_ascii_alphanumeric());
    if well_formed {
        Ok(())
    } else {
        Err(GuardError::InvalidArgument(format!(
            "malformed approval id {approval_id:?}"
        )))
    }
}
