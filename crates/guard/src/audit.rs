//! Append-only JSONL audit log.
//!
//! One line per guard decision, written with a single `write_all` on an
//! `O_APPEND` handle. POSIX guarantees appends up to PIPE_BUF bytes are
//! not interleaved; longer lines take an exclusive advisory lock for the
//! duration of the one write. Original text never appears here — only
//! the content hash identifies what was scanned.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::core::{Decision, GuardResult, Redaction, SourceDescriptor};
use crate::error::Result;
use crate::quarantine::now_rfc3339;

/// Portable lower bound for atomic pipe/file appends on POSIX.
const PIPE_BUF: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: String,
    pub source: SourceDescriptor,
    pub content_hash: String,
    pub risk_score: f64,
    pub decision: Decision,
    pub reasons: Vec<String>,
    pub policy_version: String,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quarantine_id: Option<String>,
    pub redactions_summary: Vec<Redaction>,
}

impl AuditRecord {
    pub fn from_result(result: &GuardResult) -> Self {
        Self {
            ts: now_rfc3339(),
            source: result.source.clone(),
            content_hash: result.content_hash.clone(),
            risk_score: result.risk_score,
            decision: result.decision,
            reasons: result.reasons.clone(),
            policy_version: result.policy_version.clone(),
            cache_hit: result.cache_hit,
            quarantine_id: result.quarantine_id.clone(),
            redactions_summary: result.redactions.clone(),
        }
    }
}

pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn append(&self, result: &GuardResult) -> Result<()> {
        self.append_record(&AuditRecord::from_result(result))
    }

    pub fn append_record(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if line.len() <= PIPE_BUF {
            file.write_all(line.as_bytes())?;
        } else {
            file.lock_exclusive()?;
            let outcome = file.write_all(line.as_bytes());
            let _ = FileExt::unlock(&file);
            outcome?;
        }
        Ok(())
    }

    /// Parse every line of the log. For tests and the review tooling, not
    /// the hot path.
    pub fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let mut records = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            records.push(serde_json::from_str(line)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(decision: Decision) -> GuardResult {
        GuardResult {
            decision,
            risk_score: 0.88,
            reasons: vec!["POLICY_OVERRIDE".to_string(), "EXFIL_REQUEST".to_string()],
            source: SourceDescriptor::inline("req-a"),
            content_hash: "ab".repeat(32),
            sanitized_text: "never logged".to_string(),
            quarantine_id: Some("q_abababababababab".to_string()),
            redactions: vec![Redaction::new("AWS_ACCESS_KEY", 1)],
            cache_hit: false,
            policy_version: "deadbeef00000000".to_string(),
            approval_id: None,
        }
    }

    #[test]
    fn appends_one_line_per_decision() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::new(dir.path().join("logs/audit.jsonl")).unwrap();
        log.append(&result(Decision::Block)).unwrap();
        log.append(&result(Decision::Allow)).unwrap();

        let records = log.read_all().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].decision, Decision::Block);
        assert_eq!(records[0].redactions_summary[0].kind, "AWS_ACCESS_KEY");
    }

    #[test]
    fn original_text_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path).unwrap();
        log.append(&result(Decision::Block)).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("never logged"));
        assert!(raw.contains(&"ab".repeat(32)));
    }

    #[test]
    fn long_lines_still_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path).unwrap();

        let mut big = result(Decision::Warn);
        big.reasons = (0..600).map(|i| format!("REASON_{i}")).collect();
        log.append(&big).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }
}
