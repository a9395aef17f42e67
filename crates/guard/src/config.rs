//! Gateway configuration: profile selection, approval policy, network
//! policy, and per-scan resource limits. JSON on disk, defaults chosen so
//! a config-less gateway is the most conservative one: network disabled,
//! approvals required, balanced profile.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decide::Profile;
use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub profile: Profile,
    pub approvals: ApprovalPolicy,
    pub network: NetworkPolicy,
    pub limits: ScanLimits,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalPolicy {
    pub require_approval: bool,
    pub allowed_web_domains: Vec<String>,
    pub allowed_repo_urls: Vec<String>,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            require_approval: true,
            allowed_web_domains: Vec::new(),
            allowed_repo_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    pub enabled: bool,
    pub timeout_seconds: f64,
    pub web_max_bytes: u64,
    pub repo_max_bytes: u64,
    pub repo_max_file_bytes: u64,
    pub repo_max_files: usize,
    pub allowed_web_hosts: Vec<String>,
    pub allowed_repo_hosts: Vec<String>,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_seconds: 10.0,
            web_max_bytes: 1024 * 1024,
            repo_max_bytes: 10 * 1024 * 1024,
            repo_max_file_bytes: 256 * 1024,
            repo_max_files: 2000,
            allowed_web_hosts: Vec::new(),
            allowed_repo_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanLimits {
    pub file_max_bytes: u64,
    pub max_findings: usize,
    pub scan_deadline_ms: u64,
    pub quarantine_excerpt_bytes: usize,
    pub max_concurrent_fetches: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            file_max_bytes: 1024 * 1024,
            max_findings: 256,
            scan_deadline_ms: 2000,
            quarantine_excerpt_bytes: 4096,
            max_concurrent_fetches: 4,
        }
    }
}

impl GuardConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.timeout_seconds <= 0.0 {
            return Err(GuardError::Config(
                "network.timeout_seconds must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("network.web_max_bytes", self.network.web_max_bytes),
            ("network.repo_max_bytes", self.network.repo_max_bytes),
            ("network.repo_max_file_bytes", self.network.repo_max_file_bytes),
            ("limits.file_max_bytes", self.limits.file_max_bytes),
        ] {
            if value == 0 {
                return Err(GuardError::Config(format!("{name} must be positive")));
            }
        }
        for (name, value) in [
            ("network.repo_max_files", self.network.repo_max_files),
            ("limits.max_findings", self.limits.max_findings),
            ("limits.quarantine_excerpt_bytes", self.limits.quarantine_excerpt_bytes),
            ("limits.max_concurrent_fetches", self.limits.max_concurrent_fetches),
        ] {
            if value == 0 {
                return Err(GuardError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = GuardConfig::default();
        assert!(!config.network.enabled);
        assert!(config.approvals.require_approval);
        assert_eq!(config.profile, Profile::Balanced);
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: GuardConfig = serde_json::from_str(
            r#"{"profile": "strict", "network": {"enabled": true, "allowed_web_hosts": ["docs.example"]}}"#,
        )
        .unwrap();
        assert_eq!(config.profile, Profile::Strict);
        assert!(config.network.enabled);
        assert_eq!(config.network.web_max_bytes, 1024 * 1024);
        assert!(config.approvals.require_approval);
    }

    #[test]
    fn unknown_profile_is_rejected() {
        let parsed: std::result::Result<GuardConfig, _> =
            serde_json::from_str(r#"{"profile": "yolo"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn zero_caps_are_rejected() {
        let config: GuardConfig =
            serde_json::from_str(r#"{"network": {"web_max_bytes": 0}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = GuardConfig::load(Path::new("/nonexistent/bridgewarden.json")).unwrap();
        assert!(!config.network.enabled);
    }
}
