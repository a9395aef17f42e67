//! Immutable policy snapshots and the swap-on-reload handle.
//!
//! A snapshot bundles everything a scan depends on — the compiled rule
//! pack, the profile, the config — under a single version string. The
//! handle hands out `Arc`s: in-flight scans keep the snapshot they began
//! with, a reload (SIGHUP in the server) swaps the pointer for future
//! requests.

use std::sync::{Arc, RwLock};

use crate::config::GuardConfig;
use crate::decide::Profile;
use crate::detect::packs::{self, CompiledRulePack};
use crate::error::Result;
use crate::hash::sha256_hex;
use crate::redact;

pub struct PolicySnapshot {
    pub config: GuardConfig,
    pub rules: Arc<CompiledRulePack>,
    /// Hash of (rule pack ‖ profile ‖ redaction config); stable across
    /// runs, used as the cache key on every result.
    pub version: String,
}

impl PolicySnapshot {
    pub fn load(config: GuardConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let rules = Arc::new(packs::load_builtin()?);
        let version = policy_version(
            packs::BUILTIN_RULE_PACK,
            config.profile.as_str(),
            &redact::config_fingerprint(),
        );
        tracing::info!(version = %version, profile = %config.profile, "policy snapshot loaded");
        Ok(Arc::new(Self {
            config,
            rules,
            version,
        }))
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }
}

pub fn policy_version(pack: &str, profile: &str, redaction: &str) -> String {
    let mut joined = String::with_capacity(pack.len() + profile.len() + redaction.len() + 2);
    joined.push_str(pack);
    joined.push('\u{1f}');
    joined.push_str(profile);
    joined.push('\u{1f}');
    joined.push_str(redaction);
    sha256_hex(joined.as_bytes())[..16].to_string()
}

pub struct PolicyHandle {
    inner: RwLock<Arc<PolicySnapshot>>,
}

impl PolicyHandle {
    pub fn new(snapshot: Arc<PolicySnapshot>) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn current(&self) -> Arc<PolicySnapshot> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn swap(&self, snapshot: Arc<PolicySnapshot>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = snapshot;
    }

    pub fn reload(&self, config: GuardConfig) -> Result<()> {
        let snapshot = PolicySnapshot::load(config)?;
        tracing::info!(version = %snapshot.version, "policy reloaded");
        self.swap(snapshot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_stable_and_input_sensitive() {
        let a = policy_version("pack", "balanced", "redact-v1");
        let b = policy_version("pack", "balanced", "redact-v1");
        let c = policy_version("pack", "strict", "redact-v1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn snapshot_load_and_swap() {
        let snapshot = PolicySnapshot::load(GuardConfig::default()).unwrap();
        let first_version = snapshot.version.clone();
        let handle = PolicyHandle::new(snapshot);

        let mut config = GuardConfig::default();
        config.profile = Profile::Strict;
        handle.reload(config).unwrap();

        let current = handle.current();
        assert_eq!(current.profile(), Profile::Strict);
        assert_ne!(current.version, first_version);
    }
}
