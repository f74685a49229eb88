//! Operator configuration with env-var overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_FIELD_MANAGER: &str = "kubedyn";

/// Budgets applied before a manifest is decoded any further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestLimits {
    pub max_bytes: usize,
    pub max_nodes: usize,
}

impl Default for ManifestLimits {
    fn default() -> Self {
        Self { max_bytes: 1 << 20, max_nodes: 100_000 }
    }
}

impl ManifestLimits {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_bytes: env_parse("KUBEDYN_MAX_YAML_BYTES").unwrap_or(d.max_bytes),
            max_nodes: env_parse("KUBEDYN_MAX_YAML_NODES").unwrap_or(d.max_nodes),
        }
    }
}

/// Settings every core operation reads from the cluster context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Field manager identity used for server-side apply.
    pub field_manager: String,
    /// Take ownership of conflicting fields instead of failing the apply.
    pub force_conflicts: bool,
    pub apply_timeout: Duration,
    pub delete_timeout: Duration,
    pub read_timeout: Duration,
    pub discovery_timeout: Duration,
    pub limits: ManifestLimits,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force_conflicts: false,
            apply_timeout: Duration::from_secs(30),
            delete_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(30),
            limits: ManifestLimits::default(),
        }
    }
}

impl OperatorConfig {
    /// Defaults overridden by `KUBEDYN_*` variables. Unparsable values fall back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            field_manager: std::env::var("KUBEDYN_FIELD_MANAGER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(d.field_manager),
            force_conflicts: std::env::var("KUBEDYN_FORCE_CONFLICTS")
                .ok()
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(d.force_conflicts),
            apply_timeout: env_secs("KUBEDYN_APPLY_TIMEOUT_SECS").unwrap_or(d.apply_timeout),
            delete_timeout: env_secs("KUBEDYN_DELETE_TIMEOUT_SECS").unwrap_or(d.delete_timeout),
            read_timeout: env_secs("KUBEDYN_READ_TIMEOUT_SECS").unwrap_or(d.read_timeout),
            discovery_timeout: env_secs("KUBEDYN_DISCOVERY_TIMEOUT_SECS").unwrap_or(d.discovery_timeout),
            limits: ManifestLimits::from_env(),
        }
    }

    pub fn with_field_manager(mut self, manager: impl Into<String>) -> Self {
        self.field_manager = manager.into();
        self
    }

    pub fn with_force_conflicts(mut self, force: bool) -> Self {
        self.force_conflicts = force;
        self
    }

    /// Same deadline for apply, delete and reads.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self.delete_timeout = timeout;
        self.read_timeout = timeout;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).filter(|s| *s > 0).map(Duration::from_secs)
}
