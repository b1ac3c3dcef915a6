// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Coordination Configuration Types
//
// Defines the configuration manifest for a workclaim coordinator:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Claim lifetimes per claimant kind
// - Work-stealing rules (contest window, cross-type compatibility graph)
// - Load-balancing thresholds
// - Event bus sizing

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "CoordinationConfig";

/// Top-level coordination configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationConfig {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CoordinationConfig")
    pub kind: String,

    pub metadata: ConfigMetadata,

    #[serde(default)]
    pub spec: CoordinationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Name of the coordinator instance
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationSpec {
    #[serde(default)]
    pub claims: ClaimSettings,

    #[serde(default)]
    pub stealing: StealingSettings,

    #[serde(default)]
    pub load_balancing: LoadBalancingSettings,

    #[serde(default)]
    pub event_bus: EventBusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimSettings {
    /// Lifetime of an agent claim ("2h"). Omit for claims that never expire.
    #[serde(default = "default_agent_ttl", with = "humantime_serde")]
    pub agent_claim_ttl: Option<Duration>,

    /// Lifetime of a human claim ("24h")
    #[serde(default = "default_human_ttl", with = "humantime_serde")]
    pub human_claim_ttl: Option<Duration>,

    /// Claims without an expiry expire after this long without activity
    #[serde(default = "default_inactivity_timeout", with = "humantime_serde")]
    pub inactivity_timeout: Duration,

    /// Claims without activity for this long are reported as stale
    #[serde(default = "default_stale_after", with = "humantime_serde")]
    pub stale_after: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StealingSettings {
    /// How long a dispossessed owner may contest a steal
    #[serde(default = "default_contest_window", with = "humantime_serde")]
    pub contest_window: Duration,

    /// Agent type allowed to steal from every other agent type
    #[serde(default = "default_coordinator_type")]
    pub coordinator_type: String,

    /// Agents may never steal from humans while set
    #[serde(default = "default_true")]
    pub protect_human_claims: bool,

    /// Directed graph: thief type -> agent types it may steal from.
    /// Same-type stealing is always allowed.
    #[serde(default = "default_compatibility")]
    pub compatibility: BTreeMap<String, Vec<String>>,

    /// Mark stale work stealable on behalf of its owner during detection
    #[serde(default)]
    pub auto_mark_stale: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancingSettings {
    #[serde(default = "default_overload_threshold")]
    pub overload_threshold: f64,

    #[serde(default = "default_underload_threshold")]
    pub underload_threshold: f64,

    /// Claims at or above this progress are never moved
    #[serde(default = "default_max_progress_to_move")]
    pub max_progress_to_move: u8,

    #[serde(default = "default_max_moves")]
    pub max_moves_per_rebalance: usize,

    #[serde(default = "default_true")]
    pub prefer_same_type: bool,

    #[serde(default = "default_true")]
    pub use_handoff: bool,

    /// A swarm with overloaded agents still counts as balanced above this score
    #[serde(default = "default_balanced_score")]
    pub balanced_score_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBusSettings {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            agent_claim_ttl: default_agent_ttl(),
            human_claim_ttl: default_human_ttl(),
            inactivity_timeout: default_inactivity_timeout(),
            stale_after: default_stale_after(),
        }
    }
}

impl Default for StealingSettings {
    fn default() -> Self {
        Self {
            contest_window: default_contest_window(),
            coordinator_type: default_coordinator_type(),
            protect_human_claims: true,
            compatibility: default_compatibility(),
            auto_mark_stale: false,
        }
    }
}

impl Default for LoadBalancingSettings {
    fn default() -> Self {
        Self {
            overload_threshold: default_overload_threshold(),
            underload_threshold: default_underload_threshold(),
            max_progress_to_move: default_max_progress_to_move(),
            max_moves_per_rebalance: default_max_moves(),
            prefer_same_type: true,
            use_handoff: true,
            balanced_score_threshold: default_balanced_score(),
        }
    }
}

impl Default for EventBusSettings {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
        }
    }
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ConfigMetadata {
                name: "workclaim".to_string(),
                labels: None,
            },
            spec: CoordinationSpec::default(),
        }
    }
}

impl CoordinationConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. WORKCLAIM_CONFIG_PATH environment variable
    /// 2. ./workclaim.yaml (working directory)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("WORKCLAIM_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./workclaim.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(explicit_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            tracing::info!("Loading coordination config from explicit path: {:?}", path);
            Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
        } else if let Some(path) = Self::discover_config() {
            tracing::info!("Loading coordination config from discovered path: {:?}", path);
            Self::from_yaml_file(path)?
        } else {
            tracing::warn!("No coordination config found. Using defaults.");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("WORKCLAIM_PROTECT_HUMAN_CLAIMS") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: WORKCLAIM_PROTECT_HUMAN_CLAIMS=true");
                    self.spec.stealing.protect_human_claims = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: WORKCLAIM_PROTECT_HUMAN_CLAIMS=false");
                    self.spec.stealing.protect_human_claims = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for WORKCLAIM_PROTECT_HUMAN_CLAIMS: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("WORKCLAIM_MAX_MOVES_PER_REBALANCE") {
            match val.parse::<usize>() {
                Ok(moves) => {
                    tracing::info!("Environment override: WORKCLAIM_MAX_MOVES_PER_REBALANCE={}", moves);
                    self.spec.load_balancing.max_moves_per_rebalance = moves;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for WORKCLAIM_MAX_MOVES_PER_REBALANCE: '{}'. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let lb = &self.spec.load_balancing;
        if lb.overload_threshold <= 1.0 {
            anyhow::bail!("load_balancing.overload_threshold must be greater than 1.0");
        }
        if !(0.0..1.0).contains(&lb.underload_threshold) {
            anyhow::bail!("load_balancing.underload_threshold must be in [0.0, 1.0)");
        }
        if lb.max_progress_to_move > 100 {
            anyhow::bail!("load_balancing.max_progress_to_move cannot exceed 100");
        }
        if !(0.0..=1.0).contains(&lb.balanced_score_threshold) {
            anyhow::bail!("load_balancing.balanced_score_threshold must be in [0.0, 1.0]");
        }

        if self.spec.stealing.coordinator_type.is_empty() {
            anyhow::bail!("stealing.coordinator_type cannot be empty");
        }

        if self.spec.event_bus.capacity == 0 {
            anyhow::bail!("event_bus.capacity must be at least 1");
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_agent_ttl() -> Option<Duration> {
    Some(Duration::from_secs(2 * 60 * 60))
}

fn default_human_ttl() -> Option<Duration> {
    Some(Duration::from_secs(24 * 60 * 60))
}

fn default_inactivity_timeout() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_stale_after() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_contest_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_coordinator_type() -> String {
    "coordinator".to_string()
}

fn default_compatibility() -> BTreeMap<String, Vec<String>> {
    let edges: [(&str, &[&str]); 6] = [
        ("coder", &["debugger"]),
        ("debugger", &["coder"]),
        ("tester", &[]),
        ("reviewer", &[]),
        ("researcher", &["analyst"]),
        ("analyst", &["researcher"]),
    ];
    edges
        .iter()
        .map(|(thief, victims)| {
            (
                thief.to_string(),
                victims.iter().map(|victim| victim.to_string()).collect(),
            )
        })
        .collect()
}

fn default_overload_threshold() -> f64 {
    1.5
}

fn default_underload_threshold() -> f64 {
    0.5
}

fn default_max_progress_to_move() -> u8 {
    25
}

fn default_max_moves() -> usize {
    10
}

fn default_balanced_score() -> f64 {
    0.8
}

fn default_bus_capacity() -> usize {
    1000
}
