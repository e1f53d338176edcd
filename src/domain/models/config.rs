//! Configuration domain model.
//!
//! Mirrors the consensus and coordination sections named in the external
//! interfaces: loaded by `infrastructure::config::loader`, validated, then
//! handed to each component at `Core` construction time.

use serde::{Deserialize, Serialize};

use crate::infrastructure::logging::LogConfig;

fn default_protocol() -> ConsensusProtocolKind {
    ConsensusProtocolKind::Quorum
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_byzantine_tolerance() -> usize {
    1
}

/// Which consensus protocol a deployment selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusProtocolKind {
    Raft,
    Pbft,
    Quorum,
    FastPaxos,
}

impl ConsensusProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raft => "raft",
            Self::Pbft => "pbft",
            Self::Quorum => "quorum",
            Self::FastPaxos => "fast-paxos",
        }
    }
}

impl std::fmt::Display for ConsensusProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-deployment consensus tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    #[serde(default = "default_protocol")]
    pub protocol: ConsensusProtocolKind,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Byzantine-tolerance parameter `f`; only consulted by PBFT.
    #[serde(default = "default_byzantine_tolerance")]
    pub byzantine_tolerance: usize,
    /// Explicit quorum size override; when unset, computed from agent count.
    pub quorum_size: Option<usize>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            byzantine_tolerance: default_byzantine_tolerance(),
            quorum_size: None,
        }
    }
}

fn default_max_agents_per_node() -> usize {
    20
}

fn default_hierarchy_depth() -> u32 {
    4
}

fn default_health_check_interval_ms() -> u64 {
    1_000
}

fn default_recovery_timeout_ms() -> u64 {
    5_000
}

/// Work-stealing tuning, consulted by the background steal cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkStealingConfig {
    pub enabled: bool,
    pub threshold_ratio: f64,
    pub min_tasks_to_steal: u32,
    pub max_tasks_to_steal: u32,
}

impl Default for WorkStealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ratio: 2.0,
            min_tasks_to_steal: 1,
            max_tasks_to_steal: 5,
        }
    }
}

/// Selection strategy tag for the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancingStrategy {
    LeastLoaded,
    RoundRobin,
    Random,
    Weighted,
}

impl Default for LoadBalancingStrategy {
    fn default() -> Self {
        Self::LeastLoaded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    #[serde(rename = "type")]
    pub strategy: LoadBalancingStrategy,
    pub rebalance_interval_ms: u64,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::default(),
            rebalance_interval_ms: 5_000,
        }
    }
}

/// Coordination tree and background-loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    #[serde(default = "default_max_agents_per_node")]
    pub max_agents_per_node: usize,
    #[serde(default = "default_hierarchy_depth")]
    pub hierarchy_depth: u32,
    pub work_stealing: WorkStealingConfig,
    pub load_balancing: LoadBalancingConfig,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_agents_per_node: default_max_agents_per_node(),
            hierarchy_depth: default_hierarchy_depth(),
            work_stealing: WorkStealingConfig::default(),
            load_balancing: LoadBalancingConfig::default(),
            health_check_interval_ms: default_health_check_interval_ms(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:7878".to_string()
}

fn default_rate_limit_max_messages() -> u32 {
    100
}

fn default_relaunch_ceiling() -> u32 {
    crate::domain::models::intervention::DEFAULT_RELAUNCH_CEILING
}

fn default_intervention_max_age_days() -> i64 {
    7
}

/// Session transport tuning (origin allow-list, per-session rate limit).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_rate_limit_max_messages")]
    pub rate_limit_max_messages: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            allowed_origins: Vec::new(),
            rate_limit_max_messages: default_rate_limit_max_messages(),
        }
    }
}

/// Optional best-effort snapshot persistence (§6 "Persisted state"). Absent
/// a path, `Core` never reads or writes a snapshot document — the core's
/// Non-goals explicitly treat durability across restart as best-effort, not
/// mandatory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub snapshot_path: Option<String>,
    /// Attempt to load `snapshot_path` at startup before any agent
    /// registers, restoring coordination-tree placement and intervention
    /// history. Ignored if `snapshot_path` is unset or the file is absent.
    pub restore_on_start: bool,
}

/// Top-level configuration aggregate, loaded by `ConfigLoader`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub consensus: ConsensusConfig,
    pub coordination: CoordinationConfig,
    pub transport: TransportConfig,
    pub logging: LogConfig,
    pub persistence: PersistenceConfig,
    #[serde(default = "default_relaunch_ceiling")]
    pub relaunch_ceiling: u32,
    #[serde(default = "default_intervention_max_age_days")]
    pub intervention_max_age_days: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            coordination: CoordinationConfig::default(),
            transport: TransportConfig::default(),
            logging: LogConfig::default(),
            persistence: PersistenceConfig::default(),
            relaunch_ceiling: default_relaunch_ceiling(),
            intervention_max_age_days: default_intervention_max_age_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = Config::default();
        assert_eq!(config.relaunch_ceiling, 10);
        assert_eq!(config.coordination.max_agents_per_node, 20);
        assert_eq!(config.consensus.protocol, ConsensusProtocolKind::Quorum);
    }

    #[test]
    fn yaml_parsing_merges_into_defaults() {
        let yaml = r"
coordination:
  max_agents_per_node: 50
consensus:
  protocol: raft
  timeout_ms: 8000
";
        let config: Config = serde_yaml::from_str(yaml).expect("valid yaml");
        assert_eq!(config.coordination.max_agents_per_node, 50);
        assert_eq!(config.consensus.protocol, ConsensusProtocolKind::Raft);
        assert_eq!(config.consensus.timeout_ms, 8000);
        // Untouched sections keep their defaults.
        assert_eq!(config.coordination.hierarchy_depth, 4);
    }
}
