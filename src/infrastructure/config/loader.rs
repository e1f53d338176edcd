use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents_per_node: {0}. Must be between 1 and 1000")]
    InvalidMaxAgentsPerNode(usize),

    #[error("Invalid hierarchy_depth: {0}. Must be at least 1")]
    InvalidHierarchyDepth(u32),

    #[error("Invalid consensus timeout_ms: {0}. Must be positive")]
    InvalidConsensusTimeout(u64),

    #[error("Invalid byzantine_tolerance: {0}. PBFT requires at least 1")]
    InvalidByzantineTolerance(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid work_stealing bounds: min_tasks_to_steal ({0}) exceeds max_tasks_to_steal ({1})")]
    InvalidWorkStealingBounds(u32, u32),

    #[error("Invalid relaunch_ceiling: {0}. Must be at least 1")]
    InvalidRelaunchCeiling(u32),

    #[error("Invalid bind_addr: cannot be empty")]
    EmptyBindAddr,

    #[error("Invalid rate_limit_max_messages: {0}. Must be at least 1")]
    InvalidRateLimitMaxMessages(u32),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .swarm-core/config.yaml (project config)
    /// 3. .swarm-core/local.yaml (project local overrides, optional)
    /// 4. Environment variables (`SWARM_CORE_*` prefix, highest priority)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".swarm-core/config.yaml"))
            .merge(Yaml::file(".swarm-core/local.yaml"))
            .merge(Env::prefixed("SWARM_CORE_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.coordination.max_agents_per_node == 0
            || config.coordination.max_agents_per_node > 1000
        {
            return Err(ConfigError::InvalidMaxAgentsPerNode(
                config.coordination.max_agents_per_node,
            ));
        }

        if config.coordination.hierarchy_depth == 0 {
            return Err(ConfigError::InvalidHierarchyDepth(
                config.coordination.hierarchy_depth,
            ));
        }

        if config.consensus.timeout_ms == 0 {
            return Err(ConfigError::InvalidConsensusTimeout(
                config.consensus.timeout_ms,
            ));
        }

        use crate::domain::models::config::ConsensusProtocolKind;
        if config.consensus.protocol == ConsensusProtocolKind::Pbft
            && config.consensus.byzantine_tolerance == 0
        {
            return Err(ConfigError::InvalidByzantineTolerance(
                config.consensus.byzantine_tolerance,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let ws = &config.coordination.work_stealing;
        if ws.min_tasks_to_steal > ws.max_tasks_to_steal {
            return Err(ConfigError::InvalidWorkStealingBounds(
                ws.min_tasks_to_steal,
                ws.max_tasks_to_steal,
            ));
        }

        if config.relaunch_ceiling == 0 {
            return Err(ConfigError::InvalidRelaunchCeiling(config.relaunch_ceiling));
        }

        if config.transport.bind_addr.is_empty() {
            return Err(ConfigError::EmptyBindAddr);
        }

        if config.transport.rate_limit_max_messages == 0 {
            return Err(ConfigError::InvalidRateLimitMaxMessages(
                config.transport.rate_limit_max_messages,
            ));
        }

        Ok(())
    }
}
