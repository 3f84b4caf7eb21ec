use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Top-level Strata configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub agents: AgentsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Which snapshot store backs the graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Memory,
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Store location for file and sqlite backends. Supports `~/`.
    #[serde(default = "default_graph_path")]
    pub path: String,
    /// Save after every successful mutation made through the catalog.
    #[serde(default)]
    pub autosave: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            path: default_graph_path(),
            autosave: false,
        }
    }
}

impl GraphConfig {
    /// Resolve the store path (expand ~).
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }

    /// Whether saved state outlives the process.
    pub fn is_persistent(&self) -> bool {
        self.backend != BackendKind::Memory
    }
}

fn default_graph_path() -> String {
    "~/.strata/graph.db".to_string()
}

/// One "deploying into `environment` requires a prior deployment into `requires`" rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionRule {
    pub environment: String,
    pub requires: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Require an `allowed_in` edge from the owning application.
    #[serde(default = "default_true")]
    pub allow_list: bool,
    /// Gate environments on active `policy` nodes that `enforces` them.
    #[serde(default = "default_true")]
    pub enforce_checks: bool,
    #[serde(default = "default_promotion")]
    pub promotion: Vec<PromotionRule>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allow_list: true,
            enforce_checks: true,
            promotion: default_promotion(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_promotion() -> Vec<PromotionRule> {
    vec![PromotionRule {
        environment: "prod".to_string(),
        requires: "dev".to_string(),
    }]
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    InProcess,
    Broadcast,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// Channel capacity for the broadcast transport.
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,
    /// How many recent event IDs agents remember to drop redeliveries.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            capacity: default_bus_capacity(),
            dedup_window: default_dedup_window(),
        }
    }
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_dedup_window() -> usize {
    512
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Built-in agents to start (`policy`, `deployment`).
    #[serde(default = "default_builtin_agents")]
    pub builtin: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            builtin: default_builtin_agents(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_builtin_agents() -> Vec<String> {
    vec!["policy".to_string(), "deployment".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "strata=info,warn".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| StrataError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Load config, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| StrataError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.agents.request_timeout_ms == 0 {
            return Err(StrataError::Config(
                "agents.request_timeout_ms must be greater than zero".into(),
            ));
        }
        for rule in &self.policy.promotion {
            if rule.environment == rule.requires {
                return Err(StrataError::Config(format!(
                    "promotion rule for '{}' cannot require itself",
                    rule.environment
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_STRATA_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_STRATA_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
    }

    #[test]
    fn test_expand_env_vars_missing_is_kept() {
        let result = expand_env_vars("x = \"${STRATA_DEFINITELY_UNSET_VAR}\"");
        assert_eq!(result, "x = \"${STRATA_DEFINITELY_UNSET_VAR}\"");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.graph.backend, BackendKind::Memory);
        assert_eq!(config.bus.transport, TransportKind::InProcess);
        assert_eq!(config.agents.request_timeout_ms, 5_000);
        assert!(config.policy.allow_list);
        assert_eq!(config.policy.promotion.len(), 1);
        assert_eq!(config.policy.promotion[0].environment, "prod");
        assert_eq!(config.log.level, "strata=info,warn");
    }

    #[test]
    fn test_rejects_self_referential_promotion() {
        let err = AppConfig::parse(
            r#"
[[policy.promotion]]
environment = "prod"
requires = "prod"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = AppConfig::parse("[agents]\nrequest_timeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, StrataError::Config(_)));
    }

    #[test]
    fn test_only_memory_backend_is_ephemeral() {
        let mut graph = GraphConfig::default();
        assert!(!graph.is_persistent());
        graph.backend = BackendKind::File;
        assert!(graph.is_persistent());
        graph.backend = BackendKind::Sqlite;
        assert!(graph.is_persistent());
    }

    #[test]
    fn test_expand_home() {
        std::env::set_var("HOME", "/home/strata");
        assert_eq!(expand_home("~/graph.db"), PathBuf::from("/home/strata/graph.db"));
        assert_eq!(expand_home("/var/graph.db"), PathBuf::from("/var/graph.db"));
    }
}
