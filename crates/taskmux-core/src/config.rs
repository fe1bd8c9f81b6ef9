//! Configuration for the task orchestrator.
//!
//! Loads configuration from a TOML file with sensible defaults.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Per-agent configuration: which model it runs on, which models to fall
/// back to, and which agent types it may spawn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Primary model identifier (`provider/model`).
    pub model: Option<String>,
    /// Ordered fallback chain attempted after the primary model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<String>,
    /// Agent types this agent may spawn.
    ///
    /// `None` means "not configured": the delegation policy substitutes its
    /// default roster. `Some(vec![])` is a leaf agent that may spawn nothing.
    pub subagents: Option<Vec<String>>,
}

/// Main orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of task starts admitted concurrently.
    ///
    /// Bounds concurrent start sequences, not concurrent running tasks: a
    /// task that has finished starting no longer counts against the ceiling.
    pub max_concurrent: usize,

    /// Whether model fallback is enabled.
    ///
    /// When disabled, only the primary model is attempted and the per-attempt
    /// timeout is skipped entirely.
    pub fallback_enabled: bool,

    /// Timeout for a single fallback prompt attempt in seconds (0 disables).
    pub attempt_timeout_secs: u64,

    /// Delay after session creation in milliseconds (0 disables).
    ///
    /// Gives an external pane-visualization collaborator time to observe the
    /// new session before the first prompt arrives. Scheduling courtesy only.
    pub pane_delay_ms: u64,

    /// Agent type assumed for sessions the orchestrator did not create.
    pub root_agent: String,

    /// Per-agent configuration keyed by agent type.
    pub agents: HashMap<String, AgentConfig>,
}

impl OrchestratorConfig {
    const DEFAULT_MAX_CONCURRENT: usize = 3;
    const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 60;
    const DEFAULT_ROOT_AGENT: &str = "build";

    /// Loads configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(OrchestratorConfig::default())
        }
    }

    /// Returns the per-attempt timeout, or `None` when timeouts are disabled.
    ///
    /// Attempts are unbounded when fallback is disabled: with no further
    /// candidate to advance to, a timeout would add nothing.
    pub fn attempt_timeout(&self) -> Option<Duration> {
        if !self.fallback_enabled || self.attempt_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.attempt_timeout_secs))
        }
    }

    /// Returns the pane-visualization delay, or `None` when disabled.
    pub fn pane_delay(&self) -> Option<Duration> {
        if self.pane_delay_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.pane_delay_ms))
        }
    }

    /// Returns the configuration for an agent type, if present.
    pub fn agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.get(name)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: Self::DEFAULT_MAX_CONCURRENT,
            fallback_enabled: true,
            attempt_timeout_secs: Self::DEFAULT_ATTEMPT_TIMEOUT_SECS,
            pane_delay_ms: 0,
            root_agent: Self::DEFAULT_ROOT_AGENT.to_string(),
            agents: default_agents(),
        }
    }
}

/// Built-in agent table used when no config file overrides it.
fn default_agents() -> HashMap<String, AgentConfig> {
    HashMap::from([
        (
            "build".to_string(),
            AgentConfig {
                model: Some("anthropic/claude-sonnet-4-5".to_string()),
                fallback: vec!["openai/gpt-5.2".to_string()],
                subagents: Some(vec![
                    "explorer".to_string(),
                    "plan".to_string(),
                    "reviewer".to_string(),
                ]),
            },
        ),
        (
            "plan".to_string(),
            AgentConfig {
                model: Some("anthropic/claude-sonnet-4-5".to_string()),
                fallback: Vec::new(),
                subagents: Some(vec!["explorer".to_string()]),
            },
        ),
        (
            "explorer".to_string(),
            AgentConfig {
                model: Some("anthropic/claude-haiku-4-5".to_string()),
                fallback: Vec::new(),
                // Leaf agent: spawns nothing.
                subagents: Some(Vec::new()),
            },
        ),
    ])
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let temp = TempDir::new().unwrap();
        let config = OrchestratorConfig::load_from(&temp.path().join("missing.toml")).unwrap();

        assert_eq!(config.max_concurrent, 3);
        assert!(config.fallback_enabled);
        assert_eq!(config.root_agent, "build");
        assert!(config.agents.contains_key("explorer"));
    }

    #[test]
    fn loads_partial_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            r#"
max_concurrent = 8
fallback_enabled = false

[agents.researcher]
model = "anthropic/claude-sonnet-4-5"
fallback = ["openai/gpt-5.2"]
subagents = []
"#,
        )
        .unwrap();

        let config = OrchestratorConfig::load_from(&path).unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert!(!config.fallback_enabled);
        // Unset fields keep their defaults.
        assert_eq!(config.attempt_timeout_secs, 60);

        let researcher = config.agent("researcher").unwrap();
        assert_eq!(researcher.subagents, Some(Vec::new()));
        assert_eq!(researcher.fallback, vec!["openai/gpt-5.2"]);
    }

    #[test]
    fn attempt_timeout_skipped_when_fallback_disabled() {
        let config = OrchestratorConfig {
            fallback_enabled: false,
            attempt_timeout_secs: 60,
            ..OrchestratorConfig::default()
        };
        assert_eq!(config.attempt_timeout(), None);

        let config = OrchestratorConfig::default();
        assert_eq!(config.attempt_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "max_concurrent = \"three\"").unwrap();

        assert!(OrchestratorConfig::load_from(&path).is_err());
    }
}
