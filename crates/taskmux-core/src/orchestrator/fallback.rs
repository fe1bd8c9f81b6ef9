//! Model-identifier parsing and fallback-chain resolution.

use std::collections::HashMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, OrchestratorConfig};

/// A parsed `provider/model` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    /// Parses a `provider/model` identifier.
    ///
    /// # Errors
    /// Fails when the separator is missing, or at the start or end of the
    /// string.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((provider, model)) = trimmed.split_once('/') else {
            bail!("Invalid model identifier '{raw}': expected provider/model");
        };
        if provider.is_empty() || model.is_empty() {
            bail!("Invalid model identifier '{raw}': expected provider/model");
        }
        Ok(Self {
            provider: provider.to_string(),
            model: model.to_string(),
        })
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

impl TryFrom<String> for ModelRef {
    type Error = anyhow::Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::parse(&raw)
    }
}

impl From<ModelRef> for String {
    fn from(model: ModelRef) -> Self {
        model.to_string()
    }
}

/// Builds the ordered list of model identifiers to attempt for an agent.
#[derive(Debug, Clone)]
pub struct FallbackResolver {
    agents: HashMap<String, AgentConfig>,
}

impl FallbackResolver {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            agents: config.agents.clone(),
        }
    }

    /// Returns the primary model configured for an agent, if any.
    pub fn primary(&self, agent: &str) -> Option<String> {
        self.agents
            .get(agent)
            .and_then(|config| normalized(config.model.as_deref()))
    }

    /// Resolves the attempt chain for an agent: primary model first, then
    /// the configured fallback sequence, empty entries skipped,
    /// de-duplicated preserving first-seen order.
    ///
    /// Unparseable entries are kept: the lifecycle engine records them as
    /// per-attempt errors instead of failing resolution.
    pub fn resolve_chain(&self, agent: &str) -> Vec<String> {
        let Some(config) = self.agents.get(agent) else {
            return Vec::new();
        };

        let mut chain = Vec::new();
        let candidates = normalized(config.model.as_deref())
            .into_iter()
            .chain(
                config
                    .fallback
                    .iter()
                    .filter_map(|m| normalized(Some(m.as_str()))),
            );
        for candidate in candidates {
            if !chain.contains(&candidate) {
                chain.push(candidate);
            }
        }
        chain
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_and_model() {
        let model = ModelRef::parse("anthropic/claude-haiku-4-5").unwrap();
        assert_eq!(model.provider, "anthropic");
        assert_eq!(model.model, "claude-haiku-4-5");
        assert_eq!(model.to_string(), "anthropic/claude-haiku-4-5");
    }

    #[test]
    fn rejects_malformed_identifiers() {
        for raw in ["badmodel", "/model", "provider/", "/"] {
            let err = ModelRef::parse(raw).unwrap_err();
            assert!(
                err.to_string().contains("expected provider/model"),
                "unexpected error for {raw}: {err}"
            );
        }
    }

    #[test]
    fn extra_separators_belong_to_the_model() {
        let model = ModelRef::parse("openrouter/meta/llama-4").unwrap();
        assert_eq!(model.provider, "openrouter");
        assert_eq!(model.model, "meta/llama-4");
    }

    fn resolver(primary: Option<&str>, fallback: &[&str]) -> FallbackResolver {
        let mut config = OrchestratorConfig::default();
        config.agents.insert(
            "worker".to_string(),
            AgentConfig {
                model: primary.map(str::to_string),
                fallback: fallback.iter().map(|s| (*s).to_string()).collect(),
                subagents: None,
            },
        );
        FallbackResolver::from_config(&config)
    }

    #[test]
    fn chain_deduplicates_preserving_order() {
        let resolver = resolver(Some("p/a"), &["p/a", "q/b", "q/b"]);
        assert_eq!(resolver.resolve_chain("worker"), vec!["p/a", "q/b"]);
    }

    #[test]
    fn chain_skips_empty_entries() {
        let resolver = resolver(Some("p/a"), &["", "  ", "q/b"]);
        assert_eq!(resolver.resolve_chain("worker"), vec!["p/a", "q/b"]);
    }

    #[test]
    fn chain_without_primary_uses_fallbacks_only() {
        let resolver = resolver(None, &["q/b"]);
        assert_eq!(resolver.resolve_chain("worker"), vec!["q/b"]);
        assert_eq!(resolver.primary("worker"), None);
    }

    #[test]
    fn unknown_agent_resolves_to_empty_chain() {
        let resolver = resolver(Some("p/a"), &[]);
        assert!(resolver.resolve_chain("missing").is_empty());
    }
}
