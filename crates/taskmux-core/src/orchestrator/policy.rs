//! Delegation policy: which agent types may spawn which other agent types.

use std::collections::HashMap;

use crate::config::OrchestratorConfig;

/// Agent type granted to roles absent from the configured table.
///
/// New agent types added elsewhere must not silently gain unrestricted
/// delegation power, so unknown roles may spawn only this one.
pub const DEFAULT_SUBAGENT: &str = "explorer";

/// Immutable role → allowed-roles lookup, built once at initialization.
#[derive(Debug, Clone)]
pub struct DelegationPolicy {
    table: HashMap<String, Vec<String>>,
}

impl DelegationPolicy {
    /// Builds the policy from the configured agent table.
    ///
    /// Agents with `subagents: None` are left out of the table and fall
    /// through to the default roster.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let table = config
            .agents
            .iter()
            .filter_map(|(name, agent)| {
                agent
                    .subagents
                    .as_ref()
                    .map(|roster| (name.clone(), roster.clone()))
            })
            .collect();
        Self { table }
    }

    /// Returns the roster of agent types `role` may spawn.
    ///
    /// A configured empty roster means a leaf role that spawns nothing;
    /// an unconfigured role gets the single-element default.
    pub fn allowed_agents(&self, role: &str) -> Vec<String> {
        match self.table.get(role) {
            Some(roster) => roster.clone(),
            None => vec![DEFAULT_SUBAGENT.to_string()],
        }
    }

    /// Returns true if `role` may spawn `requested`.
    pub fn is_allowed(&self, role: &str, requested: &str) -> bool {
        match self.table.get(role) {
            Some(roster) => roster.iter().any(|allowed| allowed == requested),
            None => requested == DEFAULT_SUBAGENT,
        }
    }

    /// Returns true if `role` may spawn nothing at all.
    pub fn is_leaf(&self, role: &str) -> bool {
        self.table.get(role).is_some_and(Vec::is_empty)
    }
}
