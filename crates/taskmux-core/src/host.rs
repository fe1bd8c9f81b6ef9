//! Host runtime boundary.
//!
//! The orchestrator does not run models or persist sessions itself; it
//! delegates to an external host runtime through [`HostClient`] and consumes
//! the host's event stream as [`HostEvent`]s. Everything here is the wire
//! contract, nothing more.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::orchestrator::ModelRef;

/// Tool names that let an agent spawn or manage other agents.
///
/// Disabled wholesale for agents whose delegation roster is empty, so the
/// model is never offered an affordance policy forbids it from using.
pub const DELEGATION_TOOLS: &[&str] = &["task", "task_status", "task_cancel"];

/// Opaque identifier for a host-owned conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a session message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One typed part of a session message.
///
/// The orchestrator extracts text and reasoning parts; everything else the
/// host may attach (tool calls, attachments) deserializes as `Other` and is
/// ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
    #[serde(other)]
    Other,
}

/// A message in a host session, as returned by [`HostClient::list_messages`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

impl SessionMessage {
    pub fn new(role: MessageRole, parts: Vec<MessagePart>) -> Self {
        Self { role, parts }
    }
}

/// Tool-permission overrides handed to the host for a session.
///
/// Maps tool name to enabled flag; tools not listed keep the host's
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolPermissions(pub HashMap<String, bool>);

impl ToolPermissions {
    /// Permissions with every delegation-capable tool disabled.
    pub fn deny_delegation() -> Self {
        Self(
            DELEGATION_TOOLS
                .iter()
                .map(|tool| ((*tool).to_string(), false))
                .collect(),
        )
    }

    /// Returns whether a tool is explicitly disabled.
    pub fn is_denied(&self, tool: &str) -> bool {
        self.0.get(tool) == Some(&false)
    }
}

/// A prompt delivered to a host session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    /// Agent type the session should execute as.
    pub agent: String,
    /// Message parts making up the prompt.
    pub parts: Vec<MessagePart>,
    /// Tool-permission overrides for this session.
    #[serde(default)]
    pub tools: ToolPermissions,
    /// Optional model override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    /// Optional behavioral variant understood by the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl PromptRequest {
    /// A plain-text prompt for the given agent type.
    pub fn text(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            parts: vec![MessagePart::Text { text: text.into() }],
            tools: ToolPermissions::default(),
            model: None,
            variant: None,
        }
    }
}

/// Status tag carried by a host session-status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// The session has no work in flight; a tracked task may be complete.
    Idle,
    Busy,
    Error,
}

/// Inbound events from the host runtime.
///
/// Events for sessions the orchestrator does not track are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    SessionStatus {
        session_id: SessionId,
        status: SessionStatus,
    },
    SessionDeleted {
        session_id: SessionId,
    },
}

/// The host runtime's session API.
///
/// All operations are asynchronous and fallible; the orchestrator treats
/// them as I/O leaves.
#[async_trait]
pub trait HostClient: Send + Sync {
    /// Creates a new session scoped as a child of `parent`.
    async fn create_session(&self, parent: &SessionId) -> anyhow::Result<SessionId>;

    /// Sends a prompt to a session.
    async fn send_prompt(&self, session: &SessionId, request: PromptRequest)
    -> anyhow::Result<()>;

    /// Aborts a session.
    async fn abort_session(&self, session: &SessionId) -> anyhow::Result<()>;

    /// Lists all messages in a session, in order.
    async fn list_messages(&self, session: &SessionId) -> anyhow::Result<Vec<SessionMessage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_delegation_disables_all_delegation_tools() {
        let tools = ToolPermissions::deny_delegation();
        for tool in DELEGATION_TOOLS {
            assert!(tools.is_denied(tool), "{tool} should be denied");
        }
        assert!(!tools.is_denied("bash"));
    }

    #[test]
    fn unknown_message_part_deserializes_as_other() {
        let part: MessagePart =
            serde_json::from_str(r#"{"type": "tool_call", "name": "bash"}"#).unwrap();
        assert_eq!(part, MessagePart::Other);
    }

    #[test]
    fn host_event_roundtrip() {
        let event = HostEvent::SessionStatus {
            session_id: SessionId::new("ses_1"),
            status: SessionStatus::Idle,
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: HostEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);

        let deleted: HostEvent =
            serde_json::from_str(r#"{"type":"session_deleted","session_id":"ses_2"}"#).unwrap();
        assert_eq!(
            deleted,
            HostEvent::SessionDeleted {
                session_id: SessionId::new("ses_2")
            }
        );
    }
}
