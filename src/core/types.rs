use serde::{Deserialize, Serialize};
use std::fmt;

// ───────────────────────────────────────────────────────────────────────────
// Instance identity
// ───────────────────────────────────────────────────────────────────────────

/// Opaque handle for one open player page, as assigned by the host runtime
/// (for the CDP host this is the Chromium target id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Agent wire contract
//
// Every message an agent mailbox accepts, and every reply shape it produces.
// The serde encoding matches the documented JSON contract exactly:
//   {"action":"ping"} / {"action":"setEnabled","enabled":true} / …
// ───────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum AgentRequest {
    /// Presence probe. Answered even while dismissal is disabled.
    #[serde(rename = "ping")]
    Ping,
    /// Read the agent's current replica of the enabled flag.
    #[serde(rename = "getStatus")]
    GetStatus,
    /// Overwrite the replica (and persist it). Sent by coordinator fan-out.
    #[serde(rename = "setEnabled")]
    SetEnabled { enabled: bool },
    /// Flip the replica locally. Degraded fallback when the store is unusable.
    #[serde(rename = "toggle")]
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentReply {
    Pong { pong: bool },
    Status { enabled: bool },
}

impl AgentReply {
    /// The enabled flag carried by a `Status` reply, if this is one.
    pub fn enabled(&self) -> Option<bool> {
        match self {
            AgentReply::Status { enabled } => Some(*enabled),
            AgentReply::Pong { .. } => None,
        }
    }
}

// ───────────────────────────────────────────────────────────────────────────
// Store change notifications
// ───────────────────────────────────────────────────────────────────────────

/// One committed change to a persisted key, broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub key: String,
    /// `None` when the key had never been written before this change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<bool>,
    pub new_value: bool,
}

// ───────────────────────────────────────────────────────────────────────────
// Control API payloads (HTTP surface + CLI client)
// ───────────────────────────────────────────────────────────────────────────

/// Body accepted by POST /toggle and POST /ensure. `from` is a provenance
/// marker ("popup", "cli", …) used only for logging.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub from: Option<String>,
}

/// Where a reported enabled value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusSource {
    /// Canonical value read from the shared store.
    Store,
    /// Reconciled against a live page agent (the agent's answer wins).
    Agent,
}

/// Per-instance presence snapshot included in a status view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceReport {
    pub instance: InstanceId,
    /// The agent's replica, or `None` when no agent answered the probe.
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub enabled: bool,
    pub source: StatusSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceReport>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

/// Outcome of one ensure pass over all enumerable instances.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EnsureReport {
    /// Instances enumerated this pass.
    pub instances: usize,
    /// Instances that needed a fresh agent injection.
    pub injected: usize,
    /// Instances that stayed unreachable even after injection.
    pub unreachable: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnsureResponse {
    pub ok: bool,
    #[serde(flatten)]
    pub report: EnsureReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The serialized form is the documented wire contract; a drifting tag or
    /// field name would silently break any out-of-process peer.
    #[test]
    fn agent_request_wire_shapes() {
        assert_eq!(
            serde_json::to_value(AgentRequest::Ping).unwrap(),
            serde_json::json!({"action": "ping"})
        );
        assert_eq!(
            serde_json::to_value(AgentRequest::GetStatus).unwrap(),
            serde_json::json!({"action": "getStatus"})
        );
        assert_eq!(
            serde_json::to_value(AgentRequest::SetEnabled { enabled: false }).unwrap(),
            serde_json::json!({"action": "setEnabled", "enabled": false})
        );
        assert_eq!(
            serde_json::to_value(AgentRequest::Toggle).unwrap(),
            serde_json::json!({"action": "toggle"})
        );
    }

    #[test]
    fn agent_reply_shapes_disambiguate() {
        let pong: AgentReply = serde_json::from_str(r#"{"pong":true}"#).unwrap();
        assert_eq!(pong, AgentReply::Pong { pong: true });
        assert_eq!(pong.enabled(), None);

        let status: AgentReply = serde_json::from_str(r#"{"enabled":false}"#).unwrap();
        assert_eq!(status.enabled(), Some(false));
    }
}
