//! Append-only records: one [`TickLogEntry`] per tick for replay, and
//! [`AuditEntry`] rows for every effect-bearing action.

use contracts::ActMsg;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{AgentTransfer, OrgMeta};

pub const AUDIT_SET_BLOCK: &str = "SET_BLOCK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub tick: u64,
    pub seq: u64,
    pub action: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinSpec {
    pub name: String,
    #[serde(default)]
    pub delta_voxels: bool,
}

impl JoinSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delta_voxels: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionEnvelope {
    pub agent_id: String,
    pub act: ActMsg,
}

/// State changes applied between ticks; replay re-applies them before the step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalOp {
    TransferIn { transfer: Box<AgentTransfer> },
    TransferOut { agent_id: String },
    UpsertOrgMeta { metas: Vec<OrgMeta> },
    ResetWorld { reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TickLogEntry {
    pub tick: u64,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub leaves: Vec<String>,
    #[serde(default)]
    pub actions: Vec<ActionEnvelope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external: Vec<ExternalOp>,
    pub digest: String,
}

impl TickLogEntry {
    /// JSON line with lexicographically sorted keys.
    pub fn to_sorted_line(&self) -> Result<String, serde_json::Error> {
        sorted_json_line(self)
    }
}

impl AuditEntry {
    pub fn to_sorted_line(&self) -> Result<String, serde_json::Error> {
        sorted_json_line(self)
    }
}

/// `serde_json::Value` maps are ordered, so a round trip through `Value` sorts keys.
pub fn sorted_json_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_log_lines_sort_keys_and_parse_back() {
        let entry = TickLogEntry {
            tick: 3,
            joins: vec![JoinSpec::new("bot")],
            leaves: Vec::new(),
            actions: vec![ActionEnvelope {
                agent_id: "A000001".into(),
                act: ActMsg::new("A000001", 3),
            }],
            external: vec![ExternalOp::TransferOut {
                agent_id: "A000002".into(),
            }],
            digest: "ab".into(),
        };
        let line = entry.to_sorted_line().expect("line");
        let actions_at = line.find("\"actions\"").expect("actions key");
        let digest_at = line.find("\"digest\"").expect("digest key");
        let tick_at = line.rfind("\"tick\"").expect("tick key");
        assert!(actions_at < digest_at && digest_at < tick_at);
        assert!(line.contains("\"op\":\"TRANSFER_OUT\""));
        let back: TickLogEntry = serde_json::from_str(&line).expect("parse");
        assert_eq!(back, entry);
    }
}
