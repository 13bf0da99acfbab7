//! Handshake, catalog, acknowledgement, and event refetch messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::Event;
use crate::{ErrorCode, MessageType, CHUNK_SIZE, PROTOCOL_VERSION_LATEST};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HelloMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_versions: Vec<String>,
    pub agent_name: String,
    #[serde(default)]
    pub capabilities: HelloCapabilities,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_preference: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloCapabilities {
    #[serde(default)]
    pub delta_voxels: bool,
    #[serde(default)]
    pub ack_required: bool,
    #[serde(default)]
    pub event_cursor: bool,
    #[serde(default)]
    pub max_queue: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permits: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WelcomeMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub agent_id: String,
    pub resume_token: String,
    pub world_params: WorldParams,
    pub current_world_id: String,
    #[serde(default)]
    pub world_manifest: Vec<WorldRef>,
    pub catalogs: CatalogDigests,
    pub server_capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldParams {
    pub tick_rate_hz: u32,
    pub chunk_size: [i32; 3],
    pub height: i32,
    pub obs_radius: i32,
    pub day_ticks: u64,
    pub seed: i64,
}

impl WorldParams {
    pub fn new(tick_rate_hz: u32, height: i32, obs_radius: i32, day_ticks: u64, seed: i64) -> Self {
        Self {
            tick_rate_hz,
            chunk_size: CHUNK_SIZE,
            height,
            obs_radius,
            day_ticks,
            seed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldRef {
    pub world_id: String,
    pub world_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point_id: Option<String>,
    pub switch_cooldown_ticks: u64,
    pub reset_every_ticks: u64,
    pub reset_notice_ticks: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DigestRef {
    pub digest: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogDigests {
    pub block_palette: DigestRef,
    pub item_palette: DigestRef,
    pub recipes: DigestRef,
    pub blueprints: DigestRef,
    pub law_templates: DigestRef,
    pub events: DigestRef,
    pub tuning: DigestRef,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub ack: bool,
    pub event_batch: bool,
    pub idempotency: bool,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            ack: true,
            event_batch: true,
            idempotency: true,
        }
    }
}

/// One catalog section, split into parts when large.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub name: String,
    pub digest: String,
    pub part: u32,
    pub total_parts: u32,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub ack_for: String,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub world_id: String,
    pub tick: u64,
}

impl AckMsg {
    pub fn accepted(ack_for: impl Into<String>, world_id: impl Into<String>, tick: u64) -> Self {
        Self {
            msg_type: MessageType::Ack,
            protocol_version: PROTOCOL_VERSION_LATEST.to_string(),
            ack_for: ack_for.into(),
            accepted: true,
            code: None,
            message: None,
            world_id: world_id.into(),
            tick,
        }
    }

    pub fn rejected(
        ack_for: impl Into<String>,
        world_id: impl Into<String>,
        tick: u64,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            accepted: false,
            code: Some(code),
            message: Some(message.into()),
            ..Self::accepted(ack_for, world_id, tick)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventBatchReqMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub since_cursor: u64,
    #[serde(default)]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventBatchMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub events: Vec<Event>,
    pub next_cursor: u64,
    /// True when the requested cursor was older than the retained history.
    #[serde(default)]
    pub gap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_defaults_missing_capabilities() {
        let raw = r#"{"type":"HELLO","protocol_version":"1.0","agent_name":"bot"}"#;
        let hello: HelloMsg = serde_json::from_str(raw).expect("hello parses");
        assert_eq!(hello.capabilities, HelloCapabilities::default());
        assert!(hello.supported_versions.is_empty());
        assert!(hello.world_preference.is_none());
    }

    #[test]
    fn rejected_ack_keeps_identity_fields() {
        let ack = AckMsg::rejected("act-1", "OVERWORLD", 5, ErrorCode::Stale, "stale tick");
        assert!(!ack.accepted);
        assert_eq!(ack.ack_for, "act-1");
        let value = serde_json::to_value(&ack).expect("serialize");
        assert_eq!(value["type"], "ACK");
        assert_eq!(value["code"], "E_STALE");
    }
}
