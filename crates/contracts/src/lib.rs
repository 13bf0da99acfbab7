//! Wire contracts shared by the world kernel, runtimes, manager, and operator tools.
//!
//! Every message is a JSON object carrying `type` and `protocol_version`.
//! Observation events form a closed variant set (see [`events::Event`]) so
//! handlers stay type-safe while the JSON shape stays stable.

pub mod act;
pub mod events;
pub mod messages;
pub mod obs;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub use act::{ActMsg, InstantKind, InstantReq, ItemPair, TaskKind, TaskReq};
pub use events::{ActionResultEvent, BoardPostView, ContractSummary, Event};
pub use messages::{
    AckMsg, CatalogDigests, CatalogMsg, DigestRef, EventBatchMsg, EventBatchReqMsg, HelloAuth,
    HelloCapabilities, HelloMsg, ServerCapabilities, WelcomeMsg, WorldParams, WorldRef,
};
pub use obs::{
    BoardObs, EntityObs, EquipmentObs, FunScoreObs, LocalRulesObs, MemoryKv, ObsMsg,
    ReputationObs, SelfObs, TaskObs, VoxelDeltaOp, VoxelsObs, WorldObs,
};

/// Protocol versions this server speaks, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 3] = ["0.9", "1.0", "1.1"];
pub const PROTOCOL_VERSION_LATEST: &str = "1.1";

/// Chunks are 16x16 columns, one voxel layer per y.
pub const CHUNK_SIZE: [i32; 3] = [16, 16, 1];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Hello,
    Welcome,
    Catalog,
    Obs,
    Act,
    Ack,
    EventBatchReq,
    EventBatch,
}

/// Picks the highest version both sides speak.
///
/// `offered` lists the client's versions; an empty list means the client only
/// speaks `primary`.
pub fn negotiate_protocol_version(primary: &str, offered: &[String]) -> Option<&'static str> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .rev()
        .find(|candidate| {
            primary.trim() == **candidate || offered.iter().any(|v| v.trim() == **candidate)
        })
        .copied()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorCode {
    #[serde(rename = "E_PROTO_BAD_REQUEST")]
    ProtoBadRequest,
    #[serde(rename = "E_WORLD_BUSY")]
    WorldBusy,
    #[serde(rename = "E_WORLD_NOT_FOUND")]
    WorldNotFound,
    #[serde(rename = "E_WORLD_DENIED")]
    WorldDenied,
    #[serde(rename = "E_WORLD_COOLDOWN")]
    WorldCooldown,
    #[serde(rename = "E_BAD_REQUEST")]
    BadRequest,
    #[serde(rename = "E_NO_PERMISSION")]
    NoPermission,
    #[serde(rename = "E_NO_RESOURCE")]
    NoResource,
    #[serde(rename = "E_INVALID_TARGET")]
    InvalidTarget,
    #[serde(rename = "E_RATE_LIMIT")]
    RateLimit,
    #[serde(rename = "E_CONFLICT")]
    Conflict,
    #[serde(rename = "E_BLOCKED")]
    Blocked,
    #[serde(rename = "E_STALE")]
    Stale,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtoBadRequest => "E_PROTO_BAD_REQUEST",
            Self::WorldBusy => "E_WORLD_BUSY",
            Self::WorldNotFound => "E_WORLD_NOT_FOUND",
            Self::WorldDenied => "E_WORLD_DENIED",
            Self::WorldCooldown => "E_WORLD_COOLDOWN",
            Self::BadRequest => "E_BAD_REQUEST",
            Self::NoPermission => "E_NO_PERMISSION",
            Self::NoResource => "E_NO_RESOURCE",
            Self::InvalidTarget => "E_INVALID_TARGET",
            Self::RateLimit => "E_RATE_LIMIT",
            Self::Conflict => "E_CONFLICT",
            Self::Blocked => "E_BLOCKED",
            Self::Stale => "E_STALE",
            Self::Internal => "E_INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ItemStack {
    pub item: String,
    pub count: u32,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
        }
    }
}

/// Flattens an inventory map into stacks sorted by item id, skipping empty counts.
pub fn stacks_from_map(items: &BTreeMap<String, u32>) -> Vec<ItemStack> {
    items
        .iter()
        .filter(|(_, count)| **count > 0)
        .map(|(item, count)| ItemStack::new(item.clone(), *count))
        .collect()
}

/// Sums stacks into a map; duplicate items accumulate.
pub fn map_from_stacks(stacks: &[ItemStack]) -> BTreeMap<String, u32> {
    let mut out = BTreeMap::new();
    for stack in stacks {
        if stack.item.trim().is_empty() || stack.count == 0 {
            continue;
        }
        *out.entry(stack.item.clone()).or_insert(0) += stack.count;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_prefers_newest_common_version() {
        assert_eq!(
            negotiate_protocol_version("1.0", &["0.9".to_string(), "1.1".to_string()]),
            Some("1.1")
        );
        assert_eq!(negotiate_protocol_version("1.0", &[]), Some("1.0"));
        assert_eq!(negotiate_protocol_version("2.0", &[]), None);
    }

    #[test]
    fn error_codes_serialize_as_wire_strings() {
        let raw = serde_json::to_string(&ErrorCode::WorldDenied).expect("serialize");
        assert_eq!(raw, "\"E_WORLD_DENIED\"");
        let parsed: ErrorCode = serde_json::from_str("\"E_RATE_LIMIT\"").expect("parse");
        assert_eq!(parsed, ErrorCode::RateLimit);
        assert_eq!(ErrorCode::Stale.to_string(), "E_STALE");
    }

    #[test]
    fn stacks_round_trip_through_maps_sorted() {
        let stacks = vec![
            ItemStack::new("STONE", 2),
            ItemStack::new("COAL", 1),
            ItemStack::new("STONE", 3),
            ItemStack::new("AIR", 0),
        ];
        let map = map_from_stacks(&stacks);
        assert_eq!(map.get("STONE"), Some(&5));
        let back = stacks_from_map(&map);
        assert_eq!(
            back,
            vec![ItemStack::new("COAL", 1), ItemStack::new("STONE", 5)]
        );
    }
}
