//! Per-tick observation frame sent to each live agent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::{BoardPostView, Event};
use crate::{ItemStack, MessageType};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObsMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    pub tick: u64,
    pub agent_id: String,
    pub world_id: String,
    pub world: WorldObs,
    #[serde(rename = "self")]
    pub self_state: SelfObs,
    pub local_rules: LocalRulesObs,
    pub voxels: VoxelsObs,
    #[serde(default)]
    pub entities: Vec<EntityObs>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub events_truncated: bool,
    /// Cursor of the last event included in this frame.
    pub event_cursor: u64,
    #[serde(default)]
    pub tasks: Vec<TaskObs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_boards: Vec<BoardObs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fun_score: Option<FunScoreObs>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memory: Vec<MemoryKv>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorldObs {
    pub time_of_day: f64,
    pub day: u64,
    pub season: u64,
    pub season_day: u64,
    pub weather: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_event_ends_tick: Option<u64>,
    pub biome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelfObs {
    pub pos: [i32; 3],
    pub yaw: i32,
    pub hp: i32,
    pub hunger: i32,
    /// Stamina in `[0, 1]`.
    pub stamina: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status: Vec<String>,
    pub reputation: ReputationObs,
    #[serde(default)]
    pub inventory: Vec<ItemStack>,
    pub equipment: EquipmentObs,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ReputationObs {
    pub trade: f64,
    pub build: f64,
    pub social: f64,
    pub law: f64,
    pub danger: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EquipmentObs {
    pub main_hand: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalRulesObs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    /// WILD, OWNER, MEMBER, or VISITOR.
    pub role: String,
    pub permissions: BTreeMap<String, bool>,
    pub tax: f64,
    #[serde(default)]
    pub maintenance_stage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintenance_due_tick: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoxelsObs {
    pub center: [i32; 3],
    pub radius: i32,
    /// `RLE` carries `data`; `DELTA` carries `ops` relative to the previous frame.
    pub encoding: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<[u32; 2]>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ops: Vec<VoxelDeltaOp>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoxelDeltaOp {
    pub d: [i32; 3],
    pub b: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityObs {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub pos: [i32; 3],
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskObs {
    pub task_id: String,
    pub kind: String,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ticks: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardObs {
    pub board_id: String,
    pub pos: [i32; 3],
    pub top_posts: Vec<BoardPostView>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunScoreObs {
    pub novelty: i64,
    pub creation: i64,
    pub social: i64,
    pub influence: i64,
    pub narrative: i64,
    pub risk_rescue: i64,
}

impl FunScoreObs {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryKv {
    pub key: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_tick: Option<u64>,
}
