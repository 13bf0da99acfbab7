//! Client action bundles: instants apply immediately, tasks run across ticks.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::MessageType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActMsg {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    pub protocol_version: String,
    /// Client-generated idempotency key for the whole bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act_id: Option<String>,
    pub tick: u64,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_world_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instants: Vec<InstantReq>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskReq>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cancel: Vec<String>,
}

impl ActMsg {
    pub fn new(agent_id: impl Into<String>, tick: u64) -> Self {
        Self {
            msg_type: MessageType::Act,
            protocol_version: crate::PROTOCOL_VERSION_LATEST.to_string(),
            act_id: None,
            tick,
            agent_id: agent_id.into(),
            expected_world_id: None,
            instants: Vec::new(),
            tasks: Vec::new(),
            cancel: Vec::new(),
        }
    }

    pub fn with_instant(mut self, instant: InstantReq) -> Self {
        self.instants.push(instant);
        self
    }

    pub fn with_task(mut self, task: TaskReq) -> Self {
        self.tasks.push(task);
        self
    }
}

/// `[item_id, count]` pair as sent in trade and contract payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemPair(pub String, pub i64);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstantReq {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub offer: Vec<ItemPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request: Vec<ItemPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<ItemPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reward: Vec<ItemPair>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposit: Vec<ItemPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ticks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<BTreeMap<String, bool>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub law_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ticks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_world_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_entry_id: Option<String>,
}

impl InstantReq {
    pub fn new(id: impl Into<String>, kind: InstantKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskReq {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_pos: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<[i32; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<i32>,
}

impl TaskReq {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind: kind.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn move_to(id: impl Into<String>, target: [i32; 3], tolerance: f64) -> Self {
        Self {
            target: Some(target),
            tolerance: Some(tolerance),
            ..Self::new(id, TaskKind::MoveTo)
        }
    }
}

macro_rules! wire_kinds {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match raw.trim() {
                    $($wire => Some($name::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

wire_kinds!(InstantKind {
    Say => "SAY",
    Whisper => "WHISPER",
    PostBoard => "POST_BOARD",
    SearchBoard => "SEARCH_BOARD",
    SetSign => "SET_SIGN",
    ToggleSwitch => "TOGGLE_SWITCH",
    Open => "OPEN",
    OfferTrade => "OFFER_TRADE",
    AcceptTrade => "ACCEPT_TRADE",
    DeclineTrade => "DECLINE_TRADE",
    Eat => "EAT",
    PostContract => "POST_CONTRACT",
    AcceptContract => "ACCEPT_CONTRACT",
    SubmitContract => "SUBMIT_CONTRACT",
    ClaimOwed => "CLAIM_OWED",
    AddMember => "ADD_MEMBER",
    RemoveMember => "REMOVE_MEMBER",
    DeedLand => "DEED_LAND",
    UpgradeClaim => "UPGRADE_CLAIM",
    SetPolicy => "SET_POLICY",
    ProposeLaw => "PROPOSE_LAW",
    Vote => "VOTE",
    CreateOrg => "CREATE_ORG",
    JoinOrg => "JOIN_ORG",
    LeaveOrg => "LEAVE_ORG",
    OrgDeposit => "ORG_DEPOSIT",
    OrgWithdraw => "ORG_WITHDRAW",
    SaveMemory => "SAVE_MEMORY",
    ListMemory => "LIST_MEMORY",
    SwitchWorld => "SWITCH_WORLD",
});

wire_kinds!(TaskKind {
    MoveTo => "MOVE_TO",
    Follow => "FOLLOW",
    Mine => "MINE",
    Place => "PLACE",
    Craft => "CRAFT",
    Smelt => "SMELT",
    BuildBlueprint => "BUILD_BLUEPRINT",
    Transfer => "TRANSFER",
    Open => "OPEN",
    Gather => "GATHER",
    ClaimLand => "CLAIM_LAND",
});

impl InstantKind {
    /// Instants that mutate org membership or treasury and so trigger a metadata refresh.
    pub fn mutates_org(self) -> bool {
        matches!(
            self,
            Self::CreateOrg | Self::JoinOrg | Self::LeaveOrg | Self::OrgDeposit | Self::OrgWithdraw
        )
    }
}

impl TaskKind {
    /// Movement tasks occupy the move slot; everything else occupies the work slot.
    pub fn is_movement(self) -> bool {
        matches!(self, Self::MoveTo | Self::Follow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_their_own_wire_names() {
        for kind in InstantKind::ALL {
            assert_eq!(InstantKind::parse(kind.as_str()), Some(*kind));
        }
        for kind in TaskKind::ALL {
            assert_eq!(TaskKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(InstantKind::parse("DANCE"), None);
    }

    #[test]
    fn act_parses_minimal_json_with_pairs() {
        let raw = r#"{
            "type": "ACT",
            "protocol_version": "1.1",
            "tick": 3,
            "agent_id": "A000001",
            "instants": [
                {"id": "i1", "type": "OFFER_TRADE", "to": "A000002",
                 "offer": [["PLANK", 10]], "request": [["COAL", 2]]}
            ],
            "tasks": [
                {"id": "t1", "type": "MOVE_TO", "target": [10, 0, -10], "tolerance": 1.2}
            ]
        }"#;
        let act: ActMsg = serde_json::from_str(raw).expect("act parses");
        assert_eq!(act.msg_type, MessageType::Act);
        assert_eq!(act.instants[0].offer, vec![ItemPair("PLANK".into(), 10)]);
        assert_eq!(act.tasks[0].target, Some([10, 0, -10]));
        assert!(act.cancel.is_empty());
    }
}
