//! Closed set of observation events delivered inside OBS frames.
//!
//! Each variant serializes as a flat JSON object tagged by `type`, e.g.
//! `{"type":"ACTION_RESULT","t":12,"ref":"i1","ok":true}`.

use serde::{Deserialize, Serialize};

use crate::{ErrorCode, ItemStack};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    ActionResult(ActionResultEvent),
    TaskStart {
        t: u64,
        task_id: String,
        kind: String,
    },
    TaskDone {
        t: u64,
        task_id: String,
        kind: String,
    },
    TaskFail {
        t: u64,
        task_id: String,
        kind: String,
        code: ErrorCode,
        message: String,
    },
    Chat {
        t: u64,
        from: String,
        channel: String,
        text: String,
    },
    TradeOffer {
        t: u64,
        trade_id: String,
        from: String,
        offer: Vec<ItemStack>,
        request: Vec<ItemStack>,
    },
    TradeDone {
        t: u64,
        trade_id: String,
        with: String,
    },
    TradeDeclined {
        t: u64,
        trade_id: String,
        by: String,
    },
    Container {
        t: u64,
        container_id: String,
        container_type: String,
        pos: [i32; 3],
        inventory: Vec<ItemStack>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reserved: Vec<ItemStack>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        owed: Vec<ItemStack>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        contracts: Vec<ContractSummary>,
    },
    Board {
        t: u64,
        board_id: String,
        posts: Vec<BoardPostView>,
    },
    BoardSearch {
        t: u64,
        board_id: String,
        query: String,
        total_posts: usize,
        results: Vec<BoardPostView>,
    },
    Sign {
        t: u64,
        sign_id: String,
        pos: [i32; 3],
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_by: Option<String>,
    },
    Switch {
        t: u64,
        switch_id: String,
        pos: [i32; 3],
        on: bool,
    },
    Damage {
        t: u64,
        kind: String,
        hp: i32,
    },
    Respawn {
        t: u64,
        reason: String,
        pos: [i32; 3],
        drop_pos: [i32; 3],
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        lost: Vec<ItemStack>,
    },
    AccessPass {
        t: u64,
        land_id: String,
        item: String,
        count: u32,
    },
    Fine {
        t: u64,
        land_id: String,
        item: String,
        count: u32,
        reason: String,
    },
    Contract {
        t: u64,
        kind: String,
        contract_id: String,
        state: String,
    },
    Law {
        t: u64,
        kind: String,
        law_id: String,
        land_id: String,
        template_id: String,
        title: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    WorldEvent {
        t: u64,
        event_id: String,
        title: String,
        ends_tick: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        center: Option<[i32; 3]>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        radius: Option<i32>,
    },
    Weather {
        t: u64,
        weather: String,
        until_tick: u64,
    },
    WorldResetNotice {
        t: u64,
        world_id: String,
        reset_tick: u64,
    },
    WorldReset {
        t: u64,
        world_id: String,
        reason: String,
    },
    Maintenance {
        t: u64,
        land_id: String,
        paid: bool,
        stage: u8,
        next_due_tick: u64,
    },
    Fun {
        t: u64,
        dim: String,
        delta: i64,
        total: i64,
        reason: String,
    },
    StructureAward {
        t: u64,
        structure_id: String,
        points: i64,
    },
    Whisper {
        t: u64,
        from: String,
        text: String,
    },
}

impl Event {
    pub fn tick(&self) -> u64 {
        match self {
            Event::ActionResult(result) => result.t,
            Event::TaskStart { t, .. }
            | Event::TaskDone { t, .. }
            | Event::TaskFail { t, .. }
            | Event::Chat { t, .. }
            | Event::TradeOffer { t, .. }
            | Event::TradeDone { t, .. }
            | Event::TradeDeclined { t, .. }
            | Event::Container { t, .. }
            | Event::Board { t, .. }
            | Event::BoardSearch { t, .. }
            | Event::Sign { t, .. }
            | Event::Switch { t, .. }
            | Event::Damage { t, .. }
            | Event::Respawn { t, .. }
            | Event::AccessPass { t, .. }
            | Event::Fine { t, .. }
            | Event::Contract { t, .. }
            | Event::Law { t, .. }
            | Event::WorldEvent { t, .. }
            | Event::Weather { t, .. }
            | Event::WorldResetNotice { t, .. }
            | Event::WorldReset { t, .. }
            | Event::Maintenance { t, .. }
            | Event::Fun { t, .. }
            | Event::StructureAward { t, .. }
            | Event::Whisper { t, .. } => *t,
        }
    }

    pub fn ok(t: u64, reference: impl Into<String>) -> Self {
        Event::ActionResult(ActionResultEvent::ok(t, reference))
    }

    pub fn err(t: u64, reference: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Event::ActionResult(ActionResultEvent::err(t, reference, code, message))
    }

    pub fn as_action_result(&self) -> Option<&ActionResultEvent> {
        match self {
            Event::ActionResult(result) => Some(result),
            _ => None,
        }
    }
}

/// Outcome of one instant or task submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActionResultEvent {
    pub t: u64,
    #[serde(rename = "ref")]
    pub reference: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub land_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub law_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_ticks: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until_tick: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_entry_id: Option<String>,
}

impl ActionResultEvent {
    pub fn ok(t: u64, reference: impl Into<String>) -> Self {
        Self {
            t,
            reference: reference.into(),
            ok: true,
            ..Self::default()
        }
    }

    pub fn err(t: u64, reference: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            t,
            reference: reference.into(),
            ok: false,
            code: Some(code),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardPostView {
    pub post_id: String,
    pub author: String,
    pub title: String,
    pub summary: String,
    pub tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContractSummary {
    pub contract_id: String,
    pub kind: String,
    pub state: String,
    pub poster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptor: Option<String>,
    pub requirements: Vec<ItemStack>,
    pub reward: Vec<ItemStack>,
    pub deadline_tick: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_result_serializes_flat_with_ref() {
        let mut result = ActionResultEvent::err(7, "i1", ErrorCode::RateLimit, "rate limited");
        result.cooldown_ticks = Some(12);
        let value = serde_json::to_value(Event::ActionResult(result)).expect("serialize");
        assert_eq!(value["type"], "ACTION_RESULT");
        assert_eq!(value["ref"], "i1");
        assert_eq!(value["code"], "E_RATE_LIMIT");
        assert_eq!(value["cooldown_ticks"], 12);
        assert!(value.get("task_id").is_none());
    }

    #[test]
    fn tagged_events_parse_back() {
        let raw = r#"{"type":"TRADE_DONE","t":4,"trade_id":"TR000001","with":"A000002"}"#;
        let event: Event = serde_json::from_str(raw).expect("parse");
        assert_eq!(event.tick(), 4);
        assert!(matches!(event, Event::TradeDone { ref with, .. } if with == "A000002"));

        let respawn = Event::Respawn {
            t: 9,
            reason: "STARVATION".into(),
            pos: [0, 0, 0],
            drop_pos: [3, 0, 1],
            lost: Vec::new(),
        };
        let value = serde_json::to_value(&respawn).expect("serialize");
        assert_eq!(value["type"], "RESPAWN");
        let back: Event = serde_json::from_value(value).expect("parse");
        assert_eq!(back, respawn);
    }
}
