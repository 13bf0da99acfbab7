//! Entity tables owned by a world. Relations are string ids resolved at use time.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geom::Vec3;

pub type Inventory = BTreeMap<String, u32>;

pub const HP_MAX: i32 = 20;
pub const HUNGER_MAX: i32 = 20;
pub const STAMINA_MAX: i32 = 1000;
pub const REP_MAX: i32 = 1000;
pub const REP_DEFAULT: i32 = 500;

/// Formats ids like `A000001`.
pub fn format_id(prefix: &str, n: u64) -> String {
    format!("{prefix}{n:06}")
}

/// Adds `count` of `item`; zero counts are ignored.
pub fn inv_add(inv: &mut Inventory, item: &str, count: u32) {
    if count == 0 || item.is_empty() {
        return;
    }
    *inv.entry(item.to_string()).or_insert(0) += count;
}

/// Removes `count` of `item`, dropping empty entries; false when short.
pub fn inv_take(inv: &mut Inventory, item: &str, count: u32) -> bool {
    let Some(have) = inv.get_mut(item) else {
        return count == 0;
    };
    if *have < count {
        return false;
    }
    *have -= count;
    if *have == 0 {
        inv.remove(item);
    }
    true
}

pub fn inv_count(inv: &Inventory, item: &str) -> u32 {
    inv.get(item).copied().unwrap_or(0)
}

pub fn inv_has_all(inv: &Inventory, needs: &Inventory) -> bool {
    needs
        .iter()
        .all(|(item, count)| inv_count(inv, item) >= *count)
}

/// Takes every stack in `needs` or nothing.
pub fn inv_take_all(inv: &mut Inventory, needs: &Inventory) -> bool {
    if !inv_has_all(inv, needs) {
        return false;
    }
    for (item, count) in needs {
        inv_take(inv, item, *count);
    }
    true
}

pub fn inv_merge(inv: &mut Inventory, other: &Inventory) {
    for (item, count) in other {
        inv_add(inv, item, *count);
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunScore {
    pub novelty: i64,
    pub creation: i64,
    pub social: i64,
    pub influence: i64,
    pub narrative: i64,
    pub risk_rescue: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FunDim {
    Novelty,
    Creation,
    Social,
    Influence,
    Narrative,
    RiskRescue,
}

impl FunDim {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Novelty => "NOVELTY",
            Self::Creation => "CREATION",
            Self::Social => "SOCIAL",
            Self::Influence => "INFLUENCE",
            Self::Narrative => "NARRATIVE",
            Self::RiskRescue => "RISK_RESCUE",
        }
    }
}

impl FunScore {
    pub fn slot_mut(&mut self, dim: FunDim) -> &mut i64 {
        match dim {
            FunDim::Novelty => &mut self.novelty,
            FunDim::Creation => &mut self.creation,
            FunDim::Social => &mut self.social,
            FunDim::Influence => &mut self.influence,
            FunDim::Narrative => &mut self.narrative,
            FunDim::RiskRescue => &mut self.risk_rescue,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunDecayWindow {
    pub start_tick: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateWindow {
    pub start_tick: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryEntry {
    pub value: String,
    /// Zero means no expiry.
    pub expiry_tick: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MoveKind {
    MoveTo,
    Follow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveTask {
    pub task_id: String,
    pub kind: MoveKind,
    pub target: Vec3,
    /// Completion radius in XZ Manhattan tiles.
    pub tolerance: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    pub distance: i32,
    pub start_pos: Vec3,
    pub started_tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkKind {
    Mine {
        pos: Vec3,
    },
    Place {
        item_id: String,
        pos: Vec3,
        rotation: i32,
    },
    Craft {
        recipe_id: String,
        count: u32,
    },
    Smelt {
        recipe_id: String,
        item_id: String,
        count: u32,
    },
    Build {
        blueprint_id: String,
        anchor: Vec3,
        rotation: i32,
        next_index: usize,
        charged: bool,
    },
    Transfer {
        src: String,
        dst: String,
        item_id: String,
        count: u32,
    },
    Open {
        target_id: String,
    },
    Gather {
        target_id: String,
    },
    ClaimLand {
        anchor: Vec3,
        radius: i32,
    },
}

impl WorkKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Mine { .. } => "MINE",
            Self::Place { .. } => "PLACE",
            Self::Craft { .. } => "CRAFT",
            Self::Smelt { .. } => "SMELT",
            Self::Build { .. } => "BUILD_BLUEPRINT",
            Self::Transfer { .. } => "TRANSFER",
            Self::Open { .. } => "OPEN",
            Self::Gather { .. } => "GATHER",
            Self::ClaimLand { .. } => "CLAIM_LAND",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkTask {
    pub task_id: String,
    pub kind: WorkKind,
    pub started_tick: u64,
    pub work_ticks: u64,
    pub required: u64,
    /// Inputs taken at start and refunded on cancel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub consumed: Inventory,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub resume_token: String,
    pub pos: Vec3,
    pub yaw: i32,
    pub hp: i32,
    pub hunger: i32,
    pub stamina_milli: i32,
    pub work_fatigue: u64,
    pub rep_trade: i32,
    pub rep_build: i32,
    pub rep_social: i32,
    pub rep_law: i32,
    pub rep_danger: i32,
    pub fun: FunScore,
    #[serde(default)]
    pub fun_decay: BTreeMap<String, FunDecayWindow>,
    #[serde(default)]
    pub seen_biomes: BTreeSet<String>,
    #[serde(default)]
    pub seen_recipes: BTreeSet<String>,
    #[serde(default)]
    pub seen_events: BTreeSet<String>,
    pub inventory: Inventory,
    #[serde(default)]
    pub main_hand: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_task: Option<MoveTask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_task: Option<WorkTask>,
    #[serde(default)]
    pub rate_windows: BTreeMap<String, RateWindow>,
    #[serde(default)]
    pub memory: BTreeMap<String, MemoryEntry>,
    pub spawn_index: u64,
    #[serde(default)]
    pub world_switch_cooldown_until_tick: u64,
}

impl Agent {
    pub fn new(id: String, name: String, resume_token: String, pos: Vec3, spawn_index: u64) -> Self {
        Self {
            id,
            name,
            org_id: None,
            resume_token,
            pos,
            yaw: 0,
            hp: HP_MAX,
            hunger: HUNGER_MAX,
            stamina_milli: STAMINA_MAX,
            work_fatigue: 0,
            rep_trade: REP_DEFAULT,
            rep_build: REP_DEFAULT,
            rep_social: REP_DEFAULT,
            rep_law: REP_DEFAULT,
            rep_danger: 0,
            fun: FunScore::default(),
            fun_decay: BTreeMap::new(),
            seen_biomes: BTreeSet::new(),
            seen_recipes: BTreeSet::new(),
            seen_events: BTreeSet::new(),
            inventory: Inventory::new(),
            main_hand: String::new(),
            move_task: None,
            work_task: None,
            rate_windows: BTreeMap::new(),
            memory: BTreeMap::new(),
            spawn_index,
            world_switch_cooldown_until_tick: 0,
        }
    }

    pub fn clamp_vitals(&mut self) {
        self.hp = self.hp.clamp(0, HP_MAX);
        self.hunger = self.hunger.clamp(0, HUNGER_MAX);
        self.stamina_milli = self.stamina_milli.clamp(0, STAMINA_MAX);
        self.inventory.retain(|_, count| *count > 0);
    }

    pub fn memory_bytes(&self) -> usize {
        self.memory
            .iter()
            .map(|(key, entry)| key.len() + entry.value.len())
            .sum()
    }
}

pub fn clamp_rep(value: i32) -> i32 {
    value.clamp(0, REP_MAX)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemEntity {
    pub id: String,
    pub pos: Vec3,
    pub item: String,
    pub count: u32,
    pub spawned_tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Container {
    pub id: String,
    pub kind: String,
    pub pos: Vec3,
    pub inventory: Inventory,
    #[serde(default)]
    pub reserved: Inventory,
    /// agent id -> items waiting for `CLAIM_OWED`.
    #[serde(default)]
    pub owed: BTreeMap<String, Inventory>,
}

impl Container {
    pub fn new(kind: &str, pos: Vec3) -> Self {
        Self {
            id: container_id(kind, pos),
            kind: kind.to_string(),
            pos,
            inventory: Inventory::new(),
            reserved: Inventory::new(),
            owed: BTreeMap::new(),
        }
    }

    /// Count not held in escrow.
    pub fn available(&self, item: &str) -> u32 {
        inv_count(&self.inventory, item).saturating_sub(inv_count(&self.reserved, item))
    }

    pub fn reserve(&mut self, items: &Inventory) -> bool {
        if !items
            .iter()
            .all(|(item, count)| self.available(item) >= *count)
        {
            return false;
        }
        inv_merge(&mut self.reserved, items);
        true
    }

    pub fn unreserve(&mut self, items: &Inventory) {
        for (item, count) in items {
            let have = inv_count(&self.reserved, item);
            inv_take(&mut self.reserved, item, (*count).min(have));
        }
    }

    pub fn has_reserved(&self) -> bool {
        self.reserved.values().any(|count| *count > 0)
    }
}

/// Stable id for a positional entity, `<TYPE>@x,y,z`.
pub fn container_id(kind: &str, pos: Vec3) -> String {
    format!("{kind}@{pos}")
}

pub fn parse_positional_id(id: &str) -> Option<(&str, Vec3)> {
    let (kind, pos) = id.split_once('@')?;
    Some((kind, Vec3::parse(pos)?))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sign {
    pub id: String,
    pub pos: Vec3,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    pub updated_tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoardPost {
    pub post_id: String,
    pub author: String,
    pub title: String,
    pub body: String,
    pub tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub pos: Vec3,
    /// Newest first.
    pub posts: Vec<BoardPost>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Switch {
    pub id: String,
    pub pos: Vec3,
    pub on: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conveyor {
    pub id: String,
    pub pos: Vec3,
    pub dx: i32,
    pub dz: i32,
}

impl Conveyor {
    pub fn front(&self) -> Vec3 {
        self.pos.offset(self.dx, 0, self.dz)
    }

    pub fn back(&self) -> Vec3 {
        self.pos.offset(-self.dx, 0, -self.dz)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimFlags {
    pub allow_build: bool,
    pub allow_break: bool,
    pub allow_damage: bool,
    pub allow_trade: bool,
}

impl Default for ClaimFlags {
    fn default() -> Self {
        Self {
            allow_build: false,
            allow_break: false,
            allow_damage: false,
            allow_trade: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub land_id: String,
    /// Agent id or org id.
    pub owner: String,
    pub anchor: Vec3,
    pub radius: i32,
    pub flags: ClaimFlags,
    pub members: BTreeSet<String>,
    pub market_tax: f64,
    pub curfew_enabled: bool,
    pub curfew_start: f64,
    pub curfew_end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fine_item: Option<String>,
    pub fine_per_block: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_pass_item: Option<String>,
    pub access_pass_cost: u32,
    pub maintenance_due_tick: u64,
    pub maintenance_stage: u8,
    pub created_tick: u64,
}

impl Claim {
    pub fn contains(&self, pos: Vec3) -> bool {
        let r = i64::from(self.radius);
        pos.dist2_xz(self.anchor) <= r * r
    }

    pub fn overlaps(&self, anchor: Vec3, radius: i32) -> bool {
        let sum = i64::from(self.radius) + i64::from(radius);
        self.anchor.dist2_xz(anchor) <= sum * sum
    }

    pub fn in_curfew(&self, time_of_day: f64) -> bool {
        if !self.curfew_enabled || self.curfew_start == self.curfew_end {
            return false;
        }
        if self.curfew_start < self.curfew_end {
            time_of_day >= self.curfew_start && time_of_day < self.curfew_end
        } else {
            time_of_day >= self.curfew_start || time_of_day < self.curfew_end
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractKind {
    Gather,
    Deliver,
    Build,
}

impl ContractKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GATHER" => Some(Self::Gather),
            "DELIVER" => Some(Self::Deliver),
            "BUILD" => Some(Self::Build),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gather => "GATHER",
            Self::Deliver => "DELIVER",
            Self::Build => "BUILD",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractState {
    Open,
    Accepted,
    Completed,
    Failed,
}

impl fmt::Display for ContractState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "OPEN",
            Self::Accepted => "ACCEPTED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    pub contract_id: String,
    pub terminal_id: String,
    pub terminal_pos: Vec3,
    pub poster: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptor: Option<String>,
    pub kind: ContractKind,
    pub state: ContractState,
    pub requirements: Inventory,
    pub reward: Inventory,
    #[serde(default)]
    pub deposit: Inventory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blueprint_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<Vec3>,
    #[serde(default)]
    pub rotation: i32,
    pub created_tick: u64,
    pub deadline_tick: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LawStatus {
    Notice,
    Voting,
    Active,
    Rejected,
    Expired,
}

impl fmt::Display for LawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Notice => "NOTICE",
            Self::Voting => "VOTING",
            Self::Active => "ACTIVE",
            Self::Rejected => "REJECTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

impl VoteChoice {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "YES" | "Y" | "1" | "TRUE" => Some(Self::Yes),
            "NO" | "N" | "0" | "FALSE" => Some(Self::No),
            "ABSTAIN" => Some(Self::Abstain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Law {
    pub law_id: String,
    pub land_id: String,
    pub template_id: String,
    pub title: String,
    pub params: BTreeMap<String, String>,
    pub status: LawStatus,
    pub proposed_by: String,
    pub proposed_tick: u64,
    pub notice_ends_tick: u64,
    pub vote_ends_tick: u64,
    pub votes: BTreeMap<String, VoteChoice>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgKind {
    Guild,
    City,
}

impl OrgKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GUILD" => Some(Self::Guild),
            "CITY" => Some(Self::City),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrgRole {
    Member,
    Leader,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Org {
    pub org_id: String,
    pub kind: OrgKind,
    pub name: String,
    pub members: BTreeMap<String, OrgRole>,
    /// Per-world; never replicated.
    #[serde(default)]
    pub treasury: Inventory,
    pub created_tick: u64,
    pub meta_version: u64,
}

impl Org {
    pub fn leader(&self) -> Option<&str> {
        self.members
            .iter()
            .find(|(_, role)| **role == OrgRole::Leader)
            .map(|(id, _)| id.as_str())
    }

    pub fn meta(&self) -> OrgMeta {
        OrgMeta {
            org_id: self.org_id.clone(),
            kind: Some(self.kind),
            name: self.name.clone(),
            created_tick: self.created_tick,
            meta_version: self.meta_version,
            members: self.members.clone(),
        }
    }
}

/// Replicated org metadata; treasury is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrgMeta {
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<OrgKind>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub created_tick: u64,
    pub meta_version: u64,
    #[serde(default)]
    pub members: BTreeMap<String, OrgRole>,
}

impl OrgMeta {
    /// Monotone merge: a higher version replaces; equal versions union members and
    /// keep existing name/kind unless empty, plus the earliest non-zero created tick.
    pub fn merge(&mut self, candidate: &OrgMeta) {
        if candidate.meta_version > self.meta_version {
            *self = candidate.clone();
            return;
        }
        if candidate.meta_version < self.meta_version {
            return;
        }
        if self.name.is_empty() {
            self.name = candidate.name.clone();
        }
        if self.kind.is_none() {
            self.kind = candidate.kind;
        }
        self.created_tick = match (self.created_tick, candidate.created_tick) {
            (0, other) => other,
            (mine, 0) => mine,
            (mine, other) => mine.min(other),
        };
        for (member, role) in &candidate.members {
            let slot = self.members.entry(member.clone()).or_insert(*role);
            if *role == OrgRole::Leader {
                *slot = OrgRole::Leader;
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Structure {
    pub structure_id: String,
    pub blueprint_id: String,
    pub builder_id: String,
    pub anchor: Vec3,
    pub rotation: i32,
    pub min: Vec3,
    pub max: Vec3,
    pub completed_tick: u64,
    pub award_due_tick: u64,
    pub awarded: bool,
    /// agent id -> last tick seen inside.
    pub used_by: BTreeMap<String, u64>,
    pub last_influence_day: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trade {
    pub trade_id: String,
    pub from: String,
    pub to: String,
    pub offer: Inventory,
    pub request: Inventory,
    pub created_tick: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counters {
    pub next_agent: u64,
    pub next_task: u64,
    pub next_land: u64,
    pub next_trade: u64,
    pub next_contract: u64,
    pub next_law: u64,
    pub next_org: u64,
    pub next_post: u64,
    pub next_item: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirectorState {
    pub weather: String,
    pub weather_until_tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_event_id: Option<String>,
    pub active_event_start_tick: u64,
    pub active_event_ends_tick: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_event_center: Option<Vec3>,
    pub active_event_radius: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_reset_tick: Option<u64>,
}

impl Default for DirectorState {
    fn default() -> Self {
        Self {
            weather: "CLEAR".to_string(),
            weather_until_tick: 0,
            active_event_id: None,
            active_event_start_tick: 0,
            active_event_ends_tick: 0,
            active_event_center: None,
            active_event_radius: 0,
            pending_reset_tick: None,
        }
    }
}

impl DirectorState {
    pub fn event_active(&self, event_id: &str, now: u64) -> bool {
        self.active_event_id.as_deref() == Some(event_id) && now < self.active_event_ends_tick
    }

    pub fn in_event_radius(&self, pos: Vec3, now: u64) -> bool {
        match (&self.active_event_id, self.active_event_center) {
            (Some(_), Some(center)) if now < self.active_event_ends_tick => {
                self.active_event_radius > 0 && pos.dist_xz(center) <= self.active_event_radius
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsBucket {
    pub start_tick: u64,
    pub trades: u64,
    pub denied: u64,
    pub chunks_discovered: u64,
    pub blueprints_complete: u64,
}

impl StatsBucket {
    fn absorb(&mut self, other: &StatsBucket) {
        self.trades += other.trades;
        self.denied += other.denied;
        self.chunks_discovered += other.chunks_discovered;
        self.blueprints_complete += other.blueprints_complete;
    }
}

/// Rolling per-bucket counters feeding director metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatsBook {
    pub bucket_ticks: u64,
    pub window_ticks: u64,
    pub buckets: Vec<StatsBucket>,
}

impl Default for StatsBook {
    fn default() -> Self {
        Self {
            bucket_ticks: 300,
            window_ticks: 72_000,
            buckets: Vec::new(),
        }
    }
}

impl StatsBook {
    fn current(&mut self, now: u64) -> &mut StatsBucket {
        let bucket_ticks = self.bucket_ticks.max(1);
        let start = now - now % bucket_ticks;
        let window = self.window_ticks;
        self.buckets
            .retain(|bucket| bucket.start_tick + window > start);
        let needs_new = self
            .buckets
            .last()
            .map(|bucket| bucket.start_tick != start)
            .unwrap_or(true);
        if needs_new {
            self.buckets.push(StatsBucket {
                start_tick: start,
                ..StatsBucket::default()
            });
        }
        let last = self.buckets.len() - 1;
        &mut self.buckets[last]
    }

    pub fn record_trade(&mut self, now: u64) {
        self.current(now).trades += 1;
    }

    pub fn record_denied(&mut self, now: u64) {
        self.current(now).denied += 1;
    }

    pub fn record_chunk_discovered(&mut self, now: u64) {
        self.current(now).chunks_discovered += 1;
    }

    pub fn record_blueprint_complete(&mut self, now: u64) {
        self.current(now).blueprints_complete += 1;
    }

    pub fn summarize(&self, now: u64) -> StatsBucket {
        let mut total = StatsBucket::default();
        for bucket in &self.buckets {
            if bucket.start_tick + self.window_ticks > now {
                total.absorb(bucket);
            }
        }
        total
    }
}

/// Agent record plus org view moved between worlds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentTransfer {
    pub agent: Agent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<OrgMeta>,
    pub from_world_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_entry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_entry_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(version: u64, name: &str, created: u64, members: &[(&str, OrgRole)]) -> OrgMeta {
        OrgMeta {
            org_id: "ORG000001".to_string(),
            kind: if name.is_empty() { None } else { Some(OrgKind::Guild) },
            name: name.to_string(),
            created_tick: created,
            meta_version: version,
            members: members
                .iter()
                .map(|(id, role)| (id.to_string(), *role))
                .collect(),
        }
    }

    #[test]
    fn org_meta_prefers_higher_version() {
        let mut current = meta(2, "Old", 5, &[("A000001", OrgRole::Leader)]);
        current.merge(&meta(3, "New", 9, &[("A000002", OrgRole::Leader)]));
        assert_eq!(current.name, "New");
        assert_eq!(current.members.len(), 1);
        current.merge(&meta(1, "Stale", 1, &[]));
        assert_eq!(current.name, "New");
    }

    #[test]
    fn org_meta_equal_versions_union_and_keep_existing() {
        let mut current = meta(2, "", 0, &[("A000001", OrgRole::Member)]);
        current.merge(&meta(2, "Guild", 7, &[("A000001", OrgRole::Leader), ("A000003", OrgRole::Member)]));
        assert_eq!(current.name, "Guild");
        assert_eq!(current.created_tick, 7);
        assert_eq!(current.members.get("A000001"), Some(&OrgRole::Leader));
        assert_eq!(current.members.len(), 2);

        current.merge(&meta(2, "Other", 3, &[]));
        assert_eq!(current.name, "Guild");
        assert_eq!(current.created_tick, 3);
    }

    #[test]
    fn container_reservation_never_exceeds_inventory() {
        let mut chest = Container::new("CHEST", Vec3::new(1, 0, 1));
        inv_add(&mut chest.inventory, "COAL", 3);
        let mut want = Inventory::new();
        inv_add(&mut want, "COAL", 2);
        assert!(chest.reserve(&want));
        assert_eq!(chest.available("COAL"), 1);
        assert!(!chest.reserve(&want));
        chest.unreserve(&want);
        assert!(!chest.has_reserved());
        assert_eq!(chest.id, "CHEST@1,0,1");
    }

    #[test]
    fn curfew_windows_wrap_midnight() {
        let mut claim = Claim {
            land_id: "L000001".into(),
            owner: "A000001".into(),
            anchor: Vec3::default(),
            radius: 8,
            flags: ClaimFlags::default(),
            members: BTreeSet::new(),
            market_tax: 0.0,
            curfew_enabled: true,
            curfew_start: 0.9,
            curfew_end: 0.1,
            fine_item: None,
            fine_per_block: 0,
            access_pass_item: None,
            access_pass_cost: 0,
            maintenance_due_tick: 0,
            maintenance_stage: 0,
            created_tick: 0,
        };
        assert!(claim.in_curfew(0.95));
        assert!(claim.in_curfew(0.05));
        assert!(!claim.in_curfew(0.5));
        claim.curfew_end = 0.9;
        assert!(!claim.in_curfew(0.9));
        assert!(claim.contains(Vec3::new(8, 0, 0)));
        assert!(!claim.contains(Vec3::new(6, 0, 6)));
        assert!(claim.overlaps(Vec3::new(16, 0, 0), 8));
        assert!(!claim.overlaps(Vec3::new(17, 0, 0), 8));
    }

    #[test]
    fn stats_book_rolls_window() {
        let mut stats = StatsBook {
            bucket_ticks: 10,
            window_ticks: 30,
            buckets: Vec::new(),
        };
        stats.record_trade(1);
        stats.record_trade(12);
        stats.record_denied(25);
        assert_eq!(stats.summarize(25).trades, 2);
        stats.record_trade(41);
        assert_eq!(stats.summarize(41).trades, 1);
    }
}
