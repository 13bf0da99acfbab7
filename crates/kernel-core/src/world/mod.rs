//! One world's authoritative state and the fixed-order tick pipeline that mutates it.
//!
//! Every table is a `BTreeMap` so iteration is sorted by key. Per-agent session
//! state (event queues, last voxel frame, ack cache) lives beside the tables but
//! is excluded from digests and snapshots.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use contracts::{
    stacks_from_map, AckMsg, ActMsg, ActionResultEvent, ErrorCode, Event, InstantKind, InstantReq,
    ItemPair, ObsMsg, TaskKind, TaskReq,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::audit::{
    ActionEnvelope, AuditEntry, ExternalOp, JoinSpec, TickLogEntry, AUDIT_SET_BLOCK,
};
use crate::catalog::{CatalogBundle, AIR};
use crate::config::WorldConfig;
use crate::geom::{normalize_rotation, rotate_xz, Vec3};
use crate::grid::{chunk_coords, BlockGenerator, ChunkStore, TerrainGenerator};
use crate::model::*;
use crate::rng::{hash3, roll, weighted_index};

mod actions;
mod contracts_system;
mod conveyor;
mod dedupe;
mod digest;
mod director;
mod economy;
mod init;
mod instants_economy;
mod instants_governance;
mod instants_social;
mod laws;
mod maintenance;
mod movement;
mod observe;
mod permissions;
mod snapshot;
mod step;
mod structures;
mod survival;
mod tasks;
mod transfer;
mod work;

#[cfg(test)]
mod tests;

pub use dedupe::ack_key;
pub use digest::DigestWriter;
pub use economy::{fair_trade, tax_on};
pub use observe::{decode_rle, encode_rle, EventPage};
pub use permissions::{LocalRules, Role};
pub use step::{JoinedAgent, StepInput, StepOutcome};

pub const SYSTEM_ACTOR: &str = "WORLD";
const CHAT_RANGE: i32 = 32;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("agent not found: {0}")]
    AgentNotFound(String),
    #[error("agent already present: {0}")]
    AgentExists(String),
    #[error("unsupported snapshot version {0}")]
    SnapshotVersion(u32),
    #[error("snapshot world mismatch: expected {expected}, got {got}")]
    SnapshotWorldMismatch { expected: String, got: String },
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
    #[error("admin reset is disabled for world {0}")]
    ResetDisabled(String),
}

/// Validation failure surfaced as `ACTION_RESULT{ok:false}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reject {
    code: ErrorCode,
    message: String,
    cooldown: Option<(u64, u64)>,
}

impl Reject {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cooldown: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    fn into_event(self, now: u64, reference: &str) -> ActionResultEvent {
        let mut result = ActionResultEvent::err(now, reference, self.code, self.message);
        if let Some((ticks, until)) = self.cooldown {
            result.cooldown_ticks = Some(ticks);
            result.cooldown_until_tick = Some(until);
        }
        result
    }
}

type Outcome = Result<ActionResultEvent, Reject>;

/// Per-agent transport state; never hashed or snapshotted.
#[derive(Debug, Clone, Default)]
pub struct AgentSession {
    pub delta_voxels: bool,
    queue: Vec<(u64, Event)>,
    history: VecDeque<(u64, Event)>,
    next_cursor: u64,
    last_voxels: Option<(Vec3, Vec<u16>)>,
    last_full_tick: u64,
    force_full: bool,
    pending_memory: Vec<contracts::MemoryKv>,
}

impl AgentSession {
    pub fn new(delta_voxels: bool) -> Self {
        Self {
            delta_voxels,
            force_full: true,
            ..Self::default()
        }
    }

    fn push(&mut self, event: Event, history_cap: usize) {
        self.next_cursor += 1;
        let cursor = self.next_cursor;
        self.history.push_back((cursor, event.clone()));
        while self.history.len() > history_cap.max(1) {
            self.history.pop_front();
        }
        self.queue.push((cursor, event));
    }

    pub fn cursor(&self) -> u64 {
        self.next_cursor
    }
}

pub struct VoxelWorld {
    config: WorldConfig,
    catalog: Arc<CatalogBundle>,
    generator: Arc<dyn BlockGenerator>,
    tick: u64,
    chunks: ChunkStore,
    agents: BTreeMap<String, Agent>,
    items: BTreeMap<String, ItemEntity>,
    containers: BTreeMap<Vec3, Container>,
    signs: BTreeMap<Vec3, Sign>,
    boards: BTreeMap<Vec3, Board>,
    switches: BTreeMap<Vec3, Switch>,
    conveyors: BTreeMap<Vec3, Conveyor>,
    claims: BTreeMap<String, Claim>,
    contracts: BTreeMap<String, Contract>,
    laws: BTreeMap<String, Law>,
    orgs: BTreeMap<String, Org>,
    structures: BTreeMap<String, Structure>,
    trades: BTreeMap<String, Trade>,
    counters: Counters,
    director: DirectorState,
    stats: StatsBook,
    sessions: BTreeMap<String, AgentSession>,
    acks: dedupe::AckCache,
    audit_seq: u64,
    pending_audit: Vec<AuditEntry>,
    pending_external: Vec<ExternalOp>,
    observer_pool: Option<Arc<rayon::ThreadPool>>,
}

impl std::fmt::Debug for VoxelWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoxelWorld")
            .field("world_id", &self.config.world_id)
            .field("tick", &self.tick)
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}

impl VoxelWorld {
    pub fn world_id(&self) -> &str {
        &self.config.world_id
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn catalog(&self) -> &CatalogBundle {
        &self.catalog
    }

    pub fn agent(&self, agent_id: &str) -> Option<&Agent> {
        self.agents.get(agent_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    pub fn agent_pos(&self, agent_id: &str) -> Option<Vec3> {
        self.agents.get(agent_id).map(|agent| agent.pos)
    }

    pub fn agent_by_resume_token(&self, token: &str) -> Option<&Agent> {
        self.agents
            .values()
            .find(|agent| !token.is_empty() && agent.resume_token == token)
    }

    pub fn container_at(&self, pos: Vec3) -> Option<&Container> {
        self.containers.get(&pos)
    }

    pub fn containers(&self) -> impl Iterator<Item = &Container> {
        self.containers.values()
    }

    pub fn claims(&self) -> impl Iterator<Item = &Claim> {
        self.claims.values()
    }

    pub fn contract(&self, contract_id: &str) -> Option<&Contract> {
        self.contracts.get(contract_id)
    }

    pub fn law(&self, law_id: &str) -> Option<&Law> {
        self.laws.get(law_id)
    }

    pub fn org(&self, org_id: &str) -> Option<&Org> {
        self.orgs.get(org_id)
    }

    pub fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.structures.values()
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemEntity> {
        self.items.values()
    }

    pub fn trades(&self) -> impl Iterator<Item = &Trade> {
        self.trades.values()
    }

    pub fn boards(&self) -> impl Iterator<Item = &Board> {
        self.boards.values()
    }

    pub fn director_state(&self) -> &DirectorState {
        &self.director
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn session(&self, agent_id: &str) -> Option<&AgentSession> {
        self.sessions.get(agent_id)
    }

    pub fn block_at(&self, pos: Vec3) -> u16 {
        self.chunks.get(self.generator.as_ref(), pos)
    }

    pub fn block_name_at(&self, pos: Vec3) -> &str {
        self.catalog.block_name(self.block_at(pos))
    }

    fn is_solid_at(&self, pos: Vec3) -> bool {
        self.catalog.is_solid(self.block_at(pos))
    }

    fn in_bounds(&self, pos: Vec3) -> bool {
        self.config.in_bounds_xz(pos.x, pos.z) && pos.y >= 0 && pos.y < self.chunks.height()
    }

    fn walkable(&self, pos: Vec3) -> bool {
        self.in_bounds(pos) && !self.is_solid_at(pos)
    }

    pub fn biome_at(&self, pos: Vec3) -> &'static str {
        self.generator.biome_at(pos.x, pos.z)
    }

    fn time_of_day(&self) -> f64 {
        self.config.time_of_day(self.tick)
    }

    fn is_night(&self) -> bool {
        let tod = self.time_of_day();
        !(0.25..0.75).contains(&tod)
    }

    /// Marks the chunk under `pos` as discovered; true when it was new.
    fn discover_chunk(&mut self, pos: Vec3) -> bool {
        let (cx, cz) = chunk_coords(pos.x, pos.z);
        let fresh = self.chunks.ensure_chunk(self.generator.as_ref(), cx, cz);
        if fresh {
            self.stats.record_chunk_discovered(self.tick);
        }
        fresh
    }

    /// Writes a block and records a `SET_BLOCK` audit row.
    fn set_block(&mut self, pos: Vec3, block: u16, actor: &str, reason: &str) -> bool {
        let Some(previous) = self.chunks.set(self.generator.as_ref(), pos, block) else {
            return false;
        };
        if previous != block {
            let from = self.catalog.block_name(previous).to_string();
            let to = self.catalog.block_name(block).to_string();
            self.push_audit(AuditEntry {
                tick: self.tick,
                seq: 0,
                action: AUDIT_SET_BLOCK.to_string(),
                actor: actor.to_string(),
                pos: Some(pos.to_array()),
                from: Some(from),
                to: Some(to),
                reason: reason.to_string(),
                details: Value::Null,
            });
        }
        true
    }

    fn set_block_named(&mut self, pos: Vec3, block: &str, actor: &str, reason: &str) -> bool {
        let id = self.catalog.block_or_air(block);
        self.set_block(pos, id, actor, reason)
    }

    /// Block write outside the action pipeline, for admin tools. Audited like any other write.
    pub fn admin_set_block(&mut self, pos: Vec3, block: &str, actor: &str, reason: &str) -> bool {
        self.set_block_named(pos, block, actor, reason)
    }

    fn audit(&mut self, action: &str, actor: &str, pos: Option<Vec3>, reason: &str, details: Value) {
        self.push_audit(AuditEntry {
            tick: self.tick,
            seq: 0,
            action: action.to_string(),
            actor: actor.to_string(),
            pos: pos.map(Vec3::to_array),
            from: None,
            to: None,
            reason: reason.to_string(),
            details,
        });
    }

    fn push_audit(&mut self, mut entry: AuditEntry) {
        self.audit_seq += 1;
        entry.seq = self.audit_seq;
        self.pending_audit.push(entry);
    }

    /// Queues an event for the agent's next observation.
    fn emit(&mut self, agent_id: &str, event: Event) {
        if !self.agents.contains_key(agent_id) {
            return;
        }
        let cap = self.config.event_history;
        self.sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentSession::new(false))
            .push(event, cap);
    }

    fn broadcast(&mut self, event: Event) {
        let ids: Vec<String> = self.agents.keys().cloned().collect();
        for id in ids {
            self.emit(&id, event.clone());
        }
    }

    /// Manager-synthesized events, e.g. cross-world switch results.
    pub fn inject_event(&mut self, agent_id: &str, event: Event) -> Result<(), WorldError> {
        if !self.agents.contains_key(agent_id) {
            return Err(WorldError::AgentNotFound(agent_id.to_string()));
        }
        self.emit(agent_id, event);
        Ok(())
    }

    fn next_id(counter: &mut u64, prefix: &str) -> String {
        *counter += 1;
        format_id(prefix, *counter)
    }

    fn alloc_task_id(&mut self) -> String {
        Self::next_id(&mut self.counters.next_task, "K")
    }

    fn spawn_item(&mut self, pos: Vec3, item: &str, count: u32) -> Option<String> {
        if count == 0 || item.is_empty() {
            return None;
        }
        let id = Self::next_id(&mut self.counters.next_item, "IT");
        self.items.insert(
            id.clone(),
            ItemEntity {
                id: id.clone(),
                pos,
                item: item.to_string(),
                count,
                spawned_tick: self.tick,
            },
        );
        Some(id)
    }

    fn items_at(&self, pos: Vec3) -> Vec<String> {
        self.items
            .values()
            .filter(|item| item.pos == pos && item.count > 0)
            .map(|item| item.id.clone())
            .collect()
    }

    /// Credits items to an agent or org owner; unknown owners forfeit the items.
    fn credit_owner(&mut self, owner: &str, item: &str, count: u32) {
        if let Some(agent) = self.agents.get_mut(owner) {
            inv_add(&mut agent.inventory, item, count);
        } else if let Some(org) = self.orgs.get_mut(owner) {
            inv_add(&mut org.treasury, item, count);
        }
    }

    /// Sliding-window rate limit per agent and kind.
    fn check_rate(&mut self, agent_id: &str, kind: &str) -> Result<(), Reject> {
        let Some(limit) = self.config.rate_limit(kind) else {
            return Ok(());
        };
        let now = self.tick;
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "agent not found"));
        };
        let window = agent.rate_windows.entry(kind.to_string()).or_default();
        if now >= window.start_tick + limit.window_ticks || window.count == 0 {
            *window = RateWindow {
                start_tick: now,
                count: 0,
            };
        }
        if window.count >= limit.max {
            let until = window.start_tick + limit.window_ticks;
            let mut reject = Reject::new(ErrorCode::RateLimit, "rate limited");
            reject.cooldown = Some((until.saturating_sub(now), until));
            return Err(reject);
        }
        window.count += 1;
        Ok(())
    }

    /// Adds fun points with per-key decay inside `fun_decay_window_ticks`.
    fn award_fun(&mut self, agent_id: &str, dim: FunDim, key: &str, base: i64, reason: &str) {
        if base <= 0 {
            return;
        }
        let now = self.tick;
        let window_ticks = self.config.fun_decay_window_ticks.max(1);
        let decay = self.config.fun_decay_base_permille.min(1000) as i64;
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        let slot_key = format!("{}:{key}", dim.as_str());
        let window = agent.fun_decay.entry(slot_key).or_default();
        if window.count == 0 || now >= window.start_tick + window_ticks {
            *window = FunDecayWindow {
                start_tick: now,
                count: 0,
            };
        }
        window.count += 1;
        let mut factor = 1000_i64;
        for _ in 1..window.count.min(32) {
            factor = factor * decay / 1000;
        }
        let delta = (base * factor + 500) / 1000;
        if delta <= 0 {
            return;
        }
        let slot = agent.fun.slot_mut(dim);
        *slot += delta;
        let total = *slot;
        self.emit(
            agent_id,
            Event::Fun {
                t: now,
                dim: dim.as_str().to_string(),
                delta,
                total,
                reason: reason.to_string(),
            },
        );
    }

    fn adjust_rep(&mut self, agent_id: &str, field: RepField, delta: i32) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            let slot = match field {
                RepField::Trade => &mut agent.rep_trade,
                RepField::Build => &mut agent.rep_build,
                RepField::Social => &mut agent.rep_social,
                RepField::Law => &mut agent.rep_law,
                RepField::Danger => &mut agent.rep_danger,
            };
            *slot = clamp_rep(*slot + delta);
        }
    }

    /// Entity lookup for `TYPE@x,y,z` ids, returning the block type and position.
    fn resolve_block_entity(&self, id: &str) -> Option<(String, Vec3)> {
        let (kind, pos) = parse_positional_id(id)?;
        let present = match kind {
            "SIGN" => self.signs.contains_key(&pos),
            "BULLETIN_BOARD" => self.boards.contains_key(&pos),
            "SWITCH" => self.switches.contains_key(&pos),
            "CONVEYOR" => self.conveyors.contains_key(&pos),
            _ => self
                .containers
                .get(&pos)
                .map(|container| container.kind == kind)
                .unwrap_or(false),
        };
        present.then(|| (kind.to_string(), pos))
    }

    fn within_interact(&self, agent_id: &str, pos: Vec3) -> bool {
        self.agents
            .get(agent_id)
            .map(|agent| agent.pos.manhattan(pos) <= self.catalog.tuning.interact_range)
            .unwrap_or(false)
    }

    fn spawn_point(&self, spawn_index: u64) -> Vec3 {
        let spacing = self.catalog.tuning.spawn_spacing;
        let n = i32::try_from(spawn_index).unwrap_or(i32::MAX / 4).min(1_000_000);
        let raw = Vec3::new(spacing * n, 0, -spacing * n);
        let clamped = Vec3::new(
            raw.x.clamp(-self.config.boundary_r, self.config.boundary_r),
            0,
            raw.z.clamp(-self.config.boundary_r, self.config.boundary_r),
        );
        self.nearest_walkable(clamped)
    }

    /// Spiral search for the closest non-solid in-bounds cell.
    fn nearest_walkable(&self, origin: Vec3) -> Vec3 {
        if self.walkable(origin) {
            return origin;
        }
        for r in 1..=16i32 {
            for dz in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dz.abs() != r {
                        continue;
                    }
                    let candidate = origin.offset(dx, 0, dz);
                    if self.walkable(candidate) {
                        return candidate;
                    }
                }
            }
        }
        origin
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepField {
    Trade,
    Build,
    Social,
    Law,
    Danger,
}

/// Converts client `[item, count]` pairs, rejecting empty ids and non-positive counts.
fn parse_pairs(pairs: &[ItemPair], catalog: &CatalogBundle) -> Result<Inventory, Reject> {
    let mut out = Inventory::new();
    for ItemPair(item, count) in pairs {
        let item = item.trim();
        if item.is_empty() || *count <= 0 {
            return Err(Reject::bad_request("bad item pair"));
        }
        if catalog.item(item).is_none() {
            return Err(Reject::bad_request(format!("unknown item {item}")));
        }
        let count = u32::try_from(*count).map_err(|_| Reject::bad_request("count too large"))?;
        inv_add(&mut out, item, count);
    }
    Ok(out)
}

fn positive_count(raw: Option<i64>, default: u32) -> Result<u32, Reject> {
    match raw {
        None => Ok(default),
        Some(value) if value > 0 => {
            u32::try_from(value).map_err(|_| Reject::bad_request("count too large"))
        }
        Some(_) => Err(Reject::bad_request("count must be positive")),
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str, Reject> {
    match field.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(Reject::bad_request(format!("missing {name}"))),
    }
}
