//! Canonical state hash used for replay verification.
//!
//! Fields are written in a fixed order with length prefixes; floats are
//! quantized to integer milli-units before hashing.

use sha2::{Digest, Sha256};

use super::*;

/// Length-prefixed binary writer over sha256.
pub struct DigestWriter {
    hasher: Sha256,
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestWriter {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    pub fn u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    pub fn bool(&mut self, value: bool) {
        self.u8(u8::from(value));
    }

    pub fn u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    pub fn i64(&mut self, value: i64) {
        self.hasher.update(value.to_le_bytes());
    }

    pub fn i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    pub fn str(&mut self, value: &str) {
        self.u64(value.len() as u64);
        self.hasher.update(value.as_bytes());
    }

    pub fn opt_str(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                self.u8(1);
                self.str(value);
            }
            None => self.u8(0),
        }
    }

    /// Rounds to thousandths so float noise below that never changes a digest.
    pub fn milli(&mut self, value: f64) {
        let scaled = if value.is_finite() {
            (value * 1000.0).round() as i64
        } else {
            0
        };
        self.i64(scaled);
    }

    pub fn vec3(&mut self, pos: Vec3) {
        self.i32(pos.x);
        self.i32(pos.y);
        self.i32(pos.z);
    }

    pub fn opt_vec3(&mut self, pos: Option<Vec3>) {
        match pos {
            Some(pos) => {
                self.u8(1);
                self.vec3(pos);
            }
            None => self.u8(0),
        }
    }

    pub fn inventory(&mut self, inv: &Inventory) {
        let live: Vec<(&String, &u32)> = inv.iter().filter(|(_, count)| **count > 0).collect();
        self.u64(live.len() as u64);
        for (item, count) in live {
            self.str(item);
            self.u64(u64::from(*count));
        }
    }

    pub fn strings<'a>(&mut self, values: impl ExactSizeIterator<Item = &'a String>) {
        self.u64(values.len() as u64);
        for value in values {
            self.str(value);
        }
    }

    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl VoxelWorld {
    /// Hex sha256 over every authoritative table; sessions and audit sinks are excluded.
    pub fn state_digest(&self) -> String {
        let mut w = DigestWriter::new();
        w.str(&self.config.world_id);
        w.u64(self.tick);
        self.digest_terrain(&mut w);
        self.digest_agents(&mut w);
        self.digest_entities(&mut w);
        self.digest_land(&mut w);
        self.digest_institutions(&mut w);
        self.digest_world_state(&mut w);
        w.finish()
    }

    fn digest_terrain(&self, w: &mut DigestWriter) {
        w.u64(self.chunks.loaded_count() as u64);
        for chunk in self.chunks.chunks() {
            w.i32(chunk.cx);
            w.i32(chunk.cz);
            w.u64(chunk.blocks.len() as u64);
            for block in &chunk.blocks {
                w.hasher.update(block.to_le_bytes());
            }
        }
    }

    fn digest_agents(&self, w: &mut DigestWriter) {
        w.u64(self.agents.len() as u64);
        for agent in self.agents.values() {
            w.str(&agent.id);
            w.str(&agent.name);
            w.opt_str(agent.org_id.as_deref());
            w.vec3(agent.pos);
            w.i32(agent.yaw);
            w.i32(agent.hp);
            w.i32(agent.hunger);
            w.i32(agent.stamina_milli);
            w.u64(agent.work_fatigue);
            for rep in [agent.rep_trade, agent.rep_build, agent.rep_social, agent.rep_law, agent.rep_danger] {
                w.i32(rep);
            }
            let fun = agent.fun;
            for score in [fun.novelty, fun.creation, fun.social, fun.influence, fun.narrative, fun.risk_rescue] {
                w.i64(score);
            }
            w.u64(agent.fun_decay.len() as u64);
            for (key, window) in &agent.fun_decay {
                w.str(key);
                w.u64(window.start_tick);
                w.u64(u64::from(window.count));
            }
            w.strings(agent.seen_biomes.iter());
            w.strings(agent.seen_recipes.iter());
            w.strings(agent.seen_events.iter());
            w.inventory(&agent.inventory);
            w.str(&agent.main_hand);
            match &agent.move_task {
                Some(task) => {
                    w.u8(1);
                    w.str(&task.task_id);
                    w.u8(match task.kind {
                        MoveKind::MoveTo => 0,
                        MoveKind::Follow => 1,
                    });
                    w.vec3(task.target);
                    w.i32(task.tolerance);
                    w.opt_str(task.target_id.as_deref());
                    w.i32(task.distance);
                    w.vec3(task.start_pos);
                    w.u64(task.started_tick);
                }
                None => w.u8(0),
            }
            match &agent.work_task {
                Some(task) => {
                    w.u8(1);
                    w.str(&task.task_id);
                    digest_work_kind(w, &task.kind);
                    w.u64(task.started_tick);
                    w.u64(task.work_ticks);
                    w.u64(task.required);
                    w.inventory(&task.consumed);
                }
                None => w.u8(0),
            }
            w.u64(agent.rate_windows.len() as u64);
            for (kind, window) in &agent.rate_windows {
                w.str(kind);
                w.u64(window.start_tick);
                w.u64(u64::from(window.count));
            }
            w.u64(agent.memory.len() as u64);
            for (key, entry) in &agent.memory {
                w.str(key);
                w.str(&entry.value);
                w.u64(entry.expiry_tick);
            }
            w.u64(agent.spawn_index);
            w.u64(agent.world_switch_cooldown_until_tick);
        }
    }

    fn digest_entities(&self, w: &mut DigestWriter) {
        w.u64(self.items.len() as u64);
        for item in self.items.values() {
            w.str(&item.id);
            w.vec3(item.pos);
            w.str(&item.item);
            w.u64(u64::from(item.count));
            w.u64(item.spawned_tick);
        }
        w.u64(self.containers.len() as u64);
        for container in self.containers.values() {
            w.str(&container.id);
            w.inventory(&container.inventory);
            w.inventory(&container.reserved);
            w.u64(container.owed.len() as u64);
            for (agent_id, owed) in &container.owed {
                w.str(agent_id);
                w.inventory(owed);
            }
        }
        w.u64(self.signs.len() as u64);
        for sign in self.signs.values() {
            w.str(&sign.id);
            w.str(&sign.text);
            w.opt_str(sign.updated_by.as_deref());
            w.u64(sign.updated_tick);
        }
        w.u64(self.boards.len() as u64);
        for board in self.boards.values() {
            w.str(&board.id);
            w.u64(board.posts.len() as u64);
            for post in &board.posts {
                w.str(&post.post_id);
                w.str(&post.author);
                w.str(&post.title);
                w.str(&post.body);
                w.u64(post.tick);
            }
        }
        w.u64(self.switches.len() as u64);
        for switch in self.switches.values() {
            w.str(&switch.id);
            w.bool(switch.on);
        }
        w.u64(self.conveyors.len() as u64);
        for conveyor in self.conveyors.values() {
            w.str(&conveyor.id);
            w.i32(conveyor.dx);
            w.i32(conveyor.dz);
        }
    }

    fn digest_land(&self, w: &mut DigestWriter) {
        w.u64(self.claims.len() as u64);
        for claim in self.claims.values() {
            w.str(&claim.land_id);
            w.str(&claim.owner);
            w.vec3(claim.anchor);
            w.i32(claim.radius);
            let flags = claim.flags;
            for flag in [flags.allow_build, flags.allow_break, flags.allow_damage, flags.allow_trade] {
                w.bool(flag);
            }
            w.strings(claim.members.iter());
            w.milli(claim.market_tax);
            w.bool(claim.curfew_enabled);
            w.milli(claim.curfew_start);
            w.milli(claim.curfew_end);
            w.opt_str(claim.fine_item.as_deref());
            w.u64(u64::from(claim.fine_per_block));
            w.opt_str(claim.access_pass_item.as_deref());
            w.u64(u64::from(claim.access_pass_cost));
            w.u64(claim.maintenance_due_tick);
            w.u8(claim.maintenance_stage);
            w.u64(claim.created_tick);
        }
        w.u64(self.structures.len() as u64);
        for structure in self.structures.values() {
            w.str(&structure.structure_id);
            w.str(&structure.blueprint_id);
            w.str(&structure.builder_id);
            w.vec3(structure.anchor);
            w.i32(structure.rotation);
            w.vec3(structure.min);
            w.vec3(structure.max);
            w.u64(structure.completed_tick);
            w.u64(structure.award_due_tick);
            w.bool(structure.awarded);
            w.u64(structure.used_by.len() as u64);
            for (agent_id, tick) in &structure.used_by {
                w.str(agent_id);
                w.u64(*tick);
            }
            w.u64(structure.last_influence_day);
        }
    }

    fn digest_institutions(&self, w: &mut DigestWriter) {
        w.u64(self.contracts.len() as u64);
        for contract in self.contracts.values() {
            w.str(&contract.contract_id);
            w.str(&contract.terminal_id);
            w.str(&contract.poster);
            w.opt_str(contract.acceptor.as_deref());
            w.str(contract.kind.as_str());
            w.str(&contract.state.to_string());
            w.inventory(&contract.requirements);
            w.inventory(&contract.reward);
            w.inventory(&contract.deposit);
            w.opt_str(contract.blueprint_id.as_deref());
            w.opt_vec3(contract.anchor);
            w.i32(contract.rotation);
            w.u64(contract.created_tick);
            w.u64(contract.deadline_tick);
        }
        w.u64(self.laws.len() as u64);
        for law in self.laws.values() {
            w.str(&law.law_id);
            w.str(&law.land_id);
            w.str(&law.template_id);
            w.str(&law.title);
            w.u64(law.params.len() as u64);
            for (key, value) in &law.params {
                w.str(key);
                w.str(value);
            }
            w.str(&law.status.to_string());
            w.str(&law.proposed_by);
            w.u64(law.proposed_tick);
            w.u64(law.notice_ends_tick);
            w.u64(law.vote_ends_tick);
            w.u64(law.votes.len() as u64);
            for (voter, choice) in &law.votes {
                w.str(voter);
                w.u8(match choice {
                    VoteChoice::Yes => 1,
                    VoteChoice::No => 2,
                    VoteChoice::Abstain => 3,
                });
            }
        }
        w.u64(self.orgs.len() as u64);
        for org in self.orgs.values() {
            w.str(&org.org_id);
            w.u8(match org.kind {
                OrgKind::Guild => 1,
                OrgKind::City => 2,
            });
            w.str(&org.name);
            w.u64(org.members.len() as u64);
            for (member, role) in &org.members {
                w.str(member);
                w.bool(*role == OrgRole::Leader);
            }
            w.inventory(&org.treasury);
            w.u64(org.created_tick);
            w.u64(org.meta_version);
        }
        w.u64(self.trades.len() as u64);
        for trade in self.trades.values() {
            w.str(&trade.trade_id);
            w.str(&trade.from);
            w.str(&trade.to);
            w.inventory(&trade.offer);
            w.inventory(&trade.request);
            w.u64(trade.created_tick);
        }
    }

    fn digest_world_state(&self, w: &mut DigestWriter) {
        let c = self.counters;
        for counter in [
            c.next_agent,
            c.next_task,
            c.next_land,
            c.next_trade,
            c.next_contract,
            c.next_law,
            c.next_org,
            c.next_post,
            c.next_item,
        ] {
            w.u64(counter);
        }
        let d = &self.director;
        w.str(&d.weather);
        w.u64(d.weather_until_tick);
        w.opt_str(d.active_event_id.as_deref());
        w.u64(d.active_event_start_tick);
        w.u64(d.active_event_ends_tick);
        w.opt_vec3(d.active_event_center);
        w.i32(d.active_event_radius);
        w.u64(d.pending_reset_tick.unwrap_or(0));
        w.u64(self.stats.buckets.len() as u64);
        for bucket in &self.stats.buckets {
            w.u64(bucket.start_tick);
            w.u64(bucket.trades);
            w.u64(bucket.denied);
            w.u64(bucket.chunks_discovered);
            w.u64(bucket.blueprints_complete);
        }
    }
}

fn digest_work_kind(w: &mut DigestWriter, kind: &WorkKind) {
    w.str(kind.wire_name());
    match kind {
        WorkKind::Mine { pos } => w.vec3(*pos),
        WorkKind::Place { item_id, pos, rotation } => {
            w.str(item_id);
            w.vec3(*pos);
            w.i32(*rotation);
        }
        WorkKind::Craft { recipe_id, count } => {
            w.str(recipe_id);
            w.u64(u64::from(*count));
        }
        WorkKind::Smelt { recipe_id, item_id, count } => {
            w.str(recipe_id);
            w.str(item_id);
            w.u64(u64::from(*count));
        }
        WorkKind::Build { blueprint_id, anchor, rotation, next_index, charged } => {
            w.str(blueprint_id);
            w.vec3(*anchor);
            w.i32(*rotation);
            w.u64(*next_index as u64);
            w.bool(*charged);
        }
        WorkKind::Transfer { src, dst, item_id, count } => {
            w.str(src);
            w.str(dst);
            w.str(item_id);
            w.u64(u64::from(*count));
        }
        WorkKind::Open { target_id } | WorkKind::Gather { target_id } => w.str(target_id),
        WorkKind::ClaimLand { anchor, radius } => {
            w.vec3(*anchor);
            w.i32(*radius);
        }
    }
}

#[cfg(test)]
mod digest_tests {
    use super::*;

    #[test]
    fn length_prefixes_separate_adjacent_strings() {
        let mut a = DigestWriter::new();
        a.str("ab");
        a.str("c");
        let mut b = DigestWriter::new();
        b.str("a");
        b.str("bc");
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn milli_quantization_hides_sub_thousandth_noise() {
        let mut a = DigestWriter::new();
        a.milli(0.1 + 0.2);
        let mut b = DigestWriter::new();
        b.milli(0.3);
        assert_eq!(a.finish(), b.finish());
    }

    #[test]
    fn empty_inventory_stacks_are_ignored() {
        let mut with_zero = Inventory::new();
        with_zero.insert("COAL".into(), 0);
        with_zero.insert("PLANK".into(), 2);
        let mut clean = Inventory::new();
        clean.insert("PLANK".into(), 2);
        let mut a = DigestWriter::new();
        a.inventory(&with_zero);
        let mut b = DigestWriter::new();
        b.inventory(&clean);
        assert_eq!(a.finish(), b.finish());
    }
}
