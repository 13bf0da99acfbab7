use super::*;

use super::tasks::best_tool_tier;

const GATHER_RANGE: i32 = 2;
const BOARD_TOP_POSTS: usize = 20;
const POST_SUMMARY_CHARS: usize = 120;

pub(super) fn summarize(body: &str) -> String {
    body.chars().take(POST_SUMMARY_CHARS).collect()
}

impl VoxelWorld {
    /// Advances every work task by one unit, in agent id order.
    pub(super) fn run_work_system(&mut self) {
        let ids: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, agent)| agent.work_task.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for agent_id in ids {
            let Some(task) = self
                .agents
                .get(&agent_id)
                .and_then(|agent| agent.work_task.clone())
            else {
                continue;
            };
            match task.kind {
                WorkKind::Mine { pos } => self.work_mine(&agent_id, pos),
                WorkKind::Place {
                    ref item_id,
                    pos,
                    rotation,
                } => self.work_place(&agent_id, item_id, pos, rotation),
                WorkKind::Craft { ref recipe_id, count } => {
                    self.work_recipe(&agent_id, &task, recipe_id, count)
                }
                WorkKind::Smelt {
                    ref recipe_id,
                    count,
                    ..
                } => self.work_recipe(&agent_id, &task, recipe_id, count),
                WorkKind::Build { .. } => self.work_build(&agent_id),
                WorkKind::Transfer {
                    ref src,
                    ref dst,
                    ref item_id,
                    count,
                } => self.work_transfer(&agent_id, src, dst, item_id, count),
                WorkKind::Open { ref target_id } => match self.project_open(&agent_id, target_id) {
                    Ok(()) => self.finish_work(&agent_id),
                    Err(reject) => self.fail_work(&agent_id, reject.code, &reject.message),
                },
                WorkKind::Gather { ref target_id } => self.work_gather(&agent_id, target_id),
                WorkKind::ClaimLand { .. } => self.finish_work(&agent_id),
            }
        }
    }

    fn bump_work(&mut self, agent_id: &str) -> Option<(u64, u64)> {
        let agent = self.agents.get_mut(agent_id)?;
        let task = agent.work_task.as_mut()?;
        task.work_ticks += 1;
        agent.work_fatigue += 1;
        Some((task.work_ticks, task.required))
    }

    fn work_mine(&mut self, agent_id: &str, pos: Vec3) {
        if !self.within_interact(agent_id, pos) {
            self.fail_work(agent_id, ErrorCode::Blocked, "too far");
            return;
        }
        if self.require_break(agent_id, pos).is_err() {
            self.adjust_rep(agent_id, RepField::Law, -1);
            self.fail_work(agent_id, ErrorCode::NoPermission, "break denied");
            return;
        }
        let block = self.block_at(pos);
        if block == 0 {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "no block");
            return;
        }
        let family = self
            .catalog
            .block_def(block)
            .and_then(|def| def.tool_family.clone());
        let tier = match self.agents.get(agent_id) {
            Some(agent) => best_tool_tier(&self.catalog, &agent.inventory, family.as_deref()),
            None => return,
        };
        let cost = self.catalog.tuning.mine_stamina_milli[tier];
        let needed = self.catalog.tuning.mine_work_ticks[tier];
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        if agent.stamina_milli < cost {
            return;
        }
        agent.stamina_milli -= cost;
        let Some(task) = agent.work_task.as_mut() else {
            return;
        };
        task.required = needed;
        task.work_ticks += 1;
        agent.work_fatigue += 1;
        if task.work_ticks < needed {
            return;
        }
        if self
            .containers
            .get(&pos)
            .map(Container::has_reserved)
            .unwrap_or(false)
        {
            self.fail_work(agent_id, ErrorCode::Blocked, "container has reserved items");
            return;
        }
        let block_name = self.catalog.block_name(block).to_string();
        self.remove_block_entity(pos);
        if block_name == "CLAIM_TOTEM" {
            self.remove_claim_at_totem(pos, agent_id);
        }
        self.set_block_named(pos, AIR, agent_id, "MINE");
        if let Some(drop) = self.catalog.drop_for(block) {
            self.spawn_item(pos, &drop, 1);
        }
        self.mine_event_bonus(agent_id, pos, &block_name);
        self.finish_work(agent_id);
    }

    fn mine_event_bonus(&mut self, agent_id: &str, pos: Vec3, block_name: &str) {
        let now = self.tick;
        if !self.director.in_event_radius(pos, now) {
            return;
        }
        let bonus = match (self.director.active_event_id.as_deref(), block_name) {
            (Some("CRYSTAL_RIFT"), "CRYSTAL_ORE") => Some("CRYSTAL_SHARD"),
            (Some("DEEP_VEIN"), "IRON_ORE") => Some("IRON_ORE"),
            (Some("DEEP_VEIN"), "COPPER_ORE") => Some("COPPER_ORE"),
            _ => None,
        };
        let Some(bonus) = bonus else {
            return;
        };
        self.spawn_item(pos, bonus, 1);
        let event_id = self.director.active_event_id.clone().unwrap_or_default();
        self.award_event_participation(agent_id, &event_id);
    }

    /// Novelty for taking part in the active event; repeated awards decay.
    pub(super) fn award_event_participation(&mut self, agent_id: &str, event_id: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.seen_events.insert(event_id.to_string());
        }
        self.award_fun(agent_id, FunDim::Novelty, &format!("event:{event_id}"), 5, "EVENT_PARTICIPATION");
    }

    fn work_place(&mut self, agent_id: &str, item_id: &str, pos: Vec3, rotation: i32) {
        if !self.in_bounds(pos) {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "out of bounds");
            return;
        }
        if !self.within_interact(agent_id, pos) {
            self.fail_work(agent_id, ErrorCode::Blocked, "too far");
            return;
        }
        if self.require_build(agent_id, pos).is_err() {
            self.adjust_rep(agent_id, RepField::Law, -1);
            self.fail_work(agent_id, ErrorCode::NoPermission, "build denied");
            return;
        }
        if self.block_at(pos) != 0 {
            self.fail_work(agent_id, ErrorCode::Blocked, "space occupied");
            return;
        }
        let Some(block_name) = self
            .catalog
            .item(item_id)
            .and_then(|def| def.place_as.clone())
        else {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "item not placeable");
            return;
        };
        let taken = self
            .agents
            .get_mut(agent_id)
            .map(|agent| inv_take(&mut agent.inventory, item_id, 1))
            .unwrap_or(false);
        if !taken {
            self.fail_work(agent_id, ErrorCode::NoResource, "missing item");
            return;
        }
        self.set_block_named(pos, &block_name, agent_id, "PLACE");
        self.ensure_block_entity(pos, &block_name, rotation);
        self.finish_work(agent_id);
    }

    /// Creates the side table row a placed block needs.
    pub(super) fn ensure_block_entity(&mut self, pos: Vec3, block_name: &str, rotation: i32) {
        match block_name {
            "CHEST" | "CONTRACT_TERMINAL" => {
                self.containers
                    .entry(pos)
                    .or_insert_with(|| Container::new(block_name, pos));
            }
            "BULLETIN_BOARD" => {
                self.boards.entry(pos).or_insert_with(|| Board {
                    id: container_id(block_name, pos),
                    pos,
                    posts: Vec::new(),
                });
            }
            "SIGN" => {
                let now = self.tick;
                self.signs.entry(pos).or_insert_with(|| Sign {
                    id: container_id(block_name, pos),
                    pos,
                    text: String::new(),
                    updated_by: None,
                    updated_tick: now,
                });
            }
            "SWITCH" => {
                self.switches.entry(pos).or_insert_with(|| Switch {
                    id: container_id(block_name, pos),
                    pos,
                    on: false,
                });
            }
            "CONVEYOR" => {
                let (dx, dz) = rotate_xz(1, 0, rotation);
                self.conveyors.entry(pos).or_insert_with(|| Conveyor {
                    id: container_id(block_name, pos),
                    pos,
                    dx,
                    dz,
                });
            }
            _ => {}
        }
    }

    /// Drops side state at `pos`; container contents and owed items fall as item entities.
    pub(super) fn remove_block_entity(&mut self, pos: Vec3) {
        if let Some(container) = self.containers.remove(&pos) {
            for (item, count) in &container.inventory {
                self.spawn_item(pos, item, *count);
            }
            for owed in container.owed.values() {
                for (item, count) in owed {
                    self.spawn_item(pos, item, *count);
                }
            }
        }
        self.boards.remove(&pos);
        self.signs.remove(&pos);
        self.switches.remove(&pos);
        self.conveyors.remove(&pos);
    }

    fn work_gather(&mut self, agent_id: &str, target_id: &str) {
        let Some(entity) = self.items.get(target_id).cloned() else {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "item entity not found");
            return;
        };
        let near = self
            .agent_pos(agent_id)
            .map(|pos| pos.manhattan(entity.pos) <= GATHER_RANGE)
            .unwrap_or(false);
        if !near {
            self.fail_work(agent_id, ErrorCode::Blocked, "too far");
            return;
        }
        if !self.local_rules(agent_id, entity.pos).can_build {
            self.record_denied();
            self.fail_work(agent_id, ErrorCode::NoPermission, "pickup denied");
            return;
        }
        self.items.remove(target_id);
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_add(&mut agent.inventory, &entity.item, entity.count);
        }
        self.finish_work(agent_id);
    }

    fn work_recipe(&mut self, agent_id: &str, task: &WorkTask, recipe_id: &str, count: u32) {
        let Some(recipe) = self.catalog.recipes.get(recipe_id).cloned() else {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "unknown recipe");
            return;
        };
        if !self.near_station(agent_id, &recipe.station) {
            let message = match task.kind {
                WorkKind::Smelt { .. } => "need furnace nearby",
                _ => "need crafting bench nearby",
            };
            self.fail_work(agent_id, ErrorCode::Blocked, message);
            return;
        }
        let Some((done, required)) = self.bump_work(agent_id) else {
            return;
        };
        if done < required {
            return;
        }
        let first_time = match self.agents.get_mut(agent_id) {
            Some(agent) => {
                for stack in &recipe.outputs {
                    inv_add(&mut agent.inventory, &stack.item, stack.count.saturating_mul(count));
                }
                if let Some(task) = agent.work_task.as_mut() {
                    task.consumed.clear();
                }
                agent.seen_recipes.insert(recipe.recipe_id.clone())
            }
            None => return,
        };
        if first_time {
            let base = match recipe.tier {
                0 | 1 => 3,
                2 => 5,
                _ => 8,
            };
            self.award_fun(agent_id, FunDim::Creation, &format!("recipe:{recipe_id}"), base, "FIRST_CRAFT");
        }
        self.finish_work(agent_id);
    }

    /// Current building blocks of a build task.
    fn build_state(&self, agent_id: &str) -> Option<(String, Vec3, i32, usize, bool)> {
        let task = self.agents.get(agent_id)?.work_task.as_ref()?;
        match &task.kind {
            WorkKind::Build {
                blueprint_id,
                anchor,
                rotation,
                next_index,
                charged,
            } => Some((blueprint_id.clone(), *anchor, *rotation, *next_index, *charged)),
            _ => None,
        }
    }

    fn work_build(&mut self, agent_id: &str) {
        let Some((blueprint_id, anchor, rotation, next_index, charged)) = self.build_state(agent_id)
        else {
            return;
        };
        let catalog = Arc::clone(&self.catalog);
        let Some(blueprint) = catalog.blueprints.get(&blueprint_id) else {
            self.fail_work(agent_id, ErrorCode::InvalidTarget, "unknown blueprint");
            return;
        };
        let placements: Vec<(Vec3, u16)> = blueprint
            .placements(anchor, rotation)
            .into_iter()
            .map(|(pos, block)| (pos, catalog.block_or_air(block)))
            .collect();
        if next_index == 0 && !charged {
            for (pos, block) in &placements {
                if !self.in_bounds(*pos) {
                    self.fail_work(agent_id, ErrorCode::InvalidTarget, "out of bounds");
                    return;
                }
                if self.require_build(agent_id, *pos).is_err() {
                    self.adjust_rep(agent_id, RepField::Law, -1);
                    self.fail_work(agent_id, ErrorCode::NoPermission, "build denied");
                    return;
                }
                let current = self.block_at(*pos);
                if current != 0 && current != *block {
                    self.fail_work(agent_id, ErrorCode::Blocked, "space occupied");
                    return;
                }
            }
            let missing = placements
                .iter()
                .filter(|(pos, block)| self.block_at(*pos) != *block)
                .count();
            if missing == 0 {
                self.finish_work(agent_id);
                return;
            }
            let mut cost = Inventory::new();
            for stack in &blueprint.cost {
                inv_add(&mut cost, &stack.item, stack.count);
            }
            for (pos, block) in &placements {
                if self.block_at(*pos) == *block {
                    let name = catalog.block_name(*block);
                    let have = inv_count(&cost, name);
                    inv_take(&mut cost, name, have.min(1));
                }
            }
            if let Err(reject) = self.charge_build_cost(agent_id, anchor, &cost) {
                self.fail_work(agent_id, reject.code, &reject.message);
                return;
            }
        }
        let per_tick = self.config.blueprint_blocks_per_tick.max(1);
        let mut index = next_index;
        let mut placed = 0;
        while index < placements.len() && placed < per_tick {
            let (pos, block) = placements[index];
            index += 1;
            if self.block_at(pos) == block {
                continue;
            }
            if self.block_at(pos) != 0 {
                self.fail_work(agent_id, ErrorCode::Blocked, "space occupied");
                return;
            }
            self.set_block(pos, block, agent_id, "BUILD_BLUEPRINT");
            let name = catalog.block_name(block).to_string();
            self.ensure_block_entity(pos, &name, rotation);
            placed += 1;
        }
        let finished = index >= placements.len();
        if let Some(task) = self
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.work_task.as_mut())
        {
            task.work_ticks = index as u64;
            if let WorkKind::Build {
                next_index,
                charged,
                ..
            } = &mut task.kind
            {
                *next_index = index;
                *charged = true;
            }
        }
        if !finished {
            return;
        }
        if !self.check_blueprint_placed(&blueprint_id, anchor, rotation) {
            self.fail_work(agent_id, ErrorCode::Blocked, "blueprint incomplete");
            return;
        }
        if let Some(task) = self
            .agents
            .get_mut(agent_id)
            .and_then(|agent| agent.work_task.as_mut())
        {
            task.consumed.clear();
        }
        self.register_structure(agent_id, &blueprint_id, anchor, rotation);
        self.stats.record_blueprint_complete(self.tick);
        self.adjust_rep(agent_id, RepField::Build, 2);
        self.finish_work(agent_id);
    }

    /// Takes `cost` from the agent, pulling shortfalls from nearby same-land containers.
    fn charge_build_cost(&mut self, agent_id: &str, anchor: Vec3, cost: &Inventory) -> Result<(), Reject> {
        let anchor_land = self.claim_at(anchor).map(|claim| claim.land_id.clone());
        let range = self.config.blueprint_auto_pull_range;
        let mut candidates: Vec<(i32, Vec3, String)> = self
            .containers
            .values()
            .filter(|c| c.kind == "CHEST" || c.kind == "CONTRACT_TERMINAL")
            .filter(|c| c.pos.dist_xz(anchor) <= range)
            .filter(|c| self.claim_at(c.pos).map(|claim| claim.land_id.clone()) == anchor_land)
            .filter(|c| self.local_rules(agent_id, c.pos).role != Role::Visitor)
            .map(|c| (c.pos.dist_xz(anchor), c.pos, c.kind.clone()))
            .collect();
        candidates.sort_by(|a, b| {
            (a.0, a.1.x, a.1.y, a.1.z, &a.2).cmp(&(b.0, b.1.x, b.1.y, b.1.z, &b.2))
        });

        let held = self
            .agents
            .get(agent_id)
            .map(|agent| agent.inventory.clone())
            .unwrap_or_default();
        let mut pulls: Vec<(Vec3, String, u32)> = Vec::new();
        for (item, need) in cost {
            let mut short = need.saturating_sub(inv_count(&held, item));
            for (_, pos, _) in &candidates {
                if short == 0 {
                    break;
                }
                let available = self
                    .containers
                    .get(pos)
                    .map(|c| c.available(item))
                    .unwrap_or(0);
                let take = available.min(short);
                if take > 0 {
                    pulls.push((*pos, item.clone(), take));
                    short -= take;
                }
            }
            if short > 0 {
                return Err(Reject::new(ErrorCode::NoResource, format!("missing {item} x{short}")));
            }
        }
        for (pos, item, count) in &pulls {
            if let Some(container) = self.containers.get_mut(pos) {
                inv_take(&mut container.inventory, item, *count);
            }
            if let Some(agent) = self.agents.get_mut(agent_id) {
                inv_add(&mut agent.inventory, item, *count);
            }
        }
        if !pulls.is_empty() {
            self.audit(
                "BLUEPRINT_AUTO_PULL",
                agent_id,
                Some(anchor),
                "BUILD_BLUEPRINT",
                json!({"pulls": pulls.iter().map(|(pos, item, count)| json!([pos.to_array(), item, count])).collect::<Vec<_>>()}),
            );
        }
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "agent not found"));
        };
        if !inv_take_all(&mut agent.inventory, cost) {
            return Err(Reject::new(ErrorCode::NoResource, "missing blueprint cost"));
        }
        if let Some(task) = agent.work_task.as_mut() {
            inv_merge(&mut task.consumed, cost);
        }
        Ok(())
    }

    fn work_transfer(&mut self, agent_id: &str, src: &str, dst: &str, item_id: &str, count: u32) {
        match self.apply_transfer(agent_id, src, dst, item_id, count) {
            Ok(()) => self.finish_work(agent_id),
            Err(reject) => self.fail_work(agent_id, reject.code, &reject.message),
        }
    }

    fn transfer_container(&self, agent_id: &str, id: &str) -> Result<Vec3, Reject> {
        let Some((_, pos)) = parse_positional_id(id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, format!("unknown container {id}")));
        };
        let Some(container) = self.containers.get(&pos) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, format!("unknown container {id}")));
        };
        if container.id != id {
            return Err(Reject::new(ErrorCode::InvalidTarget, format!("unknown container {id}")));
        }
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        Ok(pos)
    }

    pub(super) fn member_org(&self, agent_id: &str) -> Result<String, Reject> {
        self.agents
            .get(agent_id)
            .and_then(|agent| agent.org_id.clone())
            .filter(|org_id| {
                self.orgs
                    .get(org_id)
                    .map(|org| org.members.contains_key(agent_id))
                    .unwrap_or(false)
            })
            .ok_or_else(|| Reject::new(ErrorCode::NoPermission, "not in an org"))
    }

    fn apply_transfer(&mut self, agent_id: &str, src: &str, dst: &str, item_id: &str, count: u32) -> Result<(), Reject> {
        if src == dst {
            return Err(Reject::bad_request("src and dst must differ"));
        }
        // Withdraw side.
        match src {
            "SELF" => {
                let held = self
                    .agents
                    .get(agent_id)
                    .map(|agent| inv_count(&agent.inventory, item_id))
                    .unwrap_or(0);
                if held < count {
                    return Err(Reject::new(ErrorCode::NoResource, "missing items"));
                }
            }
            "ORG" => {
                let org_id = self.member_org(agent_id)?;
                let org = self
                    .orgs
                    .get(&org_id)
                    .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "org not found"))?;
                if org.members.get(agent_id) != Some(&OrgRole::Leader) {
                    return Err(Reject::new(ErrorCode::NoPermission, "only the leader may withdraw"));
                }
                if inv_count(&org.treasury, item_id) < count {
                    return Err(Reject::new(ErrorCode::NoResource, "treasury short"));
                }
            }
            id => {
                let pos = self.transfer_container(agent_id, id)?;
                if self.local_rules(agent_id, pos).role == Role::Visitor {
                    self.record_denied();
                    return Err(Reject::new(ErrorCode::NoPermission, "withdraw denied"));
                }
                let available = self
                    .containers
                    .get(&pos)
                    .map(|c| c.available(item_id))
                    .unwrap_or(0);
                if available < count {
                    return Err(Reject::new(ErrorCode::NoResource, "container short"));
                }
            }
        }
        // Deposit side is validated before anything moves.
        let dst_pos = match dst {
            "SELF" => None,
            "ORG" => {
                self.member_org(agent_id)?;
                None
            }
            id => Some(self.transfer_container(agent_id, id)?),
        };

        match src {
            "SELF" => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    inv_take(&mut agent.inventory, item_id, count);
                }
            }
            "ORG" => {
                let org_id = self.member_org(agent_id)?;
                if let Some(org) = self.orgs.get_mut(&org_id) {
                    inv_take(&mut org.treasury, item_id, count);
                }
            }
            id => {
                if let Some((_, pos)) = parse_positional_id(id) {
                    if let Some(container) = self.containers.get_mut(&pos) {
                        inv_take(&mut container.inventory, item_id, count);
                    }
                }
            }
        }
        match (dst, dst_pos) {
            ("SELF", _) => {
                if let Some(agent) = self.agents.get_mut(agent_id) {
                    inv_add(&mut agent.inventory, item_id, count);
                }
            }
            ("ORG", _) => {
                let org_id = self.member_org(agent_id)?;
                if let Some(org) = self.orgs.get_mut(&org_id) {
                    inv_add(&mut org.treasury, item_id, count);
                }
            }
            (_, Some(pos)) => {
                if let Some(container) = self.containers.get_mut(&pos) {
                    inv_add(&mut container.inventory, item_id, count);
                }
            }
            (_, None) => {}
        }
        self.audit(
            "TRANSFER",
            agent_id,
            dst_pos,
            "TRANSFER",
            json!({"src": src, "dst": dst, "item": item_id, "count": count}),
        );
        Ok(())
    }

    /// Emits the CONTAINER, BOARD, or SIGN projection for `target_id`.
    pub(super) fn project_open(&mut self, agent_id: &str, target_id: &str) -> Result<(), Reject> {
        let Some((kind, pos)) = self.resolve_block_entity(target_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "unknown target"));
        };
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        let now = self.tick;
        let event = match kind.as_str() {
            "BULLETIN_BOARD" => {
                let board = self
                    .boards
                    .get(&pos)
                    .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "unknown target"))?;
                Event::Board {
                    t: now,
                    board_id: board.id.clone(),
                    posts: board
                        .posts
                        .iter()
                        .take(BOARD_TOP_POSTS)
                        .map(|post| contracts::BoardPostView {
                            post_id: post.post_id.clone(),
                            author: post.author.clone(),
                            title: post.title.clone(),
                            summary: summarize(&post.body),
                            tick: post.tick,
                        })
                        .collect(),
                }
            }
            "SIGN" => {
                let sign = self
                    .signs
                    .get(&pos)
                    .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "unknown target"))?;
                Event::Sign {
                    t: now,
                    sign_id: sign.id.clone(),
                    pos: pos.to_array(),
                    text: sign.text.clone(),
                    updated_by: sign.updated_by.clone(),
                }
            }
            "SWITCH" | "CONVEYOR" => {
                return Err(Reject::new(ErrorCode::InvalidTarget, "target cannot be opened"));
            }
            _ => {
                let container = self
                    .containers
                    .get(&pos)
                    .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "unknown target"))?;
                let contracts = if container.kind == "CONTRACT_TERMINAL" {
                    self.contract_summaries_for(&container.id)
                } else {
                    Vec::new()
                };
                Event::Container {
                    t: now,
                    container_id: container.id.clone(),
                    container_type: container.kind.clone(),
                    pos: pos.to_array(),
                    inventory: stacks_from_map(&container.inventory),
                    reserved: stacks_from_map(&container.reserved),
                    owed: container
                        .owed
                        .get(agent_id)
                        .map(stacks_from_map)
                        .unwrap_or_default(),
                    contracts,
                }
            }
        };
        self.emit(agent_id, event);
        if let Some(event_id) = self.director.active_event_id.clone() {
            if self.director.in_event_radius(pos, now) {
                self.award_event_participation(agent_id, &event_id);
            }
        }
        Ok(())
    }
}
