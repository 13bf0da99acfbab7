use super::*;

const CLAIM_DEFAULT_RADIUS: i32 = 32;
const CLAIM_MAX_RADIUS: i32 = 128;
const FOLLOW_DEFAULT_DISTANCE: i32 = 2;

/// Highest tool tier of `family` held in `inventory`; 0 with bare hands.
pub(super) fn best_tool_tier(catalog: &CatalogBundle, inventory: &Inventory, family: Option<&str>) -> usize {
    let Some(family) = family else {
        return 0;
    };
    inventory
        .keys()
        .filter_map(|item| catalog.item(item))
        .filter_map(|def| def.tool.as_ref())
        .filter(|tool| tool.family == family)
        .map(|tool| usize::from(tool.tier).min(3))
        .max()
        .unwrap_or(0)
}

fn move_tolerance(raw: Option<f64>) -> i32 {
    match raw {
        None => 1,
        Some(t) if t.is_finite() => (t.floor() as i32).clamp(0, 64),
        Some(_) => 1,
    }
}

fn follow_distance(raw: Option<f64>) -> i32 {
    match raw {
        Some(d) if d.is_finite() && d > 0.0 => (d.floor() as i32).clamp(1, 32),
        _ => FOLLOW_DEFAULT_DISTANCE,
    }
}

impl VoxelWorld {
    /// Validates a task request and installs it in the matching slot.
    pub(super) fn start_task(&mut self, agent_id: &str, kind: TaskKind, req: &TaskReq) -> Outcome {
        let Some(agent) = self.agents.get(agent_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "agent not found"));
        };
        if kind.is_movement() && agent.move_task.is_some() {
            return Err(Reject::new(ErrorCode::Conflict, "movement task slot occupied"));
        }
        if !kind.is_movement() && agent.work_task.is_some() {
            return Err(Reject::new(ErrorCode::Conflict, "work task slot occupied"));
        }
        match kind {
            TaskKind::MoveTo => self.start_move_to(agent_id, req),
            TaskKind::Follow => self.start_follow(agent_id, req),
            TaskKind::Mine => self.start_mine(agent_id, req),
            TaskKind::Place => self.start_place(agent_id, req),
            TaskKind::Craft => self.start_craft(agent_id, req),
            TaskKind::Smelt => self.start_smelt(agent_id, req),
            TaskKind::BuildBlueprint => self.start_build(agent_id, req),
            TaskKind::Transfer => self.start_transfer(agent_id, req),
            TaskKind::Open => self.start_open(agent_id, req),
            TaskKind::Gather => self.start_gather(agent_id, req),
            TaskKind::ClaimLand => self.start_claim_land(agent_id, req),
        }
    }

    fn accept_task(&mut self, reference: &str) -> (String, ActionResultEvent) {
        let task_id = self.alloc_task_id();
        let mut result = ActionResultEvent::ok(self.tick, reference);
        result.task_id = Some(task_id.clone());
        (task_id, result)
    }

    fn install_work(&mut self, agent_id: &str, reference: &str, kind: WorkKind, required: u64, consumed: Inventory) -> Outcome {
        let (task_id, result) = self.accept_task(reference);
        let now = self.tick;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.work_task = Some(WorkTask {
                task_id,
                kind,
                started_tick: now,
                work_ticks: 0,
                required: required.max(1),
                consumed,
            });
        }
        Ok(result)
    }

    fn target_pos(&self, raw: Option<[i32; 3]>, name: &str) -> Result<Vec3, Reject> {
        let pos = raw
            .map(Vec3::from_array)
            .ok_or_else(|| Reject::bad_request(format!("missing {name}")))?;
        if pos.y != 0 && self.chunks.height() == 1 {
            return Err(Reject::new(ErrorCode::InvalidTarget, "2D world requires y==0"));
        }
        if !self.in_bounds(pos) {
            return Err(Reject::new(ErrorCode::InvalidTarget, "out of bounds"));
        }
        Ok(pos)
    }

    fn start_move_to(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let target = self.target_pos(req.target, "target")?;
        let tolerance = move_tolerance(req.tolerance);
        let start_pos = self.agent_pos(agent_id).unwrap_or_default();
        let (task_id, result) = self.accept_task(&req.id);
        let now = self.tick;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.move_task = Some(MoveTask {
                task_id,
                kind: MoveKind::MoveTo,
                target,
                tolerance,
                target_id: None,
                distance: 0,
                start_pos,
                started_tick: now,
            });
        }
        Ok(result)
    }

    fn start_follow(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let target_id = required(&req.target_id, "target_id")?.to_string();
        if target_id == agent_id {
            return Err(Reject::new(ErrorCode::InvalidTarget, "cannot follow self"));
        }
        let Some(target) = self.agent_pos(&target_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "follow target not found"));
        };
        let distance = follow_distance(req.distance);
        let start_pos = self.agent_pos(agent_id).unwrap_or_default();
        let (task_id, result) = self.accept_task(&req.id);
        let now = self.tick;
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.move_task = Some(MoveTask {
                task_id,
                kind: MoveKind::Follow,
                target,
                tolerance: distance,
                target_id: Some(target_id),
                distance,
                start_pos,
                started_tick: now,
            });
        }
        Ok(result)
    }

    fn start_mine(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        if !self.config.capabilities.allow_mine {
            return Err(Reject::new(ErrorCode::NoPermission, "mining disabled in this world"));
        }
        let pos = self.target_pos(req.block_pos, "block_pos")?;
        if self.block_at(pos) == 0 {
            return Err(Reject::new(ErrorCode::InvalidTarget, "no block"));
        }
        self.install_work(agent_id, &req.id, WorkKind::Mine { pos }, 0, Inventory::new())
    }

    fn start_place(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        if !self.config.capabilities.allow_place {
            return Err(Reject::new(ErrorCode::NoPermission, "placing disabled in this world"));
        }
        let item_id = required(&req.item_id, "item_id")?.to_string();
        let pos = self.target_pos(req.block_pos, "block_pos")?;
        let placeable = self
            .catalog
            .item(&item_id)
            .and_then(|def| def.place_as.as_deref())
            .and_then(|block| self.catalog.block_id(block))
            .is_some();
        if !placeable {
            return Err(Reject::new(ErrorCode::InvalidTarget, "item not placeable"));
        }
        let held = self
            .agents
            .get(agent_id)
            .map(|agent| inv_count(&agent.inventory, &item_id))
            .unwrap_or(0);
        if held == 0 {
            return Err(Reject::new(ErrorCode::NoResource, "missing item"));
        }
        let rotation = normalize_rotation(req.rotation.unwrap_or(0));
        self.install_work(
            agent_id,
            &req.id,
            WorkKind::Place {
                item_id,
                pos,
                rotation,
            },
            1,
            Inventory::new(),
        )
    }

    /// True when a block named `station` sits within `station_range` of the agent.
    pub(super) fn near_station(&self, agent_id: &str, station: &str) -> bool {
        if station == "HAND" {
            return true;
        }
        let Some(pos) = self.agent_pos(agent_id) else {
            return false;
        };
        let Some(station_id) = self.catalog.block_id(station) else {
            return false;
        };
        let range = self.catalog.tuning.station_range;
        for dz in -range..=range {
            for dx in -range..=range {
                if dx.abs() + dz.abs() > range {
                    continue;
                }
                if self.block_at(pos.offset(dx, 0, dz)) == station_id {
                    return true;
                }
            }
        }
        false
    }

    fn take_recipe_inputs(&mut self, agent_id: &str, inputs: &Inventory) -> Result<(), Reject> {
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "agent not found"));
        };
        if !inv_take_all(&mut agent.inventory, inputs) {
            return Err(Reject::new(ErrorCode::NoResource, "missing inputs"));
        }
        Ok(())
    }

    fn start_craft(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let recipe_id = required(&req.recipe_id, "recipe_id")?.to_string();
        let count = positive_count(req.count, 1)?;
        let Some(recipe) = self.catalog.recipes.get(&recipe_id).cloned() else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "unknown recipe"));
        };
        if recipe.station == "FURNACE" {
            return Err(Reject::new(ErrorCode::InvalidTarget, "use SMELT for furnace recipes"));
        }
        if !self.near_station(agent_id, &recipe.station) {
            return Err(Reject::new(
                ErrorCode::Blocked,
                format!("need {} nearby", recipe.station.to_ascii_lowercase().replace('_', " ")),
            ));
        }
        let mut inputs = Inventory::new();
        for stack in &recipe.inputs {
            inv_add(&mut inputs, &stack.item, stack.count.saturating_mul(count));
        }
        self.take_recipe_inputs(agent_id, &inputs)?;
        self.install_work(
            agent_id,
            &req.id,
            WorkKind::Craft { recipe_id, count },
            recipe.time_ticks.saturating_mul(u64::from(count)),
            inputs,
        )
    }

    fn start_smelt(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let item_id = required(&req.item_id, "item_id")?.to_string();
        let count = positive_count(req.count, 1)?;
        let Some(recipe) = self.catalog.smelt_recipe_for(&item_id).cloned() else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "unsupported smelt item"));
        };
        if !self.near_station(agent_id, "FURNACE") {
            return Err(Reject::new(ErrorCode::Blocked, "need furnace nearby"));
        }
        let mut inputs = Inventory::new();
        for stack in &recipe.inputs {
            inv_add(&mut inputs, &stack.item, stack.count.saturating_mul(count));
        }
        self.take_recipe_inputs(agent_id, &inputs)?;
        self.install_work(
            agent_id,
            &req.id,
            WorkKind::Smelt {
                recipe_id: recipe.recipe_id.clone(),
                item_id,
                count,
            },
            recipe.time_ticks.saturating_mul(u64::from(count)),
            inputs,
        )
    }

    fn start_build(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        if !self.config.capabilities.allow_build {
            return Err(Reject::new(ErrorCode::NoPermission, "blueprint build disabled in this world"));
        }
        let blueprint_id = required(&req.blueprint_id, "blueprint_id")?.to_string();
        let anchor = self.target_pos(req.anchor, "anchor")?;
        let Some(blueprint) = self.catalog.blueprints.get(&blueprint_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "unknown blueprint"));
        };
        let total = blueprint.blocks.len() as u64;
        let reach = self.config.blueprint_auto_pull_range;
        let near = self
            .agent_pos(agent_id)
            .map(|pos| pos.dist_xz(anchor) <= reach)
            .unwrap_or(false);
        if !near {
            return Err(Reject::new(ErrorCode::Blocked, "too far from anchor"));
        }
        let rotation = normalize_rotation(req.rotation.unwrap_or(0));
        self.install_work(
            agent_id,
            &req.id,
            WorkKind::Build {
                blueprint_id,
                anchor,
                rotation,
                next_index: 0,
                charged: false,
            },
            total,
            Inventory::new(),
        )
    }

    fn start_transfer(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let (src, dst, item_id) = match (
            required(&req.src, "src"),
            required(&req.dst, "dst"),
            required(&req.item_id, "item_id"),
        ) {
            (Ok(src), Ok(dst), Ok(item)) => (src.to_string(), dst.to_string(), item.to_string()),
            _ => return Err(Reject::bad_request("missing src/dst/item_id/count")),
        };
        let count = match req.count {
            Some(count) if count > 0 => positive_count(Some(count), 1)?,
            _ => return Err(Reject::bad_request("missing src/dst/item_id/count")),
        };
        if src == dst {
            return Err(Reject::bad_request("src and dst must differ"));
        }
        self.install_work(
            agent_id,
            &req.id,
            WorkKind::Transfer {
                src,
                dst,
                item_id,
                count,
            },
            1,
            Inventory::new(),
        )
    }

    fn start_open(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let target_id = required(&req.target_id, "target_id")?.to_string();
        self.install_work(agent_id, &req.id, WorkKind::Open { target_id }, 1, Inventory::new())
    }

    fn start_gather(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        let target_id = required(&req.target_id, "target_id")?.to_string();
        if !self.items.contains_key(&target_id) {
            return Err(Reject::new(ErrorCode::InvalidTarget, "item entity not found"));
        }
        self.install_work(agent_id, &req.id, WorkKind::Gather { target_id }, 1, Inventory::new())
    }

    /// Claims are created on acceptance; the task slot only reports completion.
    fn start_claim_land(&mut self, agent_id: &str, req: &TaskReq) -> Outcome {
        if !self.config.capabilities.allow_claims {
            return Err(Reject::new(ErrorCode::NoPermission, "claims disabled in this world"));
        }
        let radius = match req.radius {
            Some(r) if r > 0 => r.min(CLAIM_MAX_RADIUS),
            _ => CLAIM_DEFAULT_RADIUS,
        };
        let anchor = self.target_pos(req.anchor, "anchor")?;
        if !self.local_rules(agent_id, anchor).can_build {
            self.record_denied();
            return Err(Reject::new(ErrorCode::NoPermission, "cannot claim here"));
        }
        let mut cost = Inventory::new();
        inv_add(&mut cost, "BATTERY", 1);
        inv_add(&mut cost, "CRYSTAL_SHARD", 1);
        let affordable = self
            .agents
            .get(agent_id)
            .map(|agent| inv_has_all(&agent.inventory, &cost))
            .unwrap_or(false);
        if !affordable {
            return Err(Reject::new(ErrorCode::NoResource, "need BATTERY + CRYSTAL_SHARD"));
        }
        if self.claims.values().any(|claim| claim.overlaps(anchor, radius)) {
            return Err(Reject::new(ErrorCode::Conflict, "claim overlaps existing land"));
        }
        if self.block_at(anchor) != 0 {
            return Err(Reject::new(ErrorCode::Blocked, "anchor occupied"));
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_take_all(&mut agent.inventory, &cost);
        }
        self.set_block_named(anchor, "CLAIM_TOTEM", agent_id, "CLAIM_LAND");
        let land_id = Self::next_id(&mut self.counters.next_land, "L");
        let now = self.tick;
        self.claims.insert(
            land_id.clone(),
            Claim {
                land_id: land_id.clone(),
                owner: agent_id.to_string(),
                anchor,
                radius,
                flags: ClaimFlags::default(),
                members: BTreeSet::new(),
                market_tax: 0.0,
                curfew_enabled: false,
                curfew_start: 0.0,
                curfew_end: 0.0,
                fine_item: None,
                fine_per_block: 0,
                access_pass_item: None,
                access_pass_cost: 0,
                maintenance_due_tick: now + self.config.day_ticks,
                maintenance_stage: 0,
                created_tick: now,
            },
        );
        self.audit(
            "CLAIM_LAND",
            agent_id,
            Some(anchor),
            "CLAIM_LAND",
            json!({"land_id": land_id, "radius": radius}),
        );
        let mut result = self.install_work(
            agent_id,
            &req.id,
            WorkKind::ClaimLand { anchor, radius },
            1,
            Inventory::new(),
        )?;
        result.land_id = Some(land_id);
        result.radius = Some(radius);
        Ok(result)
    }
}
