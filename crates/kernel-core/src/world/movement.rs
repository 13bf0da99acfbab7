use super::*;

const WANTED_LAW_REP: i32 = 200;

/// One step along the dominant axis, or the other axis when `secondary`.
fn axis_step(from: Vec3, dx: i32, dz: i32, secondary: bool) -> Vec3 {
    let along_x = dx.abs() >= dz.abs();
    if along_x != secondary {
        if dx == 0 {
            return from;
        }
        from.offset(dx.signum(), 0, 0)
    } else {
        if dz == 0 {
            return from;
        }
        from.offset(0, 0, dz.signum())
    }
}

enum Gate {
    Pass,
    Paid { land_id: String, item: String, count: u32 },
    Deny(ErrorCode, &'static str),
}

impl VoxelWorld {
    /// MOVE_TO and FOLLOW, one tile per tick, in agent id order.
    pub(super) fn run_movement_system(&mut self) {
        let now = self.tick;
        let ids: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, agent)| agent.move_task.is_some())
            .map(|(id, _)| id.clone())
            .collect();
        for agent_id in ids {
            let Some((task, pos)) = self
                .agents
                .get(&agent_id)
                .and_then(|agent| agent.move_task.clone().map(|task| (task, agent.pos)))
            else {
                continue;
            };
            let target = match task.kind {
                MoveKind::MoveTo => {
                    if pos.dist_xz(task.target) <= task.tolerance {
                        self.complete_move(&agent_id, &task);
                        continue;
                    }
                    task.target
                }
                MoveKind::Follow => {
                    let followed = task.target_id.as_deref().and_then(|id| self.agent_pos(id));
                    let Some(target) = followed else {
                        self.fail_move(&agent_id, &task, ErrorCode::InvalidTarget, "follow target not found");
                        continue;
                    };
                    if let Some(slot) = self
                        .agents
                        .get_mut(&agent_id)
                        .and_then(|agent| agent.move_task.as_mut())
                    {
                        slot.target = target;
                    }
                    if pos.dist_xz(target) <= task.distance {
                        continue;
                    }
                    target
                }
            };
            if self.movement_slowed(pos) && now % 2 == 1 {
                continue;
            }
            let cost = self.catalog.tuning.move_stamina_milli;
            match self.agents.get_mut(&agent_id) {
                Some(agent) if agent.stamina_milli >= cost => agent.stamina_milli -= cost,
                _ => continue,
            }
            let next = self.next_step(pos, target);
            match self.entry_gate(&agent_id, pos, next) {
                Gate::Pass => {}
                Gate::Paid { land_id, item, count } => {
                    self.emit(
                        &agent_id,
                        Event::AccessPass {
                            t: now,
                            land_id,
                            item,
                            count,
                        },
                    );
                }
                Gate::Deny(code, message) => {
                    self.record_denied();
                    self.fail_move(&agent_id, &task, code, message);
                    continue;
                }
            }
            if !self.walkable(next) {
                self.fail_move(&agent_id, &task, ErrorCode::Blocked, "blocked");
                continue;
            }
            if let Some(agent) = self.agents.get_mut(&agent_id) {
                agent.pos = next;
            }
            self.after_step(&agent_id, next);
        }
    }

    fn movement_slowed(&self, pos: Vec3) -> bool {
        let now = self.tick;
        if self.director.weather == "STORM" && now < self.director.weather_until_tick {
            return true;
        }
        self.director.event_active("FLOOD_WARNING", now) && self.director.in_event_radius(pos, now)
    }

    /// Primary axis, then secondary, then a bounded detour.
    fn next_step(&self, from: Vec3, target: Vec3) -> Vec3 {
        let dx = target.x - from.x;
        let dz = target.z - from.z;
        let primary = axis_step(from, dx, dz, false);
        if primary != from && self.walkable(primary) {
            return primary;
        }
        let secondary = axis_step(from, dx, dz, true);
        if secondary != from && self.walkable(secondary) {
            return secondary;
        }
        self.detour_step(from, target, self.config.detour_max_depth)
            .unwrap_or(primary)
    }

    /// BFS over walkable cells for a first step that leads strictly closer to `target`.
    pub(super) fn detour_step(&self, start: Vec3, target: Vec3, max_depth: usize) -> Option<Vec3> {
        if max_depth == 0 {
            return None;
        }
        let start_dist = start.dist_xz(target);
        let mut visited = BTreeSet::new();
        visited.insert(start);
        let mut queue = VecDeque::new();
        for next in start.neighbours_xz() {
            if self.walkable(next) && visited.insert(next) {
                queue.push_back((next, 1_usize, next));
            }
        }
        let mut best: Option<(i32, usize, Vec3)> = None;
        while let Some((pos, depth, first)) = queue.pop_front() {
            let dist = pos.dist_xz(target);
            if dist < start_dist {
                let candidate = (dist, depth, first);
                let better = match best {
                    None => true,
                    Some(current) => {
                        (candidate.0, candidate.1, candidate.2.x, candidate.2.z)
                            < (current.0, current.1, current.2.x, current.2.z)
                    }
                };
                if better {
                    best = Some(candidate);
                }
            }
            if depth >= max_depth {
                continue;
            }
            for next in pos.neighbours_xz() {
                if self.walkable(next) && visited.insert(next) {
                    queue.push_back((next, depth + 1, first));
                }
            }
        }
        best.map(|(_, _, first)| first)
    }

    /// Wanted and access-pass checks for stepping from `from` into `to`.
    fn entry_gate(&mut self, agent_id: &str, from: Vec3, to: Vec3) -> Gate {
        let Some(claim) = self.claim_at(to).cloned() else {
            return Gate::Pass;
        };
        if !self.in_claim_core(&claim, to) || self.is_land_member(agent_id, &claim) {
            return Gate::Pass;
        }
        let entering = match self.claim_at(from) {
            Some(current) => current.land_id != claim.land_id || !self.in_claim_core(&claim, from),
            None => true,
        };
        if !entering {
            return Gate::Pass;
        }
        let city_owned = self
            .orgs
            .get(&claim.owner)
            .map(|org| org.kind == OrgKind::City)
            .unwrap_or(false);
        let law_rep = self.agents.get(agent_id).map(|agent| agent.rep_law).unwrap_or(0);
        if city_owned && law_rep > 0 && law_rep < WANTED_LAW_REP {
            return Gate::Deny(ErrorCode::NoPermission, "wanted: law reputation too low");
        }
        let Some(item) = claim.access_pass_item.clone() else {
            return Gate::Pass;
        };
        let count = claim.access_pass_cost;
        if count == 0 {
            return Gate::Pass;
        }
        let paid = self
            .agents
            .get_mut(agent_id)
            .map(|agent| inv_take(&mut agent.inventory, &item, count))
            .unwrap_or(false);
        if !paid {
            return Gate::Deny(ErrorCode::NoResource, "need access ticket");
        }
        self.credit_owner(&claim.owner, &item, count);
        self.audit(
            "ACCESS_PASS",
            agent_id,
            Some(to),
            "ACCESS_PASS_CORE",
            json!({"land_id": claim.land_id, "item": item, "count": count}),
        );
        Gate::Paid {
            land_id: claim.land_id,
            item,
            count,
        }
    }

    fn after_step(&mut self, agent_id: &str, pos: Vec3) {
        if self.discover_chunk(pos) {
            debug!(world_id = %self.config.world_id, agent_id, tick = self.tick, "chunk discovered");
        }
        self.record_structure_usage(agent_id, pos);
        self.note_biome(agent_id, pos);
    }

    /// Novelty for each biome visited for the first time.
    fn note_biome(&mut self, agent_id: &str, pos: Vec3) {
        let biome = self.biome_at(pos);
        let fresh = self
            .agents
            .get_mut(agent_id)
            .map(|agent| agent.seen_biomes.insert(biome.to_string()))
            .unwrap_or(false);
        if fresh {
            self.award_fun(agent_id, FunDim::Novelty, &format!("biome:{biome}"), 10, "NEW_BIOME");
        }
    }

    fn complete_move(&mut self, agent_id: &str, task: &MoveTask) {
        let pos = self.agent_pos(agent_id).unwrap_or(task.target);
        self.record_structure_usage(agent_id, pos);
        self.note_biome(agent_id, pos);
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.move_task = None;
        }
        self.emit(
            agent_id,
            Event::TaskDone {
                t: self.tick,
                task_id: task.task_id.clone(),
                kind: "MOVE_TO".to_string(),
            },
        );
    }

    fn fail_move(&mut self, agent_id: &str, task: &MoveTask, code: ErrorCode, message: &str) {
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.move_task = None;
        }
        let kind = match task.kind {
            MoveKind::MoveTo => "MOVE_TO",
            MoveKind::Follow => "FOLLOW",
        };
        self.emit(
            agent_id,
            Event::TaskFail {
                t: self.tick,
                task_id: task.task_id.clone(),
                kind: kind.to_string(),
                code,
                message: message.to_string(),
            },
        );
    }
}

#[cfg(test)]
mod movement_tests {
    use super::*;

    #[test]
    fn axis_step_prefers_the_longer_axis() {
        let from = Vec3::new(0, 0, 0);
        assert_eq!(axis_step(from, 5, 2, false), Vec3::new(1, 0, 0));
        assert_eq!(axis_step(from, 5, 2, true), Vec3::new(0, 0, 1));
        assert_eq!(axis_step(from, 1, -4, false), Vec3::new(0, 0, -1));
        assert_eq!(axis_step(from, 3, 0, true), from);
    }
}
