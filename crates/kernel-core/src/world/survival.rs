use super::*;

const HUNGER_EVERY_TICKS: u64 = 200;
const HAZARD_EVERY_TICKS: u64 = 50;
const FATIGUE_PER_HUNGER: u64 = 100;
const TORCH_RANGE: i32 = 3;
const RESPAWN_LOSS_PERMILLE: u32 = 300;

/// Stamina recovered per tick, in milli.
fn stamina_recovery(hunger: i32, weather: &str) -> i32 {
    let base = match hunger {
        0 => 0,
        1..=4 => 1,
        _ => 2,
    };
    if weather == "STORM" {
        (base - 1).max(0)
    } else {
        base
    }
}

/// Items lost on respawn: 30% of each stack, at least one item from the first stack.
pub(super) fn respawn_loss(inventory: &Inventory) -> Inventory {
    let mut lost = Inventory::new();
    for (item, count) in inventory {
        let n = count.saturating_mul(RESPAWN_LOSS_PERMILLE) / 1000;
        inv_add(&mut lost, item, n);
    }
    if lost.is_empty() {
        if let Some((item, count)) = inventory.iter().find(|(_, count)| **count > 0) {
            inv_add(&mut lost, item, (*count).min(1));
        }
    }
    lost
}

impl VoxelWorld {
    /// Hunger, weather and event hazards, stamina recovery.
    pub(super) fn run_survival_system(&mut self) {
        let now = self.tick;
        let ids: Vec<String> = self.agents.keys().cloned().collect();

        if now % HUNGER_EVERY_TICKS == 0 {
            for id in &ids {
                let Some(agent) = self.agents.get_mut(id) else {
                    continue;
                };
                if agent.hunger > 0 {
                    agent.hunger -= 1;
                } else if agent.hp > 0 {
                    agent.hp -= 1;
                    let hp = agent.hp;
                    self.emit(id, Event::Damage { t: now, kind: "STARVATION".to_string(), hp });
                }
            }
        }

        if self.director.weather == "COLD" && now % HAZARD_EVERY_TICKS == 0 && self.is_night() {
            for id in &ids {
                let Some(pos) = self.agent_pos(id) else {
                    continue;
                };
                if self.near_block(pos, "TORCH", TORCH_RANGE) {
                    continue;
                }
                self.hurt(id, "COLD");
            }
        }

        if self.director.event_active("BANDIT_CAMP", now) && now % HAZARD_EVERY_TICKS == 0 {
            let inside: Vec<String> = ids
                .iter()
                .filter(|id| {
                    self.agents
                        .get(*id)
                        .map(|agent| agent.hp > 0 && self.director.in_event_radius(agent.pos, now))
                        .unwrap_or(false)
                })
                .cloned()
                .collect();
            if inside.len() == 1 {
                self.hurt(&inside[0], "BANDIT");
            }
        }

        let weather = self.director.weather.clone();
        for id in &ids {
            let Some(agent) = self.agents.get_mut(id) else {
                continue;
            };
            if agent.work_fatigue >= FATIGUE_PER_HUNGER {
                agent.work_fatigue -= FATIGUE_PER_HUNGER;
                agent.hunger = (agent.hunger - 1).max(0);
            }
            let recovery = stamina_recovery(agent.hunger, &weather);
            if agent.stamina_milli < STAMINA_MAX && recovery > 0 {
                agent.stamina_milli = (agent.stamina_milli + recovery).min(STAMINA_MAX);
            }
        }
    }

    fn hurt(&mut self, agent_id: &str, kind: &str) {
        let now = self.tick;
        let Some(agent) = self.agents.get_mut(agent_id) else {
            return;
        };
        if agent.hp <= 0 {
            return;
        }
        agent.hp -= 1;
        let hp = agent.hp;
        self.emit(agent_id, Event::Damage { t: now, kind: kind.to_string(), hp });
    }

    /// True when a block named `name` lies within Manhattan `range` in the XZ plane.
    pub(super) fn near_block(&self, pos: Vec3, name: &str, range: i32) -> bool {
        let Some(id) = self.catalog.block_id(name) else {
            return false;
        };
        (-range..=range).any(|dz| {
            (-range..=range).any(|dx| dx.abs() + dz.abs() <= range && self.block_at(pos.offset(dx, 0, dz)) == id)
        })
    }

    /// Respawns every downed agent.
    pub(super) fn run_respawn_system(&mut self) {
        let downed: Vec<String> = self
            .agents
            .values()
            .filter(|agent| agent.hp <= 0)
            .map(|agent| agent.id.clone())
            .collect();
        for agent_id in downed {
            self.respawn_agent(&agent_id, "DOWNED");
        }
    }

    pub(super) fn respawn_agent(&mut self, agent_id: &str, reason: &str) {
        self.cancel_all_tasks(agent_id, "respawned");
        let Some((drop_pos, spawn_index, lost)) = self.agents.get_mut(agent_id).map(|agent| {
            let lost = respawn_loss(&agent.inventory);
            for (item, count) in &lost {
                inv_take(&mut agent.inventory, item, *count);
            }
            (agent.pos, agent.spawn_index, lost)
        }) else {
            return;
        };
        for (item, count) in &lost {
            self.spawn_item(drop_pos, item, *count);
        }
        let pos = self.spawn_point(spawn_index);
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.pos = pos;
            agent.yaw = 0;
            agent.hp = HP_MAX;
            agent.hunger = 10;
            agent.stamina_milli = STAMINA_MAX;
        }
        self.audit(
            "RESPAWN",
            agent_id,
            Some(drop_pos),
            reason,
            json!({"lost": stacks_from_map(&lost), "spawn": pos.to_array()}),
        );
        self.emit(
            agent_id,
            Event::Respawn {
                t: self.tick,
                reason: reason.to_string(),
                pos: pos.to_array(),
                drop_pos: drop_pos.to_array(),
                lost: stacks_from_map(&lost),
            },
        );
    }
}

#[cfg(test)]
mod survival_tests {
    use super::*;

    #[test]
    fn respawn_loss_takes_thirty_percent_and_never_nothing() {
        let mut inv = Inventory::new();
        inv_add(&mut inv, "PLANK", 20);
        inv_add(&mut inv, "COAL", 3);
        let lost = respawn_loss(&inv);
        assert_eq!(inv_count(&lost, "PLANK"), 6);
        assert_eq!(inv_count(&lost, "COAL"), 0);

        let mut small = Inventory::new();
        inv_add(&mut small, "BERRIES", 2);
        inv_add(&mut small, "STICK", 1);
        let lost = respawn_loss(&small);
        assert_eq!(lost.values().sum::<u32>(), 1);
        assert_eq!(inv_count(&lost, "BERRIES"), 1);
        assert!(respawn_loss(&Inventory::new()).is_empty());
    }

    #[test]
    fn storms_and_hunger_slow_recovery() {
        assert_eq!(stamina_recovery(20, "CLEAR"), 2);
        assert_eq!(stamina_recovery(3, "CLEAR"), 1);
        assert_eq!(stamina_recovery(0, "CLEAR"), 0);
        assert_eq!(stamina_recovery(20, "STORM"), 1);
    }
}
