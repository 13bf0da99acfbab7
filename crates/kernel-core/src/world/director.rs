//! World events, weather, season resets and the metrics that steer event choice.

use super::*;
use crate::catalog::EventTemplateDef;
use crate::config::should_world_reset_notice;
use crate::rng::fnv1a;

const DIRECTOR_SALT: u64 = 1337;
const CENTER_MARGIN: i32 = 64;
const CENTER_ATTEMPTS: i64 = 32;
const FALLBACK_EVENT_TICKS: u64 = 6000;

/// Week-one cadence, one event per in-game day.
const SCRIPTED_WEEK: [&str; 7] = [
    "MARKET_WEEK",
    "CRYSTAL_RIFT",
    "BUILDER_EXPO",
    "FLOOD_WARNING",
    "RUINS_GATE",
    "BANDIT_CAMP",
    "CIVIC_VOTE",
];

/// Director inputs in permille (0..=1000).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct DirectorMetrics {
    pub trade: u64,
    pub conflict: u64,
    pub exploration: u64,
    pub inequality: u64,
}

fn permille(num: u128, den: u128) -> u64 {
    if den == 0 {
        return 0;
    }
    (num * 1000 / den).min(1000) as u64
}

/// Gini coefficient of `wealth` in permille.
pub(super) fn gini_permille(wealth: &[u64]) -> u64 {
    let mut values: Vec<u64> = wealth.to_vec();
    if values.len() <= 1 {
        return 0;
    }
    values.sort_unstable();
    let n = values.len() as i128;
    let sum: i128 = values.iter().map(|v| i128::from(*v)).sum();
    if sum <= 0 {
        return 0;
    }
    let weighted: i128 = values
        .iter()
        .enumerate()
        .map(|(i, v)| (i as i128 + 1) * i128::from(*v))
        .sum();
    let g = (2 * weighted * 1000) / (n * sum) - ((n + 1) * 1000) / n;
    g.clamp(0, 1000) as u64
}

/// Base weights plus feedback nudges; ids stay in catalog order.
pub(super) fn event_weights(
    events: &BTreeMap<String, EventTemplateDef>,
    metrics: DirectorMetrics,
) -> Vec<(String, u64)> {
    let mut weights: BTreeMap<String, u64> = events
        .values()
        .filter(|event| event.base_weight > 0)
        .map(|event| (event.id.clone(), event.base_weight))
        .collect();
    let mut bump = |id: &str, by: u64| {
        if let Some(weight) = weights.get_mut(id) {
            *weight += by;
        }
    };
    if metrics.trade < 400 {
        bump("MARKET_WEEK", 250);
        bump("BLUEPRINT_FAIR", 150);
    }
    if metrics.exploration < 300 {
        bump("CRYSTAL_RIFT", 200);
        bump("RUINS_GATE", 200);
    }
    if metrics.conflict < 100 {
        bump("DEEP_VEIN", 150);
        bump("BANDIT_CAMP", 100);
    } else if metrics.conflict > 250 {
        bump("CIVIC_VOTE", 250);
        bump("MARKET_WEEK", 100);
        bump("BUILDER_EXPO", 100);
    }
    if metrics.inequality > 500 {
        bump("CIVIC_VOTE", 200);
        bump("FLOOD_WARNING", 100);
    }
    weights.into_iter().collect()
}

impl VoxelWorld {
    pub(super) fn run_director_system(&mut self) {
        let now = self.tick;
        self.director_season(now);

        if self.director.active_event_id.is_some() && now >= self.director.active_event_ends_tick {
            debug!(world_id = %self.config.world_id, tick = now, "world event ended");
            self.director.active_event_id = None;
            self.director.active_event_start_tick = 0;
            self.director.active_event_ends_tick = 0;
            self.director.active_event_center = None;
            self.director.active_event_radius = 0;
        }
        if self.director.weather_until_tick != 0 && now >= self.director.weather_until_tick {
            self.director.weather = "CLEAR".to_string();
            self.director.weather_until_tick = 0;
            self.broadcast(Event::Weather {
                t: now,
                weather: "CLEAR".to_string(),
                until_tick: 0,
            });
        }
        if self.director.active_event_id.is_some() {
            return;
        }

        let day_ticks = self.config.day_ticks;
        if day_ticks > 0 && now % day_ticks == 0 {
            let day = (now / day_ticks) as usize;
            if let Some(event_id) = SCRIPTED_WEEK.get(day) {
                self.start_world_event(event_id);
                return;
            }
        }

        let every = self.config.director_every_ticks;
        if now == 0 || every == 0 || now % every != 0 {
            return;
        }
        let metrics = self.director_metrics();
        let weights = event_weights(&self.catalog.events, metrics);
        let draw = roll(self.config.seed, now, DIRECTOR_SALT);
        let raw: Vec<u64> = weights.iter().map(|(_, weight)| *weight).collect();
        if let Some(index) = weighted_index(draw, &raw) {
            let event_id = weights[index].0.clone();
            self.start_world_event(&event_id);
        }
    }

    /// Reset notice `reset_notice_ticks` ahead, then the reset itself on the boundary.
    fn director_season(&mut self, now: u64) {
        let cycle = self.config.reset_every_ticks;
        if cycle == 0 {
            return;
        }
        let (notice, reset_tick) = should_world_reset_notice(now, cycle, self.config.reset_notice_ticks);
        if notice {
            self.director.pending_reset_tick = Some(reset_tick);
            let world_id = self.config.world_id.clone();
            self.broadcast(Event::WorldResetNotice {
                t: now,
                world_id,
                reset_tick,
            });
        }
        if now > 0 && now % cycle == 0 {
            self.apply_world_reset("SEASON");
        }
    }

    pub(super) fn director_metrics(&self) -> DirectorMetrics {
        let agents = self.agents.len() as u128;
        if agents == 0 {
            return DirectorMetrics::default();
        }
        let summary = self.stats.summarize(self.tick);
        let window = u128::from(self.stats.window_ticks.max(1));
        let wealth: Vec<u64> = self
            .agents
            .values()
            .map(|agent| self.trade_value(&agent.inventory))
            .collect();
        DirectorMetrics {
            trade: permille(u128::from(summary.trades), agents * 5),
            conflict: permille(u128::from(summary.denied) * 100, agents * window),
            exploration: permille(u128::from(summary.chunks_discovered), agents * 20),
            inequality: gini_permille(&wealth),
        }
    }

    /// Deterministic event center away from claimed land; the origin when all draws collide.
    fn pick_event_center(&self, event_id: &str) -> Vec3 {
        let boundary = if self.config.boundary_r > 0 { self.config.boundary_r } else { 4000 };
        let (margin, span) = match boundary * 2 - CENTER_MARGIN * 2 {
            span if span > 0 => (CENTER_MARGIN, span),
            _ => (0, (boundary * 2).max(1)),
        };
        let salt = i64::from(fnv1a(event_id.as_bytes()) as u32);
        for attempt in 0..CENTER_ATTEMPTS {
            let hx = hash3(self.config.seed, salt, self.tick as i64, attempt * 2);
            let hz = hash3(self.config.seed, salt, self.tick as i64, attempt * 2 + 1);
            let x = -boundary + margin + (hx % span as u64) as i32;
            let z = -boundary + margin + (hz % span as u64) as i32;
            let candidate = Vec3::new(x, 0, z);
            if self.claim_at(candidate).is_none() {
                return candidate;
            }
        }
        Vec3::new(0, 0, 0)
    }

    pub(super) fn start_world_event(&mut self, event_id: &str) {
        let Some(template) = self.catalog.events.get(event_id).cloned() else {
            return;
        };
        let now = self.tick;
        let duration = match template.duration_ticks {
            0 if self.config.day_ticks > 0 => self.config.day_ticks,
            0 => FALLBACK_EVENT_TICKS,
            ticks => ticks,
        };
        let ends = now + duration;
        let center = (template.radius > 0).then(|| self.pick_event_center(event_id));
        self.director.active_event_id = Some(event_id.to_string());
        self.director.active_event_start_tick = now;
        self.director.active_event_ends_tick = ends;
        self.director.active_event_center = center;
        self.director.active_event_radius = if center.is_some() { template.radius } else { 0 };
        if let Some(center) = center {
            self.spawn_event_content(event_id, &template, center);
        }
        if let Some(weather) = &template.weather {
            self.director.weather = weather.clone();
            self.director.weather_until_tick = ends;
            self.broadcast(Event::Weather {
                t: now,
                weather: weather.clone(),
                until_tick: ends,
            });
        }
        self.audit(
            "WORLD_EVENT",
            SYSTEM_ACTOR,
            center,
            event_id,
            json!({"event_id": event_id, "ends_tick": ends, "radius": self.director.active_event_radius}),
        );
        info!(world_id = %self.config.world_id, tick = now, event_id, ends_tick = ends, "world event started");
        if let Some(event) = self.active_event_notice() {
            self.broadcast(event);
        }
    }

    /// The running event as a WORLD_EVENT, for broadcasts and late joiners.
    pub(super) fn active_event_notice(&self) -> Option<Event> {
        let event_id = self.director.active_event_id.clone()?;
        if self.tick >= self.director.active_event_ends_tick {
            return None;
        }
        let title = self
            .catalog
            .events
            .get(&event_id)
            .map(|template| template.title.clone())
            .unwrap_or_else(|| event_id.clone());
        let radius = self.director.active_event_radius;
        Some(Event::WorldEvent {
            t: self.tick,
            event_id,
            title,
            ends_tick: self.director.active_event_ends_tick,
            center: self
                .director
                .active_event_center
                .filter(|_| radius > 0)
                .map(Vec3::to_array),
            radius: (radius > 0).then_some(radius),
        })
    }

    fn spawn_event_content(&mut self, event_id: &str, template: &EventTemplateDef, center: Vec3) {
        let reason = format!("EVENT:{event_id}");
        match event_id {
            "CRYSTAL_RIFT" => {
                for (dx, dz) in square(2) {
                    self.set_block_named(center.offset(dx, 0, dz), "CRYSTAL_ORE", SYSTEM_ACTOR, &reason);
                }
            }
            "DEEP_VEIN" => {
                for (dx, dz) in square(3) {
                    let ore = if (dx + dz) & 1 == 0 { "COPPER_ORE" } else { "IRON_ORE" };
                    self.set_block_named(center.offset(dx, 0, dz), ore, SYSTEM_ACTOR, &reason);
                }
            }
            "RUINS_GATE" => {
                for (dx, dz) in square(1) {
                    if (dx, dz) != (0, 0) {
                        self.set_block_named(center.offset(dx, 0, dz), "BRICK", SYSTEM_ACTOR, &reason);
                    }
                }
                self.spawn_loot_chest(
                    center,
                    &[("CRYSTAL_SHARD", 2), ("IRON_INGOT", 4), ("COPPER_INGOT", 4)],
                    &reason,
                );
            }
            "BANDIT_CAMP" => {
                for (dx, dz) in square(2) {
                    let block = if dx.abs() == 2 || dz.abs() == 2 { "BRICK" } else { AIR };
                    if (dx, dz) != (0, 0) {
                        self.set_block_named(center.offset(dx, 0, dz), block, SYSTEM_ACTOR, &reason);
                    }
                }
                self.spawn_loot_chest(
                    center,
                    &[("IRON_INGOT", 6), ("COPPER_INGOT", 4), ("CRYSTAL_SHARD", 1), ("BREAD", 2)],
                    &reason,
                );
                self.spawn_event_sign(center.offset(3, 0, 0), "BANDIT CAMP", &reason);
            }
            "FLOOD_WARNING" => {
                for (dx, dz) in square(2) {
                    if (dx, dz) != (0, 0) && (dx, dz) != (1, 0) {
                        self.set_block_named(center.offset(dx, 0, dz), "GRAVEL", SYSTEM_ACTOR, &reason);
                    }
                }
                self.spawn_notice_board(center, template, &reason);
            }
            "MARKET_WEEK" | "BLUEPRINT_FAIR" | "BUILDER_EXPO" | "CIVIC_VOTE" => {
                self.spawn_notice_board(center, template, &reason);
            }
            _ => {}
        }
    }

    fn spawn_loot_chest(&mut self, pos: Vec3, loot: &[(&str, u32)], reason: &str) {
        self.set_block_named(pos, "CHEST", SYSTEM_ACTOR, reason);
        let container = self
            .containers
            .entry(pos)
            .or_insert_with(|| Container::new("CHEST", pos));
        for (item, count) in loot {
            inv_add(&mut container.inventory, item, *count);
        }
    }

    fn spawn_event_sign(&mut self, pos: Vec3, text: &str, reason: &str) {
        self.set_block_named(pos, "SIGN", SYSTEM_ACTOR, reason);
        self.ensure_block_entity(pos, "SIGN", 0);
        let now = self.tick;
        if let Some(sign) = self.signs.get_mut(&pos) {
            sign.text = text.to_string();
            sign.updated_by = Some(SYSTEM_ACTOR.to_string());
            sign.updated_tick = now;
        }
    }

    /// Bulletin board at the center with the event post, plus a headline sign beside it.
    fn spawn_notice_board(&mut self, center: Vec3, template: &EventTemplateDef, reason: &str) {
        self.set_block_named(center, "BULLETIN_BOARD", SYSTEM_ACTOR, reason);
        self.ensure_block_entity(center, "BULLETIN_BOARD", 0);
        let post_id = Self::next_id(&mut self.counters.next_post, "P");
        let now = self.tick;
        if let Some(board) = self.boards.get_mut(&center) {
            board.posts.insert(
                0,
                BoardPost {
                    post_id,
                    author: SYSTEM_ACTOR.to_string(),
                    title: template.title.clone(),
                    body: template.description.clone(),
                    tick: now,
                },
            );
        }
        self.spawn_event_sign(center.offset(1, 0, 0), &template.title, reason);
    }

    /// Operator reset; refused unless the world allows it.
    pub fn reset_world(&mut self, reason: &str) -> Result<u64, WorldError> {
        if !self.config.capabilities.allow_admin_reset {
            return Err(WorldError::ResetDisabled(self.config.world_id.clone()));
        }
        self.apply_world_reset(reason);
        self.pending_external.push(ExternalOp::ResetWorld {
            reason: reason.to_string(),
        });
        Ok(self.tick)
    }

    /// Regenerates terrain and clears world-scoped tables; agents keep identity and inventory.
    fn apply_world_reset(&mut self, reason: &str) {
        let agent_ids: Vec<String> = self.agents.keys().cloned().collect();
        for agent_id in &agent_ids {
            self.cancel_all_tasks(agent_id, "world reset");
        }
        self.chunks.clear();
        self.items.clear();
        self.containers.clear();
        self.boards.clear();
        self.signs.clear();
        self.conveyors.clear();
        self.switches.clear();
        self.claims.clear();
        self.laws.clear();
        self.contracts.clear();
        self.trades.clear();
        self.structures.clear();
        self.director = DirectorState::default();
        for agent_id in &agent_ids {
            let Some(index) = self.agents.get(agent_id).map(|agent| agent.spawn_index) else {
                continue;
            };
            let pos = self.spawn_point(index);
            if let Some(agent) = self.agents.get_mut(agent_id) {
                agent.pos = pos;
            }
            if let Some(session) = self.sessions.get_mut(agent_id) {
                session.force_full = true;
                session.last_voxels = None;
            }
            self.discover_chunk(pos);
        }
        let world_id = self.config.world_id.clone();
        self.audit(
            "WORLD_RESET",
            SYSTEM_ACTOR,
            None,
            reason,
            json!({"world_id": world_id, "agents": agent_ids.len()}),
        );
        info!(world_id = %world_id, tick = self.tick, reason, "world reset");
        self.broadcast(Event::WorldReset {
            t: self.tick,
            world_id,
            reason: reason.to_string(),
        });
    }
}

fn square(radius: i32) -> impl Iterator<Item = (i32, i32)> {
    (-radius..=radius).flat_map(move |dz| (-radius..=radius).map(move |dx| (dx, dz)))
}

#[cfg(test)]
mod director_tests {
    use super::*;

    #[test]
    fn gini_is_zero_for_equal_wealth_and_grows_with_skew() {
        assert_eq!(gini_permille(&[10, 10, 10]), 0);
        assert_eq!(gini_permille(&[7]), 0);
        assert_eq!(gini_permille(&[0, 0]), 0);
        let skewed = gini_permille(&[0, 0, 0, 100]);
        assert!(skewed >= 700, "gini {skewed}");
    }

    #[test]
    fn quiet_worlds_favour_markets_and_exploration() {
        let catalog = CatalogBundle::builtin();
        let base: BTreeMap<String, u64> = event_weights(
            &catalog.events,
            DirectorMetrics {
                trade: 1000,
                conflict: 200,
                exploration: 1000,
                inequality: 0,
            },
        )
        .into_iter()
        .collect();
        let quiet: BTreeMap<String, u64> = event_weights(&catalog.events, DirectorMetrics::default())
            .into_iter()
            .collect();
        assert_eq!(quiet["MARKET_WEEK"], base["MARKET_WEEK"] + 250);
        assert_eq!(quiet["CRYSTAL_RIFT"], base["CRYSTAL_RIFT"] + 200);
        assert_eq!(quiet["DEEP_VEIN"], base["DEEP_VEIN"] + 150);
        assert_eq!(quiet["COLD_SNAP"], base["COLD_SNAP"]);
    }

    #[test]
    fn square_covers_every_offset_once() {
        let cells: BTreeSet<(i32, i32)> = square(2).collect();
        assert_eq!(cells.len(), 25);
        assert!(cells.contains(&(-2, 2)));
    }
}
