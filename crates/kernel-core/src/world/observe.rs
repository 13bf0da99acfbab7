//! Per-agent OBS projection: voxel cube, nearby entities, queued events.

use contracts::{
    BoardObs, EntityObs, EquipmentObs, FunScoreObs, LocalRulesObs, MemoryKv, ReputationObs,
    SelfObs, TaskObs, VoxelDeltaOp, VoxelsObs, WorldObs, PROTOCOL_VERSION_LATEST,
};
use rayon::prelude::*;

use super::instants_social::post_view;
use super::*;

const ENTITY_RANGE: i32 = 16;
const BOARD_RANGE: i32 = 32;
const BOARD_TOP_POSTS: usize = 5;

/// Run-length encodes a voxel cube as `[block, run]` pairs.
pub fn encode_rle(cells: &[u16]) -> Vec<[u32; 2]> {
    let mut runs: Vec<[u32; 2]> = Vec::new();
    for &block in cells {
        match runs.last_mut() {
            Some([last, run]) if *last == u32::from(block) => *run += 1,
            _ => runs.push([u32::from(block), 1]),
        }
    }
    runs
}

pub fn decode_rle(runs: &[[u32; 2]]) -> Vec<u16> {
    let mut cells = Vec::with_capacity(runs.iter().map(|[_, run]| *run as usize).sum());
    for [block, run] in runs {
        let block = u16::try_from(*block).unwrap_or(0);
        cells.extend(std::iter::repeat(block).take(*run as usize));
    }
    cells
}

/// Cube offsets in scan order: dy outermost, then dz, then dx.
fn cube_offsets(radius: i32) -> impl Iterator<Item = [i32; 3]> {
    (-radius..=radius).flat_map(move |dy| {
        (-radius..=radius).flat_map(move |dz| (-radius..=radius).map(move |dx| [dx, dy, dz]))
    })
}

/// Sparse diff against the previous cube; `None` when a full frame is cheaper.
fn voxel_delta(previous: &[u16], current: &[u16], radius: i32) -> Option<Vec<VoxelDeltaOp>> {
    if previous.len() != current.len() {
        return None;
    }
    let ops: Vec<VoxelDeltaOp> = cube_offsets(radius)
        .zip(previous.iter().zip(current))
        .filter(|(_, (before, after))| before != after)
        .map(|(d, (_, after))| VoxelDeltaOp { d, b: *after })
        .collect();
    (ops.len() < current.len() / 2).then_some(ops)
}

/// Status tags from vitals and weather; `NONE` when nothing applies.
pub(super) fn status_tags(hunger: i32, stamina_milli: i32, weather: &str) -> Vec<String> {
    let mut status = Vec::new();
    if hunger == 0 {
        status.push("STARVING");
    } else if hunger < 5 {
        status.push("HUNGRY");
    }
    if stamina_milli < 200 {
        status.push("TIRED");
    }
    match weather {
        "STORM" => status.push("STORM"),
        "COLD" => status.push("COLD"),
        _ => {}
    }
    if status.is_empty() {
        status.push("NONE");
    }
    status.into_iter().map(str::to_string).collect()
}

fn rep(value: i32) -> f64 {
    f64::from(value) / 1000.0
}

/// Session data drained before the read-only build phase.
struct ObsWork {
    agent_id: String,
    events: Vec<(u64, Event)>,
    truncated: bool,
    fallback_cursor: u64,
    memory: Vec<MemoryKv>,
    previous: Option<Vec<u16>>,
}

/// Events retained in an agent's history after a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub next_cursor: u64,
    /// The requested cursor predates the retained history.
    pub gap: bool,
}

impl VoxelWorld {
    /// `(season index starting at 1, day within season starting at 1)`.
    pub(super) fn season_clock(&self) -> (u64, u64) {
        let length = match self.config.reset_every_ticks {
            0 => self.config.season_length_ticks,
            cycle => cycle,
        };
        if length == 0 {
            return (1, self.config.day_index(self.tick) + 1);
        }
        let season = self.tick / length + 1;
        let day = (self.tick % length) / self.config.day_ticks.max(1) + 1;
        (season, day)
    }

    /// Block ids of the observation cube around `center`; cells outside `[0, height)` read as air.
    pub(super) fn voxel_cube(&self, center: Vec3) -> Vec<u16> {
        let radius = self.config.obs_radius.max(0);
        let height = self.config.height;
        cube_offsets(radius)
            .map(|[dx, dy, dz]| {
                let pos = center.offset(dx, dy, dz);
                if pos.y < 0 || pos.y >= height || !self.config.in_bounds_xz(pos.x, pos.z) {
                    0
                } else {
                    self.block_at(pos)
                }
            })
            .collect()
    }

    /// Builds one OBS per agent, in agent id order.
    pub(super) fn build_observations(&mut self) -> Vec<ObsMsg> {
        let now = self.tick;
        let full_every = self.config.delta_full_every_ticks;
        let cap = self.config.max_events_per_obs.max(1);
        let ids: Vec<String> = self.agents.keys().cloned().collect();
        let mut work = Vec::with_capacity(ids.len());
        for agent_id in ids {
            let session = self
                .sessions
                .entry(agent_id.clone())
                .or_insert_with(|| AgentSession::new(false));
            let mut events = std::mem::take(&mut session.queue);
            let truncated = events.len() > cap;
            events.truncate(cap);
            let stale = full_every > 0 && now.saturating_sub(session.last_full_tick) >= full_every;
            let previous = if session.delta_voxels && !session.force_full && !stale {
                session.last_voxels.take().map(|(_, cells)| cells)
            } else {
                None
            };
            work.push(ObsWork {
                agent_id,
                events,
                truncated,
                fallback_cursor: session.cursor(),
                memory: std::mem::take(&mut session.pending_memory),
                previous,
            });
        }

        let world: &VoxelWorld = &*self;
        let built: Vec<(ObsMsg, Vec3, Vec<u16>)> = if let Some(pool) = &self.observer_pool {
            let mut built = pool.install(|| {
                work.into_par_iter()
                    .filter_map(|item| world.project(item))
                    .collect::<Vec<_>>()
            });
            built.sort_by(|a, b| a.0.agent_id.cmp(&b.0.agent_id));
            built
        } else {
            work.into_iter().filter_map(|item| world.project(item)).collect()
        };

        let mut out = Vec::with_capacity(built.len());
        for (obs, center, cells) in built {
            if let Some(session) = self.sessions.get_mut(&obs.agent_id) {
                if obs.voxels.encoding == "RLE" {
                    session.last_full_tick = now;
                }
                session.force_full = false;
                session.last_voxels = Some((center, cells));
            }
            out.push(obs);
        }
        out
    }

    fn project(&self, work: ObsWork) -> Option<(ObsMsg, Vec3, Vec<u16>)> {
        let agent = self.agents.get(&work.agent_id)?;
        let now = self.tick;
        let radius = self.config.obs_radius.max(0);
        let cells = self.voxel_cube(agent.pos);
        let voxels = match work
            .previous
            .as_deref()
            .and_then(|previous| voxel_delta(previous, &cells, radius))
        {
            Some(ops) => VoxelsObs {
                center: agent.pos.to_array(),
                radius,
                encoding: "DELTA".to_string(),
                data: Vec::new(),
                ops,
            },
            None => VoxelsObs {
                center: agent.pos.to_array(),
                radius,
                encoding: "RLE".to_string(),
                data: encode_rle(&cells),
                ops: Vec::new(),
            },
        };

        let rules = self.local_rules(&agent.id, agent.pos);
        let (season, season_day) = self.season_clock();
        let event_live = self
            .director
            .active_event_id
            .as_ref()
            .filter(|_| now < self.director.active_event_ends_tick);
        let event_cursor = work
            .events
            .last()
            .map(|(cursor, _)| *cursor)
            .unwrap_or(work.fallback_cursor);

        let obs = ObsMsg {
            msg_type: contracts::MessageType::Obs,
            protocol_version: PROTOCOL_VERSION_LATEST.to_string(),
            tick: now,
            agent_id: agent.id.clone(),
            world_id: self.config.world_id.clone(),
            world: WorldObs {
                time_of_day: self.time_of_day(),
                day: self.config.day_index(now),
                season,
                season_day,
                weather: self.director.weather.clone(),
                active_event: event_live.cloned(),
                active_event_ends_tick: event_live.map(|_| self.director.active_event_ends_tick),
                biome: self.biome_at(agent.pos).to_string(),
            },
            self_state: SelfObs {
                pos: agent.pos.to_array(),
                yaw: agent.yaw,
                hp: agent.hp,
                hunger: agent.hunger,
                stamina: f64::from(agent.stamina_milli) / f64::from(STAMINA_MAX),
                status: status_tags(agent.hunger, agent.stamina_milli, &self.director.weather),
                reputation: ReputationObs {
                    trade: rep(agent.rep_trade),
                    build: rep(agent.rep_build),
                    social: rep(agent.rep_social),
                    law: rep(agent.rep_law),
                    danger: rep(agent.rep_danger),
                },
                inventory: stacks_from_map(&agent.inventory),
                equipment: EquipmentObs {
                    main_hand: if agent.main_hand.is_empty() {
                        "NONE".to_string()
                    } else {
                        agent.main_hand.clone()
                    },
                },
                org_id: agent.org_id.clone(),
            },
            local_rules: LocalRulesObs {
                land_id: rules.land_id.clone(),
                owner: rules.owner.clone(),
                role: rules.role.as_str().to_string(),
                permissions: rules.permissions(),
                tax: rules.tax,
                maintenance_stage: rules.maintenance_stage,
                maintenance_due_tick: rules.maintenance_due_tick,
            },
            voxels,
            entities: self.nearby_entities(agent),
            events: work.events.into_iter().map(|(_, event)| event).collect(),
            events_truncated: work.truncated,
            event_cursor,
            tasks: self.task_views(agent),
            public_boards: self.nearby_boards(agent.pos),
            fun_score: (!agent.fun.is_zero()).then(|| FunScoreObs {
                novelty: agent.fun.novelty,
                creation: agent.fun.creation,
                social: agent.fun.social,
                influence: agent.fun.influence,
                narrative: agent.fun.narrative,
                risk_rescue: agent.fun.risk_rescue,
            }),
            memory: work.memory,
        };
        Some((obs, agent.pos, cells))
    }

    fn nearby_entities(&self, me: &Agent) -> Vec<EntityObs> {
        let near = |pos: Vec3| pos.manhattan(me.pos) <= ENTITY_RANGE;
        let simple = |id: &str, kind: &str, pos: Vec3, tags: Vec<String>| EntityObs {
            id: id.to_string(),
            kind: kind.to_string(),
            pos: pos.to_array(),
            tags,
            name: None,
            item: None,
            count: None,
        };
        let mut out = Vec::new();
        for other in self.agents.values() {
            if other.id == me.id || !near(other.pos) {
                continue;
            }
            let mut tags = Vec::new();
            if let Some(org) = &other.org_id {
                tags.push(format!("org:{org}"));
            }
            if other.rep_law > 0 && other.rep_law < 200 {
                tags.push("wanted".to_string());
            }
            let mut entity = simple(&other.id, "AGENT", other.pos, tags);
            entity.name = Some(other.name.clone());
            out.push(entity);
        }
        out.extend(
            self.containers
                .values()
                .filter(|c| near(c.pos))
                .map(|c| simple(&c.id, &c.kind, c.pos, Vec::new())),
        );
        out.extend(
            self.boards
                .values()
                .filter(|b| near(b.pos))
                .map(|b| simple(&b.id, "BULLETIN_BOARD", b.pos, Vec::new())),
        );
        out.extend(self.signs.values().filter(|s| near(s.pos)).map(|s| {
            let tags = if s.text.trim().is_empty() {
                Vec::new()
            } else {
                vec!["has_text".to_string()]
            };
            simple(&s.id, "SIGN", s.pos, tags)
        }));
        out.extend(self.conveyors.values().filter(|c| near(c.pos)).map(|c| {
            simple(&c.id, "CONVEYOR", c.pos, vec![format!("dir:{}", dir_tag(c.dx, c.dz))])
        }));
        out.extend(self.switches.values().filter(|s| near(s.pos)).map(|s| {
            simple(&s.id, "SWITCH", s.pos, vec![on_off(s.on)])
        }));
        let radius = self.config.obs_radius.max(0);
        for [dx, dy, dz] in cube_offsets(radius) {
            let pos = me.pos.offset(dx, dy, dz);
            if pos.y < 0 || pos.y >= self.config.height {
                continue;
            }
            if self.block_name_at(pos) == "SENSOR" {
                let id = container_id("SENSOR", pos);
                out.push(simple(&id, "SENSOR", pos, vec![on_off(self.sensor_on(pos))]));
            }
        }
        out.extend(self.items.values().filter(|it| near(it.pos)).map(|it| {
            let mut entity = simple(&it.id, "ITEM", it.pos, Vec::new());
            entity.item = Some(it.item.clone());
            entity.count = Some(it.count);
            entity
        }));
        out
    }

    fn task_views(&self, agent: &Agent) -> Vec<TaskObs> {
        let mut out = Vec::new();
        if let Some(task) = &agent.move_task {
            let remaining = agent.pos.dist_xz(task.target);
            let progress = if task.distance <= 0 {
                1.0
            } else {
                (1.0 - f64::from(remaining) / f64::from(task.distance)).clamp(0.0, 1.0)
            };
            out.push(TaskObs {
                task_id: task.task_id.clone(),
                kind: match task.kind {
                    MoveKind::MoveTo => "MOVE_TO",
                    MoveKind::Follow => "FOLLOW",
                }
                .to_string(),
                progress,
                target: Some(task.target.to_array()),
                eta_ticks: Some(u64::try_from(remaining.max(0)).unwrap_or(0)),
            });
        }
        if let Some(task) = &agent.work_task {
            let progress = if task.required == 0 {
                0.0
            } else {
                (task.work_ticks as f64 / task.required as f64).clamp(0.0, 1.0)
            };
            let target = match &task.kind {
                WorkKind::Mine { pos } | WorkKind::Place { pos, .. } => Some(pos.to_array()),
                WorkKind::Build { anchor, .. } | WorkKind::ClaimLand { anchor, .. } => {
                    Some(anchor.to_array())
                }
                _ => None,
            };
            out.push(TaskObs {
                task_id: task.task_id.clone(),
                kind: task.kind.wire_name().to_string(),
                progress,
                target,
                eta_ticks: Some(task.required.saturating_sub(task.work_ticks)),
            });
        }
        out
    }

    fn nearby_boards(&self, pos: Vec3) -> Vec<BoardObs> {
        self.boards
            .values()
            .filter(|board| !board.posts.is_empty() && board.pos.manhattan(pos) <= BOARD_RANGE)
            .map(|board| BoardObs {
                board_id: board.id.clone(),
                pos: board.pos.to_array(),
                top_posts: board.posts.iter().take(BOARD_TOP_POSTS).map(post_view).collect(),
            })
            .collect()
    }

    /// Events after `since_cursor` still held in the agent's history.
    pub fn events_since(&self, agent_id: &str, since_cursor: u64, limit: usize) -> Option<EventPage> {
        let session = self.sessions.get(agent_id)?;
        let limit = limit.clamp(1, self.config.event_history.max(1));
        let oldest = session.history.front().map(|(cursor, _)| *cursor);
        let gap = match oldest {
            Some(oldest) => since_cursor + 1 < oldest,
            None => since_cursor < session.cursor(),
        };
        let page: Vec<&(u64, Event)> = session
            .history
            .iter()
            .filter(|(cursor, _)| *cursor > since_cursor)
            .take(limit)
            .collect();
        let next_cursor = page
            .last()
            .map(|(cursor, _)| *cursor)
            .unwrap_or_else(|| since_cursor.min(session.cursor()));
        Some(EventPage {
            events: page.into_iter().map(|(_, event)| event.clone()).collect(),
            next_cursor,
            gap,
        })
    }
}

fn on_off(on: bool) -> String {
    format!("state:{}", if on { "on" } else { "off" })
}

fn dir_tag(dx: i32, dz: i32) -> &'static str {
    match (dx.signum(), dz.signum()) {
        (1, _) => "+X",
        (-1, _) => "-X",
        (_, 1) => "+Z",
        _ => "-Z",
    }
}

#[cfg(test)]
mod observe_tests {
    use super::*;

    #[test]
    fn rle_merges_runs_and_decodes_back() {
        let cells = [0, 0, 0, 4, 4, 7, 0];
        let runs = encode_rle(&cells);
        assert_eq!(runs, vec![[0, 3], [4, 2], [7, 1], [0, 1]]);
        assert_eq!(decode_rle(&runs), cells.to_vec());
        assert!(encode_rle(&[]).is_empty());
    }

    #[test]
    fn cube_scan_order_is_y_then_z_then_x() {
        let offsets: Vec<[i32; 3]> = cube_offsets(1).collect();
        assert_eq!(offsets.len(), 27);
        assert_eq!(offsets[0], [-1, -1, -1]);
        assert_eq!(offsets[1], [0, -1, -1]);
        assert_eq!(offsets[3], [-1, -1, 0]);
        assert_eq!(offsets[9], [-1, 0, -1]);
    }

    #[test]
    fn delta_falls_back_when_too_many_cells_change() {
        let before = vec![0_u16; 27];
        let mut after = before.clone();
        after[13] = 5;
        let ops = voxel_delta(&before, &after, 1).expect("sparse diff");
        assert_eq!(ops, vec![VoxelDeltaOp { d: [0, 0, 0], b: 5 }]);
        assert_eq!(voxel_delta(&before, &before, 1), Some(Vec::new()));
        assert!(voxel_delta(&before, &vec![1_u16; 27], 1).is_none());
        assert!(voxel_delta(&before, &[0_u16; 8], 1).is_none());
    }

    #[test]
    fn status_reports_hunger_fatigue_and_weather() {
        assert_eq!(status_tags(20, 1000, "CLEAR"), vec!["NONE"]);
        assert_eq!(status_tags(0, 100, "STORM"), vec!["STARVING", "TIRED", "STORM"]);
        assert_eq!(status_tags(3, 500, "COLD"), vec!["HUNGRY", "COLD"]);
    }
}
