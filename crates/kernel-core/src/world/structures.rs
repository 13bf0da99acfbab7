//! Completed blueprints: placement checks, support, usage, delayed creation and daily influence awards.

use super::*;
use crate::catalog::BlueprintDef;

const MODULE_POINTS: i64 = 2;
const STABILITY_POINTS: i64 = 3;
const USAGE_CAP: i64 = 10;
const INFLUENCE_CAP: f64 = 15.0;
const SUPPORTED_PERMILLE: usize = 950;

/// `STRUCT_<builder>_<tick>_<bp>_<x>_<y>_<z>`; stable without counters.
pub(super) fn structure_id(builder: &str, tick: u64, blueprint_id: &str, anchor: Vec3) -> String {
    format!(
        "STRUCT_{builder}_{tick}_{blueprint_id}_{}_{}_{}",
        anchor.x, anchor.y, anchor.z
    )
}

/// Creation points for a structure with `unique_blocks` distinct block kinds.
fn creation_points(unique_blocks: usize, modules: i64, stable: bool, users: usize) -> i64 {
    let complexity = ((1.0 + unique_blocks as f64).ln() * 2.0).round() as i64;
    let stability = if stable { STABILITY_POINTS } else { 0 };
    let usage = (2 * users as i64).min(USAGE_CAP);
    5 + complexity + modules + stability + usage
}

fn influence_points(users: usize) -> i64 {
    (INFLUENCE_CAP.min(3.0 * (users as f64).sqrt())).round() as i64
}

/// Storage, light, workshop and civic blocks each add a module bonus.
fn module_points(blueprint: &BlueprintDef) -> i64 {
    let has = |names: &[&str]| blueprint.blocks.iter().any(|b| names.contains(&b.block.as_str()));
    [
        has(&["CHEST"]),
        has(&["TORCH"]),
        has(&["CRAFTING_BENCH", "FURNACE"]),
        has(&["BULLETIN_BOARD", "CONTRACT_TERMINAL", "CLAIM_TOTEM", "SIGN"]),
    ]
    .into_iter()
    .filter(|present| *present)
    .count() as i64
        * MODULE_POINTS
}

impl VoxelWorld {
    /// True when every rotated blueprint cell holds its expected block.
    pub(super) fn check_blueprint_placed(&self, blueprint_id: &str, anchor: Vec3, rotation: i32) -> bool {
        let Some(blueprint) = self.catalog.blueprints.get(blueprint_id) else {
            return false;
        };
        blueprint
            .placements(anchor, normalize_rotation(rotation))
            .into_iter()
            .all(|(pos, block)| self.block_name_at(pos) == block)
    }

    /// Support check for blueprints that require it; others are always stable.
    pub(super) fn structure_stable(&self, blueprint_id: &str, anchor: Vec3, rotation: i32) -> bool {
        let Some(blueprint) = self.catalog.blueprints.get(blueprint_id) else {
            return false;
        };
        if !blueprint.require_support || blueprint.blocks.is_empty() {
            return true;
        }
        let cells: Vec<Vec3> = blueprint
            .placements(anchor, normalize_rotation(rotation))
            .into_iter()
            .map(|(pos, _)| pos)
            .collect();
        let index: BTreeMap<Vec3, usize> = cells.iter().enumerate().map(|(i, pos)| (*pos, i)).collect();
        let mut visited = vec![false; cells.len()];
        let mut queue = VecDeque::new();
        for (i, pos) in cells.iter().enumerate() {
            let below = pos.offset(0, -1, 0);
            let grounded = pos.y <= 1
                || (!index.contains_key(&below) && self.block_at(below) != 0);
            if grounded {
                visited[i] = true;
                queue.push_back(i);
            }
        }
        while let Some(i) = queue.pop_front() {
            for next in cells[i].neighbours6() {
                if let Some(&j) = index.get(&next) {
                    if !visited[j] {
                        visited[j] = true;
                        queue.push_back(j);
                    }
                }
            }
        }
        let supported = visited.iter().filter(|v| **v).count();
        supported > 0 && supported * 1000 >= cells.len() * SUPPORTED_PERMILLE
    }

    pub(super) fn register_structure(&mut self, builder: &str, blueprint_id: &str, anchor: Vec3, rotation: i32) {
        let Some(blueprint) = self.catalog.blueprints.get(blueprint_id) else {
            return;
        };
        let rotation = normalize_rotation(rotation);
        let cells: Vec<Vec3> = blueprint
            .placements(anchor, rotation)
            .into_iter()
            .map(|(pos, _)| pos)
            .collect();
        let first = cells.first().copied().unwrap_or(anchor);
        let (min, max) = cells.iter().fold((first, first), |(lo, hi), pos| {
            (
                Vec3::new(lo.x.min(pos.x), lo.y.min(pos.y), lo.z.min(pos.z)),
                Vec3::new(hi.x.max(pos.x), hi.y.max(pos.y), hi.z.max(pos.z)),
            )
        });
        let now = self.tick;
        let id = structure_id(builder, now, blueprint_id, anchor);
        self.structures.insert(
            id.clone(),
            Structure {
                structure_id: id.clone(),
                blueprint_id: blueprint_id.to_string(),
                builder_id: builder.to_string(),
                anchor,
                rotation,
                min,
                max,
                completed_tick: now,
                award_due_tick: now + self.config.structure_survival_ticks,
                awarded: false,
                used_by: BTreeMap::new(),
                last_influence_day: 0,
            },
        );
        self.audit(
            "STRUCTURE_COMPLETE",
            builder,
            Some(anchor),
            "BUILD_BLUEPRINT",
            json!({"structure_id": id, "blueprint_id": blueprint_id, "rotation": rotation}),
        );
    }

    /// Notes that `agent_id` stood inside each structure's bounds this tick.
    pub(super) fn record_structure_usage(&mut self, agent_id: &str, pos: Vec3) {
        let now = self.tick;
        for structure in self.structures.values_mut() {
            let inside = (structure.min.x..=structure.max.x).contains(&pos.x)
                && (structure.min.y..=structure.max.y).contains(&pos.y)
                && (structure.min.z..=structure.max.z).contains(&pos.z);
            if inside {
                structure.used_by.insert(agent_id.to_string(), now);
            }
        }
    }

    fn structure_users(&self, structure: &Structure, window: u64) -> usize {
        let cutoff = self.tick.saturating_sub(window);
        structure
            .used_by
            .iter()
            .filter(|(agent, last)| **agent != structure.builder_id && **last >= cutoff)
            .count()
    }

    pub(super) fn run_structure_system(&mut self) {
        let now = self.tick;
        let day_ticks = self.config.day_ticks;
        let ids: Vec<String> = self.structures.keys().cloned().collect();
        for id in &ids {
            let Some(structure) = self.structures.get(id).cloned() else {
                continue;
            };
            if structure.awarded || now < structure.award_due_tick {
                continue;
            }
            let placed = self.check_blueprint_placed(&structure.blueprint_id, structure.anchor, structure.rotation);
            let blueprint = self.catalog.blueprints.get(&structure.blueprint_id).cloned();
            let (Some(blueprint), true, true) = (blueprint, placed, self.agents.contains_key(&structure.builder_id)) else {
                self.structures.remove(id);
                continue;
            };
            let stable = self.structure_stable(&structure.blueprint_id, structure.anchor, structure.rotation);
            let users = self.structure_users(&structure, day_ticks);
            let points = creation_points(blueprint.complexity(), module_points(&blueprint), stable, users);
            self.award_fun(&structure.builder_id, FunDim::Creation, "structure", points, "STRUCTURE");
            self.emit(
                &structure.builder_id,
                Event::StructureAward {
                    t: now,
                    structure_id: structure.structure_id.clone(),
                    points,
                },
            );
            if let Some(slot) = self.structures.get_mut(id) {
                slot.awarded = true;
            }
        }

        if day_ticks == 0 || now == 0 || now % day_ticks != 0 {
            return;
        }
        let day = now / day_ticks;
        let ids: Vec<String> = self.structures.keys().cloned().collect();
        for id in &ids {
            let Some(structure) = self.structures.get(id).cloned() else {
                continue;
            };
            if !self.check_blueprint_placed(&structure.blueprint_id, structure.anchor, structure.rotation) {
                self.structures.remove(id);
                continue;
            }
            if structure.last_influence_day == day {
                continue;
            }
            if let Some(slot) = self.structures.get_mut(id) {
                slot.last_influence_day = day;
            }
            let users = self.structure_users(&structure, day_ticks);
            if users == 0 {
                continue;
            }
            let points = influence_points(users);
            self.award_fun(&structure.builder_id, FunDim::Influence, "infra_usage_day", points, "INFRA_USAGE");
        }
    }
}

#[cfg(test)]
mod structure_tests {
    use super::*;

    #[test]
    fn ids_are_positional() {
        assert_eq!(
            structure_id("A000001", 40, "road_turn", Vec3::new(10, 0, -3)),
            "STRUCT_A000001_40_road_turn_10_0_-3"
        );
    }

    #[test]
    fn points_follow_usage_caps() {
        assert_eq!(creation_points(1, 0, false, 0), 5 + 1);
        assert_eq!(creation_points(2, 4, true, 9), 5 + 2 + 4 + 3 + 10);
        assert_eq!(influence_points(1), 3);
        assert_eq!(influence_points(4), 6);
        assert_eq!(influence_points(100), 15);
    }
}
