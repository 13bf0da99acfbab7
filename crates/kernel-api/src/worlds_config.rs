//! Multi-world topology read from `worlds.yaml`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use contracts::WorldRef;
use kernel_core::config::Capabilities;
use kernel_core::WorldConfig;
use serde::{Deserialize, Serialize};

use crate::{ApiError, Result};

pub const DEFAULT_WORLD_ID: &str = "OVERWORLD";
const DEFAULT_ENTRY_RADIUS: i32 = 16;

/// Omitted fields start empty and are filled by [`MultiWorldConfig::normalize`],
/// never from the built-in topology.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MultiWorldConfig {
    #[serde(default)]
    pub default_world_id: String,
    #[serde(default)]
    pub worlds: Vec<WorldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub switch_routes: Vec<SwitchRoute>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub world_type: String,
    pub seed_offset: i64,
    pub boundary_r: i32,
    pub reset_every_ticks: u64,
    pub reset_notice_ticks: u64,
    pub switch_cooldown_ticks: u64,
    pub entry_point_id: String,
    pub requires_permit: bool,
    pub allow_admin_reset: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<EntryPoint>,
    pub allow_claims: bool,
    pub allow_mine: bool,
    pub allow_place: bool,
    pub allow_laws: bool,
    pub allow_trade: bool,
    pub allow_build: bool,
}

impl Default for WorldSpec {
    fn default() -> Self {
        Self {
            id: String::new(),
            world_type: String::new(),
            seed_offset: 0,
            boundary_r: 4000,
            reset_every_ticks: 0,
            reset_notice_ticks: 0,
            switch_cooldown_ticks: 150,
            entry_point_id: String::new(),
            requires_permit: false,
            allow_admin_reset: false,
            entry_points: Vec::new(),
            allow_claims: true,
            allow_mine: true,
            allow_place: true,
            allow_laws: true,
            allow_trade: true,
            allow_build: true,
        }
    }
}

/// Square gate in the XZ plane; membership uses the max-norm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryPoint {
    pub id: String,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub z: i32,
    #[serde(default)]
    pub radius: i32,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl EntryPoint {
    pub fn new(id: impl Into<String>, x: i32, z: i32, radius: i32) -> Self {
        Self {
            id: id.into(),
            x,
            z,
            radius,
            enabled: true,
        }
    }

    pub fn contains(&self, x: i32, z: i32) -> bool {
        (x - self.x).abs() <= self.radius && (z - self.z).abs() <= self.radius
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwitchRoute {
    pub from_world: String,
    pub to_world: String,
    pub from_entry_id: String,
    pub to_entry_id: String,
    pub requires_permit: bool,
}

impl SwitchRoute {
    pub fn new(from_world: &str, from_entry_id: &str, to_world: &str, to_entry_id: &str) -> Self {
        Self {
            from_world: from_world.to_string(),
            to_world: to_world.to_string(),
            from_entry_id: from_entry_id.to_string(),
            to_entry_id: to_entry_id.to_string(),
            requires_permit: false,
        }
    }
}

fn spec(id: &str, seed_offset: i64, boundary_r: i32, reset: u64, notice: u64, cooldown: u64) -> WorldSpec {
    WorldSpec {
        id: id.to_string(),
        world_type: id.to_string(),
        seed_offset,
        boundary_r,
        reset_every_ticks: reset,
        reset_notice_ticks: notice,
        switch_cooldown_ticks: cooldown,
        ..WorldSpec::default()
    }
}

fn default_entry_id(world_id: &str) -> String {
    format!("{}_spawn", world_id.to_ascii_lowercase())
}

impl Default for MultiWorldConfig {
    /// Overworld, three mine levels, and the city hub.
    fn default() -> Self {
        let mut mine_l1 = spec("MINE_L1", 1000, 1200, 12000, 600, 300);
        mine_l1.allow_claims = false;
        mine_l1.allow_laws = false;
        let mut mine_l2 = spec("MINE_L2", 2000, 1000, 10000, 600, 300);
        mine_l2.allow_claims = false;
        mine_l2.allow_laws = false;
        let mut mine_l3 = spec("MINE_L3", 3000, 800, 8000, 600, 300);
        mine_l3.allow_claims = false;
        mine_l3.allow_laws = false;
        mine_l3.allow_build = false;
        let mut city = spec("CITY_HUB", 4000, 600, 0, 0, 150);
        city.allow_mine = false;
        city.allow_claims = false;

        let pairs = [
            ("OVERWORLD", "MINE_L1"),
            ("MINE_L1", "MINE_L2"),
            ("MINE_L2", "MINE_L3"),
            ("OVERWORLD", "CITY_HUB"),
        ];
        let mut switch_routes = Vec::new();
        for (a, b) in pairs {
            let (ea, eb) = (default_entry_id(a), default_entry_id(b));
            switch_routes.push(SwitchRoute::new(a, &ea, b, &eb));
            switch_routes.push(SwitchRoute::new(b, &eb, a, &ea));
        }

        let mut config = Self {
            default_world_id: DEFAULT_WORLD_ID.to_string(),
            worlds: vec![
                spec("OVERWORLD", 0, 4000, 0, 0, 300),
                mine_l1,
                mine_l2,
                mine_l3,
                city,
            ],
            switch_routes,
        };
        config.normalize();
        config
    }
}

impl MultiWorldConfig {
    /// Reads, normalizes, and validates a YAML topology.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut config: Self = serde_yaml::from_str(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Fills defaults: world type, entry points, primary entry, radius floor, all-pairs routes.
    pub fn normalize(&mut self) {
        if self.default_world_id.trim().is_empty() {
            self.default_world_id = self
                .worlds
                .first()
                .map(|world| world.id.clone())
                .unwrap_or_else(|| DEFAULT_WORLD_ID.to_string());
        }
        for world in &mut self.worlds {
            if world.world_type.trim().is_empty() {
                world.world_type = world.id.clone();
            }
            if world.entry_points.is_empty() {
                let id = match world.entry_point_id.trim() {
                    "" => default_entry_id(&world.id),
                    given => given.to_string(),
                };
                world
                    .entry_points
                    .push(EntryPoint::new(id, 0, 0, DEFAULT_ENTRY_RADIUS));
            }
            for entry in &mut world.entry_points {
                entry.radius = entry.radius.max(1);
            }
            if world.entry_point_id.trim().is_empty() {
                world.entry_point_id = world.entry_points[0].id.clone();
            }
        }
        if self.switch_routes.is_empty() {
            for from in &self.worlds {
                for to in &self.worlds {
                    if from.id == to.id {
                        continue;
                    }
                    self.switch_routes.push(SwitchRoute::new(
                        &from.id,
                        &from.entry_point_id,
                        &to.id,
                        &to.entry_point_id,
                    ));
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.worlds.is_empty() {
            return Err(ApiError::Config("worlds must not be empty".into()));
        }
        let mut entries: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for world in &self.worlds {
            let id = world.id.trim();
            if id.is_empty() {
                return Err(ApiError::Config("world id must not be empty".into()));
            }
            if entries.contains_key(id) {
                return Err(ApiError::Config(format!("duplicate world id: {id}")));
            }
            if world.boundary_r <= 0 {
                return Err(ApiError::Config(format!("world {id} boundary_r must be > 0")));
            }
            let notice_ok = match world.reset_every_ticks {
                0 => world.reset_notice_ticks == 0,
                every => world.reset_notice_ticks < every,
            };
            if !notice_ok {
                return Err(ApiError::Config(format!(
                    "world {id} reset_notice_ticks must be in [0, reset_every_ticks)"
                )));
            }
            let mut ids = BTreeSet::new();
            for entry in &world.entry_points {
                let entry_id = entry.id.trim();
                if entry_id.is_empty() {
                    return Err(ApiError::Config(format!("world {id} has an empty entry point id")));
                }
                if !ids.insert(entry_id) {
                    return Err(ApiError::Config(format!(
                        "world {id} duplicate entry point id: {entry_id}"
                    )));
                }
            }
            if !ids.contains(world.entry_point_id.as_str()) {
                return Err(ApiError::Config(format!(
                    "world {id} entry_point_id {:?} not found in entry_points",
                    world.entry_point_id
                )));
            }
            entries.insert(id, ids);
        }
        if !entries.contains_key(self.default_world_id.as_str()) {
            return Err(ApiError::Config(format!(
                "default_world_id {:?} not found in worlds",
                self.default_world_id
            )));
        }
        for (index, route) in self.switch_routes.iter().enumerate() {
            let from = entries.get(route.from_world.as_str()).ok_or_else(|| {
                ApiError::Config(format!(
                    "switch_routes[{index}] from_world {:?} not found",
                    route.from_world
                ))
            })?;
            let to = entries.get(route.to_world.as_str()).ok_or_else(|| {
                ApiError::Config(format!(
                    "switch_routes[{index}] to_world {:?} not found",
                    route.to_world
                ))
            })?;
            if !from.contains(route.from_entry_id.as_str()) {
                return Err(ApiError::Config(format!(
                    "switch_routes[{index}] from_entry_id {:?} not found in {}",
                    route.from_entry_id, route.from_world
                )));
            }
            if !to.contains(route.to_entry_id.as_str()) {
                return Err(ApiError::Config(format!(
                    "switch_routes[{index}] to_entry_id {:?} not found in {}",
                    route.to_entry_id, route.to_world
                )));
            }
        }
        Ok(())
    }

    pub fn world(&self, id: &str) -> Option<&WorldSpec> {
        self.worlds.iter().find(|world| world.id == id)
    }

    /// World refs sorted by id, as sent in WELCOME.
    pub fn manifest(&self) -> Vec<WorldRef> {
        let mut refs: Vec<WorldRef> = self
            .worlds
            .iter()
            .map(|world| WorldRef {
                world_id: world.id.clone(),
                world_type: world.world_type.clone(),
                entry_point_id: Some(world.entry_point_id.clone()),
                switch_cooldown_ticks: world.switch_cooldown_ticks,
                reset_every_ticks: world.reset_every_ticks,
                reset_notice_ticks: world.reset_notice_ticks,
            })
            .collect();
        refs.sort_by(|a, b| a.world_id.cmp(&b.world_id));
        refs
    }

    /// Kernel config for one world: base tunables plus the world's overrides.
    ///
    /// Worlds other than the default one allocate agent ids under their own
    /// prefix so ids stay unique after cross-world transfers.
    pub fn world_config(&self, spec: &WorldSpec, base: &WorldConfig) -> WorldConfig {
        let mut config = base.clone();
        config.world_id = spec.id.clone();
        config.world_type = spec.world_type.clone();
        config.seed = base.seed.wrapping_add(spec.seed_offset);
        config.boundary_r = spec.boundary_r;
        config.reset_every_ticks = spec.reset_every_ticks;
        config.reset_notice_ticks = spec.reset_notice_ticks;
        config.switch_cooldown_ticks = spec.switch_cooldown_ticks;
        config.capabilities = Capabilities {
            allow_claims: spec.allow_claims,
            allow_mine: spec.allow_mine,
            allow_place: spec.allow_place,
            allow_laws: spec.allow_laws,
            allow_trade: spec.allow_trade,
            allow_build: spec.allow_build,
            allow_admin_reset: spec.allow_admin_reset,
        };
        config.agent_id_prefix = if spec.id == self.default_world_id {
            base.agent_id_prefix.clone()
        } else {
            format!("{}-{}", spec.id, base.agent_id_prefix)
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_five_worlds_and_bidirectional_routes() {
        let config = MultiWorldConfig::default();
        config.validate().expect("defaults validate");
        let ids: Vec<&str> = config.worlds.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["OVERWORLD", "MINE_L1", "MINE_L2", "MINE_L3", "CITY_HUB"]);
        assert_eq!(config.switch_routes.len(), 8);
        let l3 = config.world("MINE_L3").expect("mine l3");
        assert!(!l3.allow_build && !l3.allow_claims && !l3.allow_laws && l3.allow_mine);
        assert_eq!(l3.entry_points, vec![EntryPoint::new("mine_l3_spawn", 0, 0, 16)]);
        let hub = config.world("CITY_HUB").expect("hub");
        assert!(!hub.allow_mine && hub.allow_trade && hub.allow_laws);
        assert_eq!(hub.switch_cooldown_ticks, 150);
    }

    #[test]
    fn shipped_worlds_yaml_matches_builtin_topology() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../configs/worlds.yaml");
        let shipped = MultiWorldConfig::load(path).expect("configs/worlds.yaml");
        assert_eq!(shipped, MultiWorldConfig::default());
    }

    #[test]
    fn yaml_without_routes_gets_all_pairs_and_radius_floor() {
        let raw = "
default_world_id: A
worlds:
  - id: A
    entry_points:
      - {id: a_gate, x: 4, z: 4, radius: 0}
  - id: B
  - id: C
";
        let config = MultiWorldConfig::from_yaml(raw).expect("valid yaml");
        assert_eq!(config.switch_routes.len(), 6);
        let a = config.world("A").expect("a");
        assert_eq!(a.entry_point_id, "a_gate");
        assert_eq!(a.entry_points[0].radius, 1);
        assert_eq!(a.world_type, "A");
        assert_eq!(config.world("B").map(|w| w.entry_point_id.as_str()), Some("b_spawn"));
    }

    #[test]
    fn omitted_top_level_fields_come_from_the_file_not_the_builtin() {
        let raw = "
worlds:
  - id: B
  - id: A
";
        let config = MultiWorldConfig::from_yaml(raw).expect("valid yaml");
        assert_eq!(config.default_world_id, "B");
        assert_eq!(config.worlds.len(), 2);
        let routes: Vec<(&str, &str)> = config
            .switch_routes
            .iter()
            .map(|r| (r.from_world.as_str(), r.to_world.as_str()))
            .collect();
        assert_eq!(routes, vec![("B", "A"), ("A", "B")]);

        let empty = MultiWorldConfig::from_yaml("default_world_id: A\n").expect_err("no worlds");
        assert!(empty.to_string().contains("worlds must not be empty"));
    }

    #[test]
    fn validation_rejects_bad_topologies() {
        let duplicate = "worlds:\n  - id: A\n  - id: A\n";
        assert!(matches!(MultiWorldConfig::from_yaml(duplicate), Err(ApiError::Config(_))));

        let notice = "worlds:\n  - id: A\n    reset_every_ticks: 100\n    reset_notice_ticks: 100\n";
        assert!(matches!(MultiWorldConfig::from_yaml(notice), Err(ApiError::Config(_))));

        let dangling = "
worlds:
  - id: A
  - id: B
switch_routes:
  - {from_world: A, to_world: B, from_entry_id: a_spawn, to_entry_id: nowhere}
";
        let err = MultiWorldConfig::from_yaml(dangling).expect_err("dangling route");
        assert!(err.to_string().contains("to_entry_id"));

        let entries = "
worlds:
  - id: A
    entry_points:
      - {id: g, radius: 3}
      - {id: g, radius: 3}
";
        assert!(MultiWorldConfig::from_yaml(entries).is_err());
    }

    #[test]
    fn world_config_applies_offsets_capabilities_and_prefixes() {
        let config = MultiWorldConfig::default();
        let mut base = WorldConfig::default();
        base.seed = 10;
        let mine = config.world_config(config.world("MINE_L1").expect("mine"), &base);
        assert_eq!(mine.seed, 1010);
        assert_eq!(mine.boundary_r, 1200);
        assert_eq!(mine.reset_every_ticks, 12000);
        assert_eq!(mine.agent_id_prefix, "MINE_L1-A");
        assert!(!mine.capabilities.allow_claims);
        let over = config.world_config(config.world("OVERWORLD").expect("over"), &base);
        assert_eq!(over.agent_id_prefix, "A");
        assert_eq!(over.switch_cooldown_ticks, 300);
    }

    #[test]
    fn manifest_is_sorted_by_world_id() {
        let manifest = MultiWorldConfig::default().manifest();
        let ids: Vec<&str> = manifest.iter().map(|w| w.world_id.as_str()).collect();
        assert_eq!(ids, vec!["CITY_HUB", "MINE_L1", "MINE_L2", "MINE_L3", "OVERWORLD"]);
        assert_eq!(manifest[1].entry_point_id.as_deref(), Some("mine_l1_spawn"));
    }
}
