//! World tunables. Every field has a default so YAML and snapshots may omit it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitSpec {
    pub window_ticks: u64,
    pub max: u32,
}

impl RateLimitSpec {
    pub const fn new(window_ticks: u64, max: u32) -> Self {
        Self { window_ticks, max }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Capabilities {
    pub allow_claims: bool,
    pub allow_mine: bool,
    pub allow_place: bool,
    pub allow_laws: bool,
    pub allow_trade: bool,
    pub allow_build: bool,
    pub allow_admin_reset: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            allow_claims: true,
            allow_mine: true,
            allow_place: true,
            allow_laws: true,
            allow_trade: true,
            allow_build: true,
            allow_admin_reset: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorldConfig {
    pub world_id: String,
    pub world_type: String,
    pub seed: i64,
    /// Prefix for locally allocated agent ids; worlds sharing a manager need distinct prefixes.
    pub agent_id_prefix: String,

    pub tick_rate_hz: u32,
    pub day_ticks: u64,
    pub season_length_ticks: u64,
    pub reset_every_ticks: u64,
    pub reset_notice_ticks: u64,
    pub switch_cooldown_ticks: u64,
    pub obs_radius: i32,
    pub height: i32,
    pub boundary_r: i32,

    pub biome_region_size: i32,
    pub spawn_clear_radius: i32,
    pub sprinkle_stone_permille: u32,
    pub sprinkle_dirt_permille: u32,
    pub sprinkle_log_permille: u32,

    pub starter_items: BTreeMap<String, u32>,

    pub snapshot_every_ticks: u64,
    pub director_every_ticks: u64,

    pub rate_limits: BTreeMap<String, RateLimitSpec>,

    pub law_notice_ticks: u64,
    pub law_vote_ticks: u64,

    pub blueprint_auto_pull_range: i32,
    pub blueprint_blocks_per_tick: usize,

    pub access_pass_core_radius: i32,
    pub maintenance_cost: BTreeMap<String, u32>,

    pub fun_decay_window_ticks: u64,
    pub fun_decay_base_permille: u64,
    pub structure_survival_ticks: u64,

    pub capabilities: Capabilities,

    pub stale_tick_tolerance: u64,
    pub max_events_per_obs: usize,
    pub outbox_capacity: usize,
    pub dedupe_capacity: usize,
    pub delta_full_every_ticks: u64,
    pub detour_max_depth: usize,
    pub observer_worker_threads: usize,
    pub event_history: usize,
}

pub const RATE_SAY: &str = "SAY";
pub const RATE_SAY_MARKET: &str = "SAY_MARKET";
pub const RATE_WHISPER: &str = "WHISPER";
pub const RATE_OFFER_TRADE: &str = "OFFER_TRADE";
pub const RATE_POST_BOARD: &str = "POST_BOARD";

impl Default for WorldConfig {
    fn default() -> Self {
        let day_ticks = 6000;
        let season = day_ticks * 7;
        let starter_items = [("PLANK", 20), ("COAL", 10), ("STONE", 20), ("BERRIES", 10)]
            .into_iter()
            .map(|(item, count)| (item.to_string(), count))
            .collect();
        let rate_limits = [
            (RATE_SAY, RateLimitSpec::new(50, 5)),
            (RATE_SAY_MARKET, RateLimitSpec::new(50, 2)),
            (RATE_WHISPER, RateLimitSpec::new(50, 5)),
            (RATE_OFFER_TRADE, RateLimitSpec::new(50, 3)),
            (RATE_POST_BOARD, RateLimitSpec::new(600, 1)),
        ]
        .into_iter()
        .map(|(kind, spec)| (kind.to_string(), spec))
        .collect();
        let maintenance_cost = [("IRON_INGOT", 1), ("COAL", 1)]
            .into_iter()
            .map(|(item, count)| (item.to_string(), count))
            .collect();

        Self {
            world_id: "OVERWORLD".to_string(),
            world_type: "OVERWORLD".to_string(),
            seed: 0,
            agent_id_prefix: "A".to_string(),
            tick_rate_hz: 5,
            day_ticks,
            season_length_ticks: season,
            reset_every_ticks: season,
            reset_notice_ticks: 0,
            switch_cooldown_ticks: 150,
            obs_radius: 7,
            height: 1,
            boundary_r: 4000,
            biome_region_size: 64,
            spawn_clear_radius: 6,
            sprinkle_stone_permille: 12,
            sprinkle_dirt_permille: 4,
            sprinkle_log_permille: 2,
            starter_items,
            snapshot_every_ticks: 3000,
            director_every_ticks: 3000,
            rate_limits,
            law_notice_ticks: 3000,
            law_vote_ticks: 3000,
            blueprint_auto_pull_range: 32,
            blueprint_blocks_per_tick: 2,
            access_pass_core_radius: 16,
            maintenance_cost,
            fun_decay_window_ticks: 3000,
            fun_decay_base_permille: 700,
            structure_survival_ticks: 3000,
            capabilities: Capabilities::default(),
            stale_tick_tolerance: 2,
            max_events_per_obs: 256,
            outbox_capacity: 64,
            dedupe_capacity: 256,
            delta_full_every_ticks: 100,
            detour_max_depth: 24,
            observer_worker_threads: 1,
            event_history: 512,
        }
    }
}

impl WorldConfig {
    pub fn rate_limit(&self, kind: &str) -> Option<RateLimitSpec> {
        self.rate_limits.get(kind).copied()
    }

    pub fn time_of_day(&self, tick: u64) -> f64 {
        if self.day_ticks == 0 {
            return 0.0;
        }
        (tick % self.day_ticks) as f64 / self.day_ticks as f64
    }

    pub fn day_index(&self, tick: u64) -> u64 {
        tick / self.day_ticks.max(1)
    }

    pub fn in_bounds_xz(&self, x: i32, z: i32) -> bool {
        x.abs() <= self.boundary_r && z.abs() <= self.boundary_r
    }
}

/// Returns `(true, now + notice)` exactly `notice` ticks before each reset boundary.
pub fn should_world_reset_notice(now: u64, cycle: u64, notice: u64) -> (bool, u64) {
    if now == 0 || cycle == 0 || notice == 0 || notice >= cycle {
        return (false, 0);
    }
    if now % cycle == cycle - notice {
        (true, now + notice)
    } else {
        (false, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_documented_tunables() {
        let cfg = WorldConfig::default();
        assert_eq!(cfg.season_length_ticks, 42_000);
        assert_eq!(cfg.rate_limit(RATE_POST_BOARD), Some(RateLimitSpec::new(600, 1)));
        assert_eq!(cfg.starter_items.get("BERRIES"), Some(&10));
        assert!(cfg.capabilities.allow_claims);
        assert!(!cfg.capabilities.allow_admin_reset);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: WorldConfig =
            serde_json::from_str(r#"{"world_id":"MINE_L1","seed":7}"#).expect("parse");
        assert_eq!(cfg.world_id, "MINE_L1");
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.obs_radius, 7);
    }

    #[test]
    fn reset_notice_fires_once_per_cycle() {
        assert_eq!(should_world_reset_notice(9400, 10_000, 600), (true, 10_000));
        assert_eq!(should_world_reset_notice(19_400, 10_000, 600), (true, 20_000));
        assert_eq!(should_world_reset_notice(9401, 10_000, 600), (false, 0));
        assert_eq!(should_world_reset_notice(0, 10_000, 600), (false, 0));
        assert_eq!(should_world_reset_notice(9400, 10_000, 0), (false, 0));
    }
}
