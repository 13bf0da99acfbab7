//! Headless single-world run with scripted bots, stepping the runtime by hand
//! so the same seed always produces the same logs and digests.

use std::path::PathBuf;
use std::sync::Arc;

use contracts::{ActMsg, InstantKind, InstantReq, ObsMsg, TaskReq};
use kernel_core::rng::hash3;
use kernel_core::{ActionEnvelope, CatalogBundle, JoinSpec, StepInput, VoxelWorld, WorldConfig};
use tracing::{debug, info};

use crate::outbox::Outbox;
use crate::runtime::{RuntimeOptions, WorldHandle};
use crate::worlds_config::MultiWorldConfig;
use crate::{ApiError, Result};

const SAY_EVERY_TICKS: u64 = 100;
const MOVE_EVERY_TICKS: u64 = 200;
const MOVE_PHASE: u64 = 10;
const MOVE_SPREAD: i64 = 15;

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub world_id: String,
    pub seed: i64,
    pub ticks: u64,
    pub bots: usize,
    /// `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub snapshot_every_ticks: Option<u64>,
    pub worlds: MultiWorldConfig,
}

impl Default for SimulateOptions {
    fn default() -> Self {
        Self {
            world_id: crate::worlds_config::DEFAULT_WORLD_ID.to_string(),
            seed: 1,
            ticks: 100,
            bots: 2,
            data_dir: None,
            snapshot_every_ticks: None,
            worlds: MultiWorldConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateReport {
    pub world_id: String,
    pub final_tick: u64,
    pub digest: String,
    pub agents: Vec<String>,
    pub acts_sent: u64,
}

/// Chats every 100 ticks and wanders to a nearby spot every 200.
#[derive(Debug, Clone)]
struct ScriptedBot {
    agent_id: String,
    index: i64,
    outbox: Outbox,
}

impl ScriptedBot {
    fn decide(&self, seed: i64, obs: &ObsMsg) -> Option<ActMsg> {
        let mut act = ActMsg::new(&self.agent_id, obs.tick);
        if obs.tick % SAY_EVERY_TICKS == 0 {
            let mut say = InstantReq::new(format!("I_say_{}", obs.tick), InstantKind::Say);
            say.channel = Some("LOCAL".into());
            say.text = Some(format!("tick={} pos={:?}", obs.tick, obs.self_state.pos));
            act.instants.push(say);
        }
        if obs.tick % MOVE_EVERY_TICKS == MOVE_PHASE {
            let [x, y, z] = obs.self_state.pos;
            let roll = hash3(seed, obs.tick as i64, self.index, 0x6d6f7665);
            let dx = (roll % MOVE_SPREAD as u64) as i64 - MOVE_SPREAD / 2;
            let dz = ((roll >> 16) % MOVE_SPREAD as u64) as i64 - MOVE_SPREAD / 2;
            act.tasks.push(TaskReq::move_to(
                format!("K_move_{}", obs.tick),
                [x + dx as i32, y, z + dz as i32],
                1.2,
            ));
        }
        (!act.instants.is_empty() || !act.tasks.is_empty()).then_some(act)
    }
}

fn world_config(options: &SimulateOptions) -> Result<WorldConfig> {
    let spec = options
        .worlds
        .world(&options.world_id)
        .ok_or_else(|| ApiError::WorldNotFound(options.world_id.clone()))?;
    let base = WorldConfig {
        seed: options.seed,
        ..WorldConfig::default()
    };
    let mut config = options.worlds.world_config(spec, &base);
    if let Some(every) = options.snapshot_every_ticks.filter(|every| *every > 0) {
        config.snapshot_every_ticks = every;
    }
    Ok(config)
}

pub async fn simulate(options: SimulateOptions) -> Result<SimulateReport> {
    let config = world_config(&options)?;
    let seed = config.seed;
    let outbox_capacity = config.outbox_capacity;
    let world = VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()));
    let mut runtime = RuntimeOptions::default().with_manifest(options.worlds.manifest());
    if let Some(dir) = &options.data_dir {
        runtime = runtime.with_data_dir(dir.clone());
    }
    let handle = WorldHandle::spawn(world, runtime)?;
    info!(world_id = %options.world_id, seed, ticks = options.ticks, bots = options.bots, "simulation started");

    let result = drive(&handle, &options, seed, outbox_capacity).await;
    let closed = handle.shutdown().await;
    let report = result?;
    closed?;
    info!(
        world_id = %report.world_id,
        tick = report.final_tick,
        digest = %report.digest,
        acts = report.acts_sent,
        "simulation finished"
    );
    Ok(report)
}

async fn drive(handle: &WorldHandle, options: &SimulateOptions, seed: i64, outbox_capacity: usize) -> Result<SimulateReport> {
    let joins = (0..options.bots)
        .map(|n| JoinSpec::new(format!("bot-{}", n + 1)))
        .collect();
    let mut last = handle
        .step_once(StepInput {
            joins,
            ..StepInput::default()
        })
        .await?;
    let mut bots = Vec::with_capacity(last.joined.len());
    for (index, joined) in last.joined.iter().enumerate() {
        let outbox = Outbox::new(outbox_capacity);
        handle
            .attach(&joined.resume_token, false, outbox.clone())
            .await?;
        bots.push(ScriptedBot {
            agent_id: joined.agent_id.clone(),
            index: index as i64,
            outbox,
        });
    }

    let mut acts_sent = 0;
    while last.tick < options.ticks {
        for bot in &bots {
            let Some(obs) = bot.outbox.drain().pop() else {
                continue;
            };
            if let Some(act) = bot.decide(seed, &obs) {
                debug!(agent_id = %bot.agent_id, tick = obs.tick, "bot act");
                handle
                    .submit(ActionEnvelope {
                        agent_id: bot.agent_id.clone(),
                        act,
                    })
                    .await?;
                acts_sent += 1;
            }
        }
        last = handle.step_once(StepInput::default()).await?;
    }

    Ok(SimulateReport {
        world_id: handle.world_id().to_string(),
        final_tick: last.tick,
        digest: last.digest,
        agents: bots.into_iter().map(|bot| bot.agent_id).collect(),
        acts_sent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{read_tick_log_dir, WorldPaths};
    use crate::replay::{replay_dir, ReplayOptions};
    use crate::test_support::temp_dir;

    #[tokio::test]
    async fn same_seed_same_digest() {
        let options = SimulateOptions {
            ticks: 220,
            ..SimulateOptions::default()
        };
        let first = simulate(options.clone()).await.expect("first run");
        let second = simulate(options).await.expect("second run");
        assert_eq!(first.final_tick, 220);
        assert_eq!(first.agents, vec!["A000001".to_string(), "A000002".to_string()]);
        assert_eq!(first.digest, second.digest);
        assert!(first.acts_sent >= 4, "acts sent: {}", first.acts_sent);
    }

    #[tokio::test]
    async fn unknown_world_is_rejected() {
        let options = SimulateOptions {
            world_id: "NOWHERE".into(),
            ..SimulateOptions::default()
        };
        assert!(matches!(simulate(options).await, Err(ApiError::WorldNotFound(_))));
    }

    #[tokio::test]
    async fn persisted_run_replays_cleanly() {
        let dir = temp_dir("simulate");
        let options = SimulateOptions {
            world_id: "MINE_L1".into(),
            seed: 9,
            ticks: 120,
            data_dir: Some(dir.clone()),
            snapshot_every_ticks: Some(50),
            ..SimulateOptions::default()
        };
        let report = simulate(options).await.expect("simulate");
        let paths = WorldPaths::new(&dir, "MINE_L1");
        assert!(paths.snapshot(0).exists());
        assert!(paths.snapshot(50).exists());
        assert!(paths.snapshot(100).exists());
        let entries = read_tick_log_dir(paths.events_dir()).expect("log");
        assert_eq!(entries.len(), 120);

        let replayed = replay_dir(paths.snapshot(0), paths.events_dir(), ReplayOptions::default()).expect("replay");
        assert_eq!(replayed.last_tick, report.final_tick);
        assert_eq!(replayed.checked, 120);
    }
}
