use std::sync::Arc;
use std::time::Instant;

use contracts::{ActMsg, ErrorCode, Event, InstantReq, TaskReq};
use kernel_core::{
    ActionEnvelope, CatalogBundle, JoinSpec, StepInput, StepOutcome, VoxelWorld, WorldConfig,
};

const PERF_SMOKE_MAX_MS: u128 = 6_000;

fn world_with(configure: impl FnOnce(&mut WorldConfig)) -> VoxelWorld {
    let mut cfg = WorldConfig::default();
    cfg.seed = 99;
    configure(&mut cfg);
    VoxelWorld::new(cfg, Arc::new(CatalogBundle::builtin()))
}

fn submit(world: &mut VoxelWorld, act: ActMsg) -> StepOutcome {
    world.step_once(StepInput {
        actions: vec![ActionEnvelope {
            agent_id: act.agent_id.clone(),
            act,
        }],
        ..StepInput::default()
    })
}

fn codes(outcome: &StepOutcome) -> Vec<(String, Option<ErrorCode>)> {
    outcome
        .observations
        .iter()
        .flat_map(|obs| obs.events.iter())
        .filter_map(Event::as_action_result)
        .map(|result| (result.reference.clone(), result.code))
        .collect()
}

#[test]
fn unknown_kinds_are_protocol_errors() {
    let mut world = world_with(|_| {});
    world.step_once(StepInput {
        joins: vec![JoinSpec::new("bot")],
        ..StepInput::default()
    });
    let mut instant = InstantReq::default();
    instant.id = "i1".to_string();
    instant.kind = "TELEPORT".to_string();
    let mut task = TaskReq::default();
    task.id = "t1".to_string();
    task.kind = "DIG_TO_CORE".to_string();
    let mut act = ActMsg::new("A000001", 2);
    act.instants.push(instant);
    act.tasks.push(task);
    let outcome = submit(&mut world, act);
    let codes = codes(&outcome);
    assert!(codes.contains(&("i1".to_string(), Some(ErrorCode::ProtoBadRequest))));
    assert!(codes.contains(&("t1".to_string(), Some(ErrorCode::ProtoBadRequest))));
}

#[test]
fn disabled_capabilities_reject_with_no_permission() {
    let mut world = world_with(|cfg| {
        cfg.capabilities.allow_mine = false;
        cfg.capabilities.allow_build = false;
    });
    world.step_once(StepInput {
        joins: vec![JoinSpec::new("bot")],
        ..StepInput::default()
    });
    let mut mine = TaskReq::new("m", contracts::TaskKind::Mine);
    mine.block_pos = Some([1, 0, 1]);
    let mut build = TaskReq::new("b", contracts::TaskKind::BuildBlueprint);
    build.blueprint_id = Some("road_turn".to_string());
    build.anchor = Some([3, 0, 3]);
    let outcome = submit(&mut world, ActMsg::new("A000001", 2).with_task(mine));
    assert!(codes(&outcome).contains(&("m".to_string(), Some(ErrorCode::NoPermission))));
    let outcome = submit(&mut world, ActMsg::new("A000001", 3).with_task(build));
    assert!(codes(&outcome).contains(&("b".to_string(), Some(ErrorCode::NoPermission))));
}

#[test]
fn occupied_task_slot_is_a_conflict() {
    let mut world = world_with(|_| {});
    world.step_once(StepInput {
        joins: vec![JoinSpec::new("bot")],
        ..StepInput::default()
    });
    let act = ActMsg::new("A000001", 2)
        .with_task(TaskReq::move_to("first", [30, 0, 30], 0.0))
        .with_task(TaskReq::move_to("second", [-30, 0, 30], 0.0));
    let outcome = submit(&mut world, act);
    let codes = codes(&outcome);
    assert!(codes.contains(&("first".to_string(), None)));
    assert!(codes.contains(&("second".to_string(), Some(ErrorCode::Conflict))));
}

#[test]
fn leave_and_unknown_agents_are_ignored() {
    let mut world = world_with(|_| {});
    world.step_once(StepInput {
        joins: vec![JoinSpec::new("bot")],
        ..StepInput::default()
    });
    let outcome = world.step_once(StepInput {
        leaves: vec!["A000001".to_string(), "A000404".to_string(), " ".to_string()],
        actions: vec![ActionEnvelope {
            agent_id: "A000404".to_string(),
            act: ActMsg::new("A000404", 2).with_task(TaskReq::move_to("x", [1, 0, 1], 1.0)),
        }],
        ..StepInput::default()
    });
    assert!(outcome.observations.is_empty());
    assert_eq!(outcome.log.leaves.len(), 2);
    assert!(world.agent("A000001").is_none());
}

#[test]
fn perf_smoke_thousand_ticks_with_agents_under_threshold() {
    let started = Instant::now();
    let mut world = world_with(|_| {});
    world.step_once(StepInput {
        joins: (0..8).map(|n| JoinSpec::new(format!("bot{n}"))).collect(),
        ..StepInput::default()
    });
    for _ in 0..1_000 {
        world.step_once(StepInput::default());
    }
    let elapsed = started.elapsed().as_millis();
    assert!(
        elapsed <= PERF_SMOKE_MAX_MS,
        "perf smoke exceeded threshold: elapsed_ms={} threshold_ms={}",
        elapsed,
        PERF_SMOKE_MAX_MS
    );
    assert_eq!(world.tick(), 1_001);
}
