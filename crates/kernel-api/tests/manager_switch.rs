use std::time::Duration;

use contracts::{ActMsg, ActionResultEvent, ErrorCode, InstantKind, InstantReq, ObsMsg};
use kernel_api::persistence::{read_state, state_file_path};
use kernel_api::{Manager, ManagerOptions, MultiWorldConfig, Outbox};

const WAIT: Duration = Duration::from_secs(3);

fn topology(over_entries: &str, route_from: &str) -> MultiWorldConfig {
    MultiWorldConfig::from_yaml(&format!(
        r#"
default_world_id: OVERWORLD
worlds:
  - id: OVERWORLD
    boundary_r: 128
    switch_cooldown_ticks: 1
    entry_points: {over_entries}
  - id: MINE_L1
    boundary_r: 128
    switch_cooldown_ticks: 300
    entry_points: [{{id: mine_gate, x: 0, z: 0, radius: 8}}]
switch_routes:
  - {{from_world: OVERWORLD, from_entry_id: {route_from}, to_world: MINE_L1, to_entry_id: mine_gate}}
  - {{from_world: MINE_L1, from_entry_id: mine_gate, to_world: OVERWORLD, to_entry_id: {route_from}}}
"#
    ))
    .expect("topology")
}

fn spawn_topology() -> MultiWorldConfig {
    topology("[{id: over_spawn, x: 0, z: 0, radius: 16}]", "over_spawn")
}

fn options(worlds: MultiWorldConfig) -> ManagerOptions {
    ManagerOptions {
        worlds,
        tick_interval: Some(Duration::from_millis(20)),
        ..ManagerOptions::default()
    }
}

fn temp_dir(prefix: &str) -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("voxel-it-{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir");
    dir
}

async fn next_obs(outbox: &Outbox) -> ObsMsg {
    outbox.recv_timeout(WAIT).await.expect("obs within timeout")
}

/// Reads OBS frames until one carries the ACTION_RESULT for `reference`.
async fn wait_result(outbox: &Outbox, reference: &str) -> (ActionResultEvent, ObsMsg) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let obs = outbox
            .recv_timeout(remaining)
            .await
            .unwrap_or_else(|| panic!("no ACTION_RESULT for {reference}"));
        let found = obs
            .events
            .iter()
            .filter_map(|event| event.as_action_result())
            .find(|result| result.reference == reference)
            .cloned();
        if let Some(result) = found {
            return (result, obs);
        }
    }
}

fn switch_act(agent_id: &str, tick: u64, reference: &str, target: &str) -> ActMsg {
    let mut act = ActMsg::new(agent_id, tick);
    let mut instant = InstantReq::new(reference, InstantKind::SwitchWorld);
    instant.target_world_id = Some(target.to_string());
    act.instants.push(instant);
    act
}

#[tokio::test]
async fn switch_inside_entry_moves_the_agent() {
    let manager = Manager::start(options(spawn_topology())).await.expect("start");
    let session = manager.join("agent", true, Some("OVERWORLD")).await.expect("join");
    assert_eq!(session.welcome.current_world_id, "OVERWORLD");
    let obs = next_obs(&session.outbox).await;

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "I_SWITCH_OK", "MINE_L1"))
        .await
        .expect("route");
    let (result, switched) = wait_result(&session.outbox, "I_SWITCH_OK").await;
    assert!(result.ok, "{result:?}");
    assert_eq!(result.from.as_deref(), Some("OVERWORLD"));
    assert_eq!(result.from_entry_id.as_deref(), Some("over_spawn"));
    assert_eq!(result.to_entry_id.as_deref(), Some("mine_gate"));
    assert_eq!(switched.world_id, "MINE_L1");
    assert_eq!(manager.current_world(&session.agent_id).as_deref(), Some("MINE_L1"));
    assert_eq!(manager.switch_total("OVERWORLD", "MINE_L1", "ok"), 1);
    manager.close().await.expect("close");
}

#[tokio::test]
async fn switch_outside_entry_is_denied() {
    let worlds = topology("[{id: over_far, x: 80, z: 80, radius: 2}]", "over_far");
    let manager = Manager::start(options(worlds)).await.expect("start");
    let session = manager.join("agent", true, Some("OVERWORLD")).await.expect("join");
    let obs = next_obs(&session.outbox).await;

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "I_SWITCH_DENY", "MINE_L1"))
        .await
        .expect("route");
    let (result, seen) = wait_result(&session.outbox, "I_SWITCH_DENY").await;
    assert!(!result.ok);
    assert_eq!(result.code, Some(ErrorCode::WorldDenied));
    assert_eq!(result.message.as_deref(), Some("entry point required"));
    assert_eq!(seen.world_id, "OVERWORLD");
    let metrics = manager.switch_metrics();
    let denied = metrics
        .iter()
        .find(|m| m.from == "OVERWORLD" && m.to == "MINE_L1" && m.result == "denied")
        .map(|m| m.count);
    assert_eq!(denied, Some(1));
    manager.close().await.expect("close");
}

#[tokio::test]
async fn switching_back_during_cooldown_is_refused() {
    let manager = Manager::start(options(spawn_topology())).await.expect("start");
    let session = manager.join("agent", false, None).await.expect("join");
    let obs = next_obs(&session.outbox).await;
    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "go", "MINE_L1"))
        .await
        .expect("route");
    let (result, switched) = wait_result(&session.outbox, "go").await;
    assert!(result.ok, "{result:?}");

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, switched.tick, "back", "OVERWORLD"))
        .await
        .expect("route");
    let (result, seen) = wait_result(&session.outbox, "back").await;
    assert_eq!(result.code, Some(ErrorCode::WorldCooldown));
    assert_eq!(result.message.as_deref(), Some("switch cooldown active"));
    assert_eq!(seen.world_id, "MINE_L1");
    assert_eq!(manager.switch_total("MINE_L1", "OVERWORLD", "cooldown"), 1);
    assert_eq!(manager.current_world(&session.agent_id).as_deref(), Some("MINE_L1"));
    manager.close().await.expect("close");
}

#[tokio::test]
async fn routing_guards_reject_bad_targets() {
    let manager = Manager::start(options(spawn_topology())).await.expect("start");
    let session = manager.join("agent", false, Some("ATLANTIS")).await.expect("join");
    assert_eq!(session.welcome.current_world_id, "OVERWORLD");
    let obs = next_obs(&session.outbox).await;

    let mut act = ActMsg::new(&session.agent_id, obs.tick);
    act.expected_world_id = Some("MINE_L1".into());
    manager.route_act(&session.agent_id, act).await.expect("route");
    let (result, _) = wait_result(&session.outbox, "ACT").await;
    assert_eq!(result.code, Some(ErrorCode::WorldBusy));
    assert_eq!(result.message.as_deref(), Some("expected_world_id mismatch"));

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "same", "OVERWORLD"))
        .await
        .expect("route");
    let (result, _) = wait_result(&session.outbox, "same").await;
    assert!(result.ok);
    assert_eq!(result.message.as_deref(), Some("already in target world"));

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "lost", "ATLANTIS"))
        .await
        .expect("route");
    let (result, _) = wait_result(&session.outbox, "lost").await;
    assert_eq!(result.code, Some(ErrorCode::WorldNotFound));
    assert_eq!(manager.switch_total("OVERWORLD", "OVERWORLD", "noop"), 1);
    assert_eq!(manager.switch_total("OVERWORLD", "ATLANTIS", "world_not_found"), 1);
    manager.close().await.expect("close");
}

#[tokio::test]
async fn permit_routes_need_a_grant() {
    let mut worlds = spawn_topology();
    for route in &mut worlds.switch_routes {
        route.requires_permit = true;
    }
    let manager = Manager::start(options(worlds)).await.expect("start");
    let session = manager.join("agent", false, None).await.expect("join");
    let obs = next_obs(&session.outbox).await;

    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "nopermit", "MINE_L1"))
        .await
        .expect("route");
    let (result, _) = wait_result(&session.outbox, "nopermit").await;
    assert_eq!(result.message.as_deref(), Some("permit required"));

    assert!(manager.grant_permit(&session.agent_id, "MINE_L1"));
    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "permit", "MINE_L1"))
        .await
        .expect("route");
    let (result, switched) = wait_result(&session.outbox, "permit").await;
    assert!(result.ok, "{result:?}");
    assert_eq!(switched.world_id, "MINE_L1");
    manager.close().await.expect("close");
}

#[tokio::test]
async fn residency_survives_a_restart() {
    let dir = temp_dir("residency");
    let mut first = options(spawn_topology());
    first.data_dir = Some(dir.clone());
    let manager = Manager::start(first.clone()).await.expect("start");
    let session = manager.join("agent", false, None).await.expect("join");
    let obs = next_obs(&session.outbox).await;
    manager
        .route_act(&session.agent_id, switch_act(&session.agent_id, obs.tick, "go", "MINE_L1"))
        .await
        .expect("route");
    let (result, _) = wait_result(&session.outbox, "go").await;
    assert!(result.ok, "{result:?}");
    manager.close().await.expect("close");

    let state = read_state(state_file_path(&dir)).expect("read").expect("state written");
    assert_eq!(state.agent_to_world.get(&session.agent_id).map(String::as_str), Some("MINE_L1"));
    assert_eq!(
        state.resume_to_world.get(&session.welcome.resume_token).map(String::as_str),
        Some("MINE_L1")
    );
    assert!(state
        .switch_metrics
        .iter()
        .any(|m| m.from == "OVERWORLD" && m.to == "MINE_L1" && m.result == "ok" && m.count == 1));

    let manager = Manager::start(first).await.expect("restart");
    assert_eq!(manager.switch_total("OVERWORLD", "MINE_L1", "ok"), 1);
    let resumed = manager
        .attach(&session.welcome.resume_token, false)
        .await
        .expect("attach");
    assert_eq!(resumed.agent_id, session.agent_id);
    assert_eq!(resumed.welcome.current_world_id, "MINE_L1");
    let obs = next_obs(&resumed.outbox).await;
    assert_eq!(obs.world_id, "MINE_L1");
    manager.close().await.expect("close");
}

#[tokio::test]
async fn repeated_act_id_is_applied_once() {
    let manager = Manager::start(options(spawn_topology())).await.expect("start");
    let session = manager.join("agent", false, None).await.expect("join");
    let obs = next_obs(&session.outbox).await;

    let mut act = ActMsg::new(&session.agent_id, obs.tick);
    act.act_id = Some("act-say-1".into());
    let mut say = InstantReq::new("I_hello", InstantKind::Say);
    say.channel = Some("LOCAL".into());
    say.text = Some("hello".into());
    act.instants.push(say);

    let first = manager
        .route_act(&session.agent_id, act.clone())
        .await
        .expect("route")
        .expect("ack");
    let second = manager
        .route_act(&session.agent_id, act)
        .await
        .expect("route")
        .expect("ack");
    assert!(first.accepted);
    assert_eq!(first.ack_for, "act-say-1");
    assert_eq!(second, first);

    let (result, _) = wait_result(&session.outbox, "I_hello").await;
    assert!(result.ok, "{result:?}");
    let mut repeats = 0;
    for _ in 0..10 {
        let Some(obs) = session.outbox.recv_timeout(Duration::from_millis(100)).await else {
            break;
        };
        repeats += obs
            .events
            .iter()
            .filter_map(|event| event.as_action_result())
            .filter(|result| result.reference == "I_hello")
            .count();
    }
    assert_eq!(repeats, 0);
    manager.close().await.expect("close");
}
