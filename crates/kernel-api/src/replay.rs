//! Deterministic replay: load a snapshot, re-step the logged inputs, and
//! compare every recomputed digest with the logged one.

use std::path::Path;
use std::sync::Arc;

use kernel_core::{CatalogBundle, StepInput, TickLogEntry, VoxelWorld};
use tracing::{debug, info};

use crate::persistence::{read_snapshot, read_tick_log_dir};
use crate::{ApiError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayOptions {
    /// First tick whose digest is compared; earlier ticks are stepped but not checked.
    pub from_tick: Option<u64>,
    /// Last tick to step, inclusive.
    pub to_tick: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub world_id: String,
    pub snapshot_tick: u64,
    pub last_tick: u64,
    /// Ticks whose digest was compared.
    pub checked: u64,
}

/// Steps `world` through `entries` and stops at the first gap or digest mismatch.
pub fn verify_entries(world: &mut VoxelWorld, entries: &[TickLogEntry], options: ReplayOptions) -> Result<ReplayReport> {
    let snapshot_tick = world.tick();
    let verify_from = options.from_tick.unwrap_or(snapshot_tick);
    let mut checked = 0;
    for entry in entries {
        if entry.tick <= snapshot_tick {
            continue;
        }
        if options.to_tick.map(|to| entry.tick > to).unwrap_or(false) {
            break;
        }
        let want = world.tick() + 1;
        if entry.tick != want {
            return Err(ApiError::Replay(format!(
                "tick gap: expected {want}, log has {}",
                entry.tick
            )));
        }
        let outcome = world.step_once(StepInput {
            external: entry.external.clone(),
            joins: entry.joins.clone(),
            leaves: entry.leaves.clone(),
            actions: entry.actions.clone(),
        });
        if outcome.tick >= verify_from {
            checked += 1;
            if outcome.digest != entry.digest {
                return Err(ApiError::DigestMismatch {
                    tick: outcome.tick,
                    got: outcome.digest,
                    want: entry.digest.clone(),
                });
            }
        }
        debug!(tick = outcome.tick, "replayed tick");
    }
    Ok(ReplayReport {
        world_id: world.config().world_id.clone(),
        snapshot_tick,
        last_tick: world.tick(),
        checked,
    })
}

/// Replays every `events-*.jsonl.zst` segment in `events_dir` on top of `snapshot_path`.
pub fn replay_dir(snapshot_path: impl AsRef<Path>, events_dir: impl AsRef<Path>, options: ReplayOptions) -> Result<ReplayReport> {
    let snapshot = read_snapshot(snapshot_path.as_ref())?;
    let mut world = VoxelWorld::from_snapshot(snapshot, Arc::new(CatalogBundle::builtin()))?;
    let entries = read_tick_log_dir(events_dir.as_ref())?;
    if entries.is_empty() {
        return Err(ApiError::Replay(format!(
            "no event segments in {}",
            events_dir.as_ref().display()
        )));
    }
    let report = verify_entries(&mut world, &entries, options)?;
    info!(
        world_id = %report.world_id,
        from = report.snapshot_tick,
        to = report.last_tick,
        checked = report.checked,
        "replay verified"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use contracts::{ActMsg, InstantKind, InstantReq};
    use kernel_core::{ActionEnvelope, JoinSpec, WorldConfig};

    use super::*;

    fn recorded_run(ticks: u64) -> (VoxelWorld, Vec<TickLogEntry>) {
        let mut config = WorldConfig::default();
        config.seed = 7;
        let catalog = Arc::new(CatalogBundle::builtin());
        let mut live = VoxelWorld::new(config, Arc::clone(&catalog));
        let start = VoxelWorld::from_snapshot(live.export_snapshot(), catalog).expect("start");
        let mut entries = Vec::new();
        for tick in 1..=ticks {
            let mut input = StepInput::default();
            if tick == 1 {
                input.joins.push(JoinSpec::new("alpha"));
            }
            if tick == 3 {
                let mut act = ActMsg::new("A000001", 2);
                let mut say = InstantReq::new("say-1", InstantKind::Say);
                say.text = Some("hello".into());
                act.instants.push(say);
                input.actions.push(ActionEnvelope {
                    agent_id: "A000001".into(),
                    act,
                });
            }
            entries.push(live.step_once(input).log);
        }
        (start, entries)
    }

    #[test]
    fn replay_reproduces_every_digest() {
        let (mut world, entries) = recorded_run(6);
        let report = verify_entries(&mut world, &entries, ReplayOptions::default()).expect("replay");
        assert_eq!(report.snapshot_tick, 0);
        assert_eq!(report.last_tick, 6);
        assert_eq!(report.checked, 6);
    }

    #[test]
    fn tampered_digest_names_the_tick() {
        let (mut world, mut entries) = recorded_run(5);
        entries[3].digest = "00".into();
        match verify_entries(&mut world, &entries, ReplayOptions::default()) {
            Err(ApiError::DigestMismatch { tick, want, .. }) => {
                assert_eq!(tick, 4);
                assert_eq!(want, "00");
            }
            other => panic!("expected digest mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_tick_is_a_gap() {
        let (mut world, mut entries) = recorded_run(4);
        entries.remove(1);
        let err = verify_entries(&mut world, &entries, ReplayOptions::default()).expect_err("gap");
        assert!(err.to_string().contains("expected 2"), "{err}");
    }

    #[test]
    fn window_limits_checked_ticks() {
        let (mut world, entries) = recorded_run(6);
        let options = ReplayOptions {
            from_tick: Some(3),
            to_tick: Some(5),
        };
        let report = verify_entries(&mut world, &entries, options).expect("replay");
        assert_eq!(report.last_tick, 5);
        assert_eq!(report.checked, 3);
    }
}
