//! Admin rollback: undo audited block writes inside a box by restoring each
//! write's `from` block, newest first, and save the result as a new snapshot.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use kernel_core::audit::AUDIT_SET_BLOCK;
use kernel_core::{AuditEntry, CatalogBundle, Vec3, VoxelWorld};
use tracing::info;

use crate::persistence::{read_audit_dir, read_snapshot, write_snapshot, WorldPaths};
use crate::{ApiError, Result};

const ROLLBACK_ACTOR: &str = "ADMIN";
const ROLLBACK_REASON: &str = "ROLLBACK";

/// Inclusive box; corners may be given in any order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aabb {
    pub min: [i32; 3],
    pub max: [i32; 3],
}

impl Aabb {
    pub fn new(a: [i32; 3], b: [i32; 3]) -> Self {
        let mut min = [0; 3];
        let mut max = [0; 3];
        for axis in 0..3 {
            min[axis] = a[axis].min(b[axis]);
            max[axis] = a[axis].max(b[axis]);
        }
        Self { min, max }
    }

    /// `x1,y1,z1:x2,y2,z2`
    pub fn parse(raw: &str) -> Result<Self> {
        let (a, b) = raw
            .trim()
            .split_once(':')
            .ok_or_else(|| ApiError::Config(format!("aabb {raw:?}: expected x1,y1,z1:x2,y2,z2")))?;
        Ok(Self::new(parse_corner(a)?, parse_corner(b)?))
    }

    pub fn contains(&self, pos: [i32; 3]) -> bool {
        (0..3).all(|axis| pos[axis] >= self.min[axis] && pos[axis] <= self.max[axis])
    }
}

impl FromStr for Aabb {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::parse(raw)
    }
}

fn parse_corner(raw: &str) -> Result<[i32; 3]> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(ApiError::Config(format!("aabb corner {raw:?}: expected x,y,z")));
    }
    let mut corner = [0; 3];
    for (slot, part) in corner.iter_mut().zip(parts) {
        *slot = part
            .parse()
            .map_err(|_| ApiError::Config(format!("aabb corner {raw:?}: {part:?} is not an integer")))?;
    }
    Ok(corner)
}

#[derive(Debug, Clone)]
pub struct RollbackOptions {
    pub data_dir: PathBuf,
    pub world_id: String,
    pub aabb: Aabb,
    /// Defaults to the newest numbered snapshot of the world.
    pub snapshot: Option<PathBuf>,
    pub since_tick: u64,
    /// Inclusive; capped at the snapshot tick.
    pub to_tick: Option<u64>,
    /// Defaults to `snapshots/<tick>.rollback.snap.zst` beside the source.
    pub out: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub snapshot: PathBuf,
    pub snapshot_tick: u64,
    pub since_tick: u64,
    pub to_tick: u64,
    pub entries: usize,
    pub applied: usize,
    pub skipped: usize,
    /// `None` when nothing matched and no snapshot was written.
    pub out: Option<PathBuf>,
}

/// `SET_BLOCK` rows in `[since, to]` inside `aabb`, ordered newest first.
pub fn select_block_writes(entries: Vec<AuditEntry>, aabb: &Aabb, since: u64, to: u64) -> Vec<AuditEntry> {
    let mut selected: Vec<(usize, AuditEntry)> = entries
        .into_iter()
        .enumerate()
        .filter(|(_, entry)| entry.action == AUDIT_SET_BLOCK)
        .filter(|(_, entry)| entry.tick >= since && entry.tick <= to)
        .filter(|(_, entry)| entry.pos.map(|pos| aabb.contains(pos)).unwrap_or(false))
        .collect();
    selected.sort_by(|(ia, a), (ib, b)| (b.tick, b.seq, *ib).cmp(&(a.tick, a.seq, *ia)));
    selected.into_iter().map(|(_, entry)| entry).collect()
}

/// Restores each write's `from` block; returns `(applied, skipped)`.
pub fn apply_rollback(world: &mut VoxelWorld, writes: &[AuditEntry]) -> (usize, usize) {
    let mut applied = 0;
    let mut skipped = 0;
    for write in writes {
        let (Some(pos), Some(from)) = (write.pos, write.from.as_deref()) else {
            skipped += 1;
            continue;
        };
        let pos = Vec3::new(pos[0], pos[1], pos[2]);
        if world.admin_set_block(pos, from, ROLLBACK_ACTOR, ROLLBACK_REASON) {
            applied += 1;
        } else {
            skipped += 1;
        }
    }
    (applied, skipped)
}

pub fn rollback_world(options: &RollbackOptions) -> Result<RollbackReport> {
    let paths = WorldPaths::new(&options.data_dir, &options.world_id);
    let snapshot_path = match &options.snapshot {
        Some(path) => path.clone(),
        None => paths
            .latest_snapshot()?
            .map(|(_, path)| path)
            .ok_or_else(|| ApiError::Config(format!("no snapshot found for world {}", options.world_id)))?,
    };
    let snapshot = read_snapshot(&snapshot_path)?;
    let snapshot_tick = snapshot.tick();
    let to_tick = options
        .to_tick
        .filter(|to| *to != 0)
        .map(|to| to.min(snapshot_tick))
        .unwrap_or(snapshot_tick);

    let writes = select_block_writes(
        read_audit_dir(paths.audit_dir())?,
        &options.aabb,
        options.since_tick,
        to_tick,
    );
    let mut report = RollbackReport {
        snapshot: snapshot_path,
        snapshot_tick,
        since_tick: options.since_tick,
        to_tick,
        entries: writes.len(),
        applied: 0,
        skipped: 0,
        out: None,
    };
    if writes.is_empty() {
        info!(world_id = %options.world_id, "no matching audit entries; nothing to roll back");
        return Ok(report);
    }

    let mut world = VoxelWorld::from_snapshot(snapshot, Arc::new(CatalogBundle::builtin()))?;
    let (applied, skipped) = apply_rollback(&mut world, &writes);
    let out = options
        .out
        .clone()
        .unwrap_or_else(|| default_out(&paths, snapshot_tick));
    write_snapshot(&out, &world.export_snapshot())?;
    info!(
        world_id = %options.world_id,
        tick = snapshot_tick,
        applied,
        skipped,
        out = %out.display(),
        "rollback snapshot written"
    );
    report.applied = applied;
    report.skipped = skipped;
    report.out = Some(out);
    Ok(report)
}

fn default_out(paths: &WorldPaths, tick: u64) -> PathBuf {
    paths.snapshots_dir().join(format!("{tick}.rollback.snap.zst"))
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;

    fn write(tick: u64, seq: u64, pos: [i32; 3], from: &str, to: &str) -> AuditEntry {
        AuditEntry {
            tick,
            seq,
            action: AUDIT_SET_BLOCK.into(),
            actor: "A000001".into(),
            pos: Some(pos),
            from: Some(from.into()),
            to: Some(to.into()),
            reason: "MINE".into(),
            details: Value::Null,
        }
    }

    #[test]
    fn aabb_parses_and_orders_corners() {
        let aabb = Aabb::parse("4,0,-2:-1,0,3").expect("parse");
        assert_eq!(aabb.min, [-1, 0, -2]);
        assert_eq!(aabb.max, [4, 0, 3]);
        assert!(aabb.contains([0, 0, 0]));
        assert!(!aabb.contains([5, 0, 0]));
        assert!("1,2:3,4,5".parse::<Aabb>().is_err());
        assert!(Aabb::parse("1,2,3").is_err());
    }

    #[test]
    fn selection_is_newest_first_and_filtered() {
        let aabb = Aabb::parse("0,0,0:10,0,10").expect("aabb");
        let mut other = write(3, 0, [1, 0, 1], "AIR", "TORCH");
        other.action = "CLAIM_LAND".into();
        let rows = vec![
            write(2, 0, [1, 0, 1], "STONE", "AIR"),
            write(2, 1, [2, 0, 2], "DIRT", "AIR"),
            write(5, 0, [1, 0, 1], "AIR", "PLANK"),
            write(6, 0, [50, 0, 50], "STONE", "AIR"),
            write(9, 0, [1, 0, 1], "PLANK", "AIR"),
            other,
        ];
        let selected = select_block_writes(rows, &aabb, 0, 8);
        let order: Vec<(u64, u64)> = selected.iter().map(|e| (e.tick, e.seq)).collect();
        assert_eq!(order, vec![(5, 0), (2, 1), (2, 0)]);
    }

    #[test]
    fn rollback_restores_the_oldest_from_block() {
        let mut config = kernel_core::WorldConfig::default();
        config.seed = 11;
        let mut world = VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()));
        let pos = Vec3::new(3, 0, 3);
        let original = world.block_name_at(pos).to_string();
        assert!(world.admin_set_block(pos, "PLANK", "A000001", "PLACE"));
        assert!(world.admin_set_block(pos, "STONE", "A000001", "PLACE"));
        let writes = vec![
            write(2, 0, [3, 0, 3], "PLANK", "STONE"),
            write(1, 0, [3, 0, 3], &original, "PLANK"),
        ];
        let (applied, skipped) = apply_rollback(&mut world, &writes);
        assert_eq!((applied, skipped), (2, 0));
        assert_eq!(world.block_name_at(pos), original);
    }
}
