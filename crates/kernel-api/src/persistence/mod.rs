//! On-disk layout for one data directory.
//!
//! ```text
//! <data>/state.json
//! <data>/worlds/<id>/snapshots/<tick>.snap.zst
//! <data>/worlds/<id>/events/events-<tick:012>.jsonl.zst
//! <data>/worlds/<id>/audit/audit-<tick:012>.jsonl.zst
//! <data>/worlds/<id>/index/world.sqlite
//! ```

mod index;
mod logs;
mod snapshot_file;
mod state_file;

use std::path::{Path, PathBuf};

pub use index::{IndexQuery, SnapshotIndex};
pub use logs::{
    read_audit_dir, read_jsonl, read_tick_log_dir, segment_paths, SegmentWriter, WorldLogs,
    AUDIT_PREFIX, EVENTS_PREFIX,
};
pub use snapshot_file::{read_snapshot, read_snapshot_header, write_snapshot};
pub use state_file::{read_state, write_state, PersistedState, SwitchMetric, STATE_VERSION};

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldPaths {
    root: PathBuf,
}

impl WorldPaths {
    pub fn new(data_dir: impl AsRef<Path>, world_id: &str) -> Self {
        Self {
            root: data_dir.as_ref().join("worlds").join(world_id),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    pub fn snapshot(&self, tick: u64) -> PathBuf {
        self.snapshots_dir().join(format!("{tick}.snap.zst"))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.root.join("events")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.root.join("audit")
    }

    pub fn index_db(&self) -> PathBuf {
        self.root.join("index").join("world.sqlite")
    }

    /// Newest `<tick>.snap.zst` in the snapshots directory, if any.
    pub fn latest_snapshot(&self) -> crate::Result<Option<(u64, PathBuf)>> {
        let dir = self.snapshots_dir();
        if !dir.exists() {
            return Ok(None);
        }
        let mut best: Option<(u64, PathBuf)> = None;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(tick) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.strip_suffix(".snap.zst"))
                .and_then(|stem| stem.parse::<u64>().ok())
            else {
                continue;
            };
            if best.as_ref().map(|(t, _)| tick > *t).unwrap_or(true) {
                best = Some((tick, path));
            }
        }
        Ok(best)
    }
}

pub fn state_file_path(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join(STATE_FILE_NAME)
}

/// `<prefix>-<tick:012>.jsonl.zst`
pub fn segment_file_name(prefix: &str, first_tick: u64) -> String {
    format!("{prefix}-{first_tick:012}.jsonl.zst")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_world_directory_convention() {
        let paths = WorldPaths::new("data", "MINE_L1");
        assert_eq!(paths.snapshot(3000), PathBuf::from("data/worlds/MINE_L1/snapshots/3000.snap.zst"));
        assert_eq!(paths.index_db(), PathBuf::from("data/worlds/MINE_L1/index/world.sqlite"));
        assert_eq!(segment_file_name("events", 42), "events-000000000042.jsonl.zst");
        assert_eq!(state_file_path("data"), PathBuf::from("data/state.json"));
    }
}
