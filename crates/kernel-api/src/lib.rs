//! World runtimes, the multi-world manager, and everything that touches disk:
//! snapshots, tick and audit logs, the snapshot index, replay, and rollback.

pub mod manager;
pub mod outbox;
pub mod persistence;
pub mod replay;
pub mod rollback;
pub mod runtime;
pub mod simulate;
pub mod worlds_config;

use std::path::PathBuf;

use kernel_core::WorldError;

pub use manager::{Manager, ManagerOptions, Session};
pub use outbox::Outbox;
pub use replay::{replay_dir, verify_entries, ReplayOptions, ReplayReport};
pub use rollback::{rollback_world, Aabb, RollbackOptions, RollbackReport};
pub use runtime::{RuntimeOptions, WorldHandle};
pub use simulate::{simulate, SimulateOptions, SimulateReport};
pub use worlds_config::{EntryPoint, MultiWorldConfig, SwitchRoute, WorldSpec};

pub const DATA_DIR_ENV: &str = "VOXEL_DATA_DIR";
pub const WORLDS_CONFIG_ENV: &str = "VOXEL_WORLDS_CONFIG";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_WORLDS_CONFIG: &str = "configs/worlds.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("cbor error: {0}")]
    Cbor(#[from] serde_cbor::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("world error: {0}")]
    World(#[from] WorldError),
    #[error("config error: {0}")]
    Config(String),
    #[error("world not found: {0}")]
    WorldNotFound(String),
    #[error("world {0} did not answer in time")]
    Timeout(String),
    #[error("world {0} is closed")]
    WorldClosed(String),
    #[error("digest mismatch at tick {tick}: got {got}, want {want}")]
    DigestMismatch { tick: u64, got: String, want: String },
    #[error("replay error: {0}")]
    Replay(String),
    #[error("transfer error: {0}")]
    Transfer(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

/// `VOXEL_DATA_DIR`, or `data` when unset or blank.
pub fn data_dir() -> PathBuf {
    env_path(DATA_DIR_ENV, DEFAULT_DATA_DIR)
}

/// `VOXEL_WORLDS_CONFIG`, or `configs/worlds.yaml` when unset or blank.
pub fn worlds_config_path() -> PathBuf {
    env_path(WORLDS_CONFIG_ENV, DEFAULT_WORLDS_CONFIG)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static NEXT: AtomicU64 = AtomicU64::new(0);

    /// Fresh directory under the system temp dir.
    pub fn temp_dir(prefix: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = std::env::temp_dir().join(format!(
            "voxel-{prefix}-{}-{}-{nanos}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_mismatch_names_the_tick() {
        let err = ApiError::DigestMismatch {
            tick: 7,
            got: "aa".into(),
            want: "bb".into(),
        };
        assert_eq!(err.to_string(), "digest mismatch at tick 7: got aa, want bb");
    }

    #[test]
    fn blank_env_value_falls_back_to_default() {
        std::env::set_var("VOXEL_TEST_BLANK_PATH", "   ");
        assert_eq!(env_path("VOXEL_TEST_BLANK_PATH", "fallback"), PathBuf::from("fallback"));
        std::env::set_var("VOXEL_TEST_BLANK_PATH", "elsewhere");
        assert_eq!(env_path("VOXEL_TEST_BLANK_PATH", "fallback"), PathBuf::from("elsewhere"));
    }
}
