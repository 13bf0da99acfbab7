//! Manager state that must survive a restart: residency, replicated org
//! metadata and world-switch counters.

use std::collections::BTreeMap;
use std::path::Path;

use kernel_core::model::OrgMeta;
use serde::{Deserialize, Serialize};

use crate::{ApiError, Result};

pub const STATE_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchMetric {
    pub from: String,
    pub to: String,
    pub result: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    #[serde(default)]
    pub agent_to_world: BTreeMap<String, String>,
    #[serde(default)]
    pub resume_to_world: BTreeMap<String, String>,
    #[serde(default)]
    pub org_meta: BTreeMap<String, OrgMeta>,
    #[serde(default, alias = "switch_totals")]
    pub switch_metrics: Vec<SwitchMetric>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            agent_to_world: BTreeMap::new(),
            resume_to_world: BTreeMap::new(),
            org_meta: BTreeMap::new(),
            switch_metrics: Vec::new(),
        }
    }
}

pub fn write_state(path: impl AsRef<Path>, state: &PersistedState) -> Result<()> {
    let path = path.as_ref();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(state)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// `Ok(None)` when no state has been written yet.
pub fn read_state(path: impl AsRef<Path>) -> Result<Option<PersistedState>> {
    let path = path.as_ref();
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let state: PersistedState = serde_json::from_slice(&raw)?;
    if state.version > STATE_VERSION {
        return Err(ApiError::Config(format!(
            "state file version {} is newer than supported {STATE_VERSION}",
            state.version
        )));
    }
    Ok(Some(state))
}

#[cfg(test)]
mod tests {
    use kernel_core::model::OrgRole;

    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn state_round_trips_and_accepts_switch_totals_alias() {
        let dir = temp_dir("state-file");
        let path = dir.join("state.json");
        assert_eq!(read_state(&path).expect("missing"), None);

        let mut state = PersistedState::default();
        state.agent_to_world.insert("A000001".into(), "MINE_L1".into());
        state.org_meta.insert(
            "O000001".into(),
            OrgMeta {
                org_id: "O000001".into(),
                kind: None,
                name: "Diggers".into(),
                created_tick: 4,
                meta_version: 2,
                members: BTreeMap::from([("A000001".to_string(), OrgRole::Leader)]),
            },
        );
        state.switch_metrics.push(SwitchMetric {
            from: "OVERWORLD".into(),
            to: "MINE_L1".into(),
            result: "ok".into(),
            count: 3,
        });
        write_state(&path, &state).expect("write");
        assert_eq!(read_state(&path).expect("read"), Some(state));

        std::fs::write(
            &path,
            r#"{"version":2,"switch_totals":[{"from":"A","to":"B","result":"denied","count":1}]}"#,
        )
        .expect("legacy");
        let legacy = read_state(&path).expect("read").expect("present");
        assert_eq!(legacy.switch_metrics[0].result, "denied");
    }
}
