//! Full authoritative world state at a tick.

use serde::{Deserialize, Serialize};

use crate::config::WorldConfig;
use crate::grid::Chunk;
use crate::model::{
    Agent, Board, Claim, Container, Contract, Conveyor, Counters, DirectorState, ItemEntity, Law,
    Org, Sign, StatsBook, Structure, Switch, Trade,
};
use contracts::CatalogDigests;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Informational first line of a snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub version: u32,
    pub world_id: String,
    pub tick: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotV1 {
    pub header: SnapshotHeader,
    /// World params plus operational tunables (rate limits, governance timings, fun decay).
    pub config: WorldConfig,
    pub catalogs: CatalogDigests,
    pub chunks: Vec<Chunk>,
    pub agents: Vec<Agent>,
    pub items: Vec<ItemEntity>,
    pub containers: Vec<Container>,
    pub signs: Vec<Sign>,
    pub boards: Vec<Board>,
    pub switches: Vec<Switch>,
    pub conveyors: Vec<Conveyor>,
    pub claims: Vec<Claim>,
    pub contracts: Vec<Contract>,
    pub laws: Vec<Law>,
    pub orgs: Vec<Org>,
    pub structures: Vec<Structure>,
    pub trades: Vec<Trade>,
    pub counters: Counters,
    pub director: DirectorState,
    pub stats: StatsBook,
}

impl SnapshotV1 {
    pub fn tick(&self) -> u64 {
        self.header.tick
    }

    pub fn world_id(&self) -> &str {
        &self.header.world_id
    }
}
