use crate::snapshot_v1::{SnapshotHeader, SnapshotV1, SNAPSHOT_VERSION};

use super::*;

impl VoxelWorld {
    /// Copies every authoritative table; sessions, acks, and pending audit rows are left out.
    pub fn export_snapshot(&self) -> SnapshotV1 {
        SnapshotV1 {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                world_id: self.config.world_id.clone(),
                tick: self.tick,
            },
            config: self.config.clone(),
            catalogs: self.catalog.digests().clone(),
            chunks: self.chunks.chunks().cloned().collect(),
            agents: self.agents.values().cloned().collect(),
            items: self.items.values().cloned().collect(),
            containers: self.containers.values().cloned().collect(),
            signs: self.signs.values().cloned().collect(),
            boards: self.boards.values().cloned().collect(),
            switches: self.switches.values().cloned().collect(),
            conveyors: self.conveyors.values().cloned().collect(),
            claims: self.claims.values().cloned().collect(),
            contracts: self.contracts.values().cloned().collect(),
            laws: self.laws.values().cloned().collect(),
            orgs: self.orgs.values().cloned().collect(),
            structures: self.structures.values().cloned().collect(),
            trades: self.trades.values().cloned().collect(),
            counters: self.counters,
            director: self.director.clone(),
            stats: self.stats.clone(),
        }
    }

    /// Fresh world built from the snapshot's own config.
    pub fn from_snapshot(snapshot: SnapshotV1, catalog: Arc<CatalogBundle>) -> Result<Self, WorldError> {
        let mut world = Self::new(snapshot.config.clone(), catalog);
        world.import_snapshot(snapshot)?;
        Ok(world)
    }

    /// Replaces all tables with the snapshot's; live sessions are rebuilt with a forced full frame.
    pub fn import_snapshot(&mut self, snapshot: SnapshotV1) -> Result<(), WorldError> {
        if snapshot.header.version != SNAPSHOT_VERSION {
            return Err(WorldError::SnapshotVersion(snapshot.header.version));
        }
        if snapshot.header.world_id != self.config.world_id {
            return Err(WorldError::SnapshotWorldMismatch {
                expected: self.config.world_id.clone(),
                got: snapshot.header.world_id,
            });
        }
        if snapshot.config.seed != self.config.seed {
            return Err(WorldError::InvalidSnapshot(format!(
                "seed {} does not match world seed {}",
                snapshot.config.seed, self.config.seed
            )));
        }
        if &snapshot.catalogs != self.catalog.digests() {
            return Err(WorldError::InvalidSnapshot("catalog digests differ".to_string()));
        }
        let height = self.chunks.height();
        let cells = 256 * usize::try_from(height).unwrap_or(1);
        if let Some(bad) = snapshot.chunks.iter().find(|chunk| chunk.blocks.len() != cells) {
            return Err(WorldError::InvalidSnapshot(format!(
                "chunk {},{} has {} cells, expected {cells}",
                bad.cx,
                bad.cz,
                bad.blocks.len()
            )));
        }

        let SnapshotV1 {
            header,
            chunks,
            agents,
            items,
            containers,
            signs,
            boards,
            switches,
            conveyors,
            claims,
            contracts,
            laws,
            orgs,
            structures,
            trades,
            counters,
            director,
            stats,
            ..
        } = snapshot;

        self.chunks.clear();
        for chunk in chunks {
            self.chunks.insert_chunk(chunk);
        }
        self.tick = header.tick;
        self.agents = agents.into_iter().map(|a| (a.id.clone(), a)).collect();
        self.items = items.into_iter().map(|i| (i.id.clone(), i)).collect();
        self.containers = containers.into_iter().map(|c| (c.pos, c)).collect();
        self.signs = signs.into_iter().map(|s| (s.pos, s)).collect();
        self.boards = boards.into_iter().map(|b| (b.pos, b)).collect();
        self.switches = switches.into_iter().map(|s| (s.pos, s)).collect();
        self.conveyors = conveyors.into_iter().map(|c| (c.pos, c)).collect();
        self.claims = claims.into_iter().map(|c| (c.land_id.clone(), c)).collect();
        self.contracts = contracts.into_iter().map(|c| (c.contract_id.clone(), c)).collect();
        self.laws = laws.into_iter().map(|l| (l.law_id.clone(), l)).collect();
        self.orgs = orgs.into_iter().map(|o| (o.org_id.clone(), o)).collect();
        self.structures = structures
            .into_iter()
            .map(|s| (s.structure_id.clone(), s))
            .collect();
        self.trades = trades.into_iter().map(|t| (t.trade_id.clone(), t)).collect();
        self.counters = counters;
        self.director = director;
        self.stats = stats;

        let previous = std::mem::take(&mut self.sessions);
        for agent_id in self.agents.keys() {
            let delta = previous
                .get(agent_id)
                .map(|session| session.delta_voxels)
                .unwrap_or(false);
            self.sessions.insert(agent_id.clone(), AgentSession::new(delta));
        }
        self.acks = dedupe::AckCache::new(self.config.dedupe_capacity);
        self.pending_audit.clear();
        self.pending_external.clear();
        info!(
            world_id = %self.config.world_id,
            tick = self.tick,
            agents = self.agents.len(),
            chunks = self.chunks.loaded_count(),
            "snapshot imported"
        );
        Ok(())
    }
}

#[cfg(test)]
mod snapshot_tests {
    use super::*;

    fn world() -> VoxelWorld {
        let mut config = WorldConfig::default();
        config.world_id = "OVERWORLD".into();
        config.seed = 7;
        VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()))
    }

    #[test]
    fn version_and_world_mismatches_are_rejected() {
        let source = world();
        let mut snapshot = source.export_snapshot();
        snapshot.header.version = 9;
        let mut target = world();
        assert_eq!(target.import_snapshot(snapshot), Err(WorldError::SnapshotVersion(9)));

        let mut snapshot = source.export_snapshot();
        snapshot.header.world_id = "MINE_L1".into();
        assert!(matches!(
            target.import_snapshot(snapshot),
            Err(WorldError::SnapshotWorldMismatch { .. })
        ));
    }

    #[test]
    fn truncated_chunks_are_rejected() {
        let mut source = world();
        source.discover_chunk(Vec3::new(0, 0, 0));
        let mut snapshot = source.export_snapshot();
        snapshot.chunks[0].blocks.pop();
        let mut target = world();
        assert!(matches!(target.import_snapshot(snapshot), Err(WorldError::InvalidSnapshot(_))));
    }
}
