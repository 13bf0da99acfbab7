use sha2::{Digest, Sha256};

use super::*;

impl VoxelWorld {
    /// World with the default terrain generator for `config.world_type`.
    pub fn new(config: WorldConfig, catalog: Arc<CatalogBundle>) -> Self {
        let generator = TerrainGenerator::new(
            config.seed,
            &config.world_type,
            config.biome_region_size,
            config.spawn_clear_radius,
            [
                config.sprinkle_stone_permille,
                config.sprinkle_dirt_permille,
                config.sprinkle_log_permille,
            ],
            &catalog,
        );
        Self::with_generator(config, catalog, Arc::new(generator))
    }

    pub fn with_generator(
        config: WorldConfig,
        catalog: Arc<CatalogBundle>,
        generator: Arc<dyn BlockGenerator>,
    ) -> Self {
        let observer_pool = if config.observer_worker_threads > 1 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(config.observer_worker_threads)
                .build()
                .ok()
                .map(Arc::new)
        } else {
            None
        };
        let acks = dedupe::AckCache::new(config.dedupe_capacity);
        info!(
            world_id = %config.world_id,
            seed = config.seed,
            observer_threads = config.observer_worker_threads,
            "world created"
        );
        Self {
            chunks: ChunkStore::new(config.height),
            config,
            catalog,
            generator,
            tick: 0,
            agents: BTreeMap::new(),
            items: BTreeMap::new(),
            containers: BTreeMap::new(),
            signs: BTreeMap::new(),
            boards: BTreeMap::new(),
            switches: BTreeMap::new(),
            conveyors: BTreeMap::new(),
            claims: BTreeMap::new(),
            contracts: BTreeMap::new(),
            laws: BTreeMap::new(),
            orgs: BTreeMap::new(),
            structures: BTreeMap::new(),
            trades: BTreeMap::new(),
            counters: Counters::default(),
            director: DirectorState::default(),
            stats: StatsBook::default(),
            sessions: BTreeMap::new(),
            acks,
            audit_seq: 0,
            pending_audit: Vec::new(),
            pending_external: Vec::new(),
            observer_pool,
        }
    }

    pub fn world_params(&self) -> contracts::WorldParams {
        contracts::WorldParams::new(
            self.config.tick_rate_hz,
            self.config.height,
            self.config.obs_radius,
            self.config.day_ticks,
            self.config.seed,
        )
    }

    /// Stable token for resuming a session: sha256 over seed, world, and agent id.
    pub fn resume_token_for(seed: i64, world_id: &str, agent_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(seed.to_le_bytes());
        hasher.update(world_id.as_bytes());
        hasher.update([0]);
        hasher.update(agent_id.as_bytes());
        let mut token = hex::encode(hasher.finalize());
        token.truncate(32);
        token
    }

    pub(super) fn join_agent(&mut self, spec: &JoinSpec) -> JoinedAgent {
        let index = self.counters.next_agent;
        let prefix = self.config.agent_id_prefix.clone();
        let agent_id = Self::next_id(&mut self.counters.next_agent, &prefix);
        let name = match spec.name.trim() {
            "" => agent_id.clone(),
            trimmed => trimmed.chars().take(40).collect(),
        };
        let token = Self::resume_token_for(self.config.seed, &self.config.world_id, &agent_id);
        let pos = self.spawn_point(index);
        let mut agent = Agent::new(agent_id.clone(), name.clone(), token.clone(), pos, index);
        for (item, count) in &self.config.starter_items {
            inv_add(&mut agent.inventory, item, *count);
        }
        agent.seen_biomes.insert(self.biome_at(pos).to_string());
        self.agents.insert(agent_id.clone(), agent);
        self.sessions
            .insert(agent_id.clone(), AgentSession::new(spec.delta_voxels));
        self.discover_chunk(pos);
        if let Some(event) = self.active_event_notice() {
            self.emit(&agent_id, event);
        }
        debug!(world_id = %self.config.world_id, agent_id = %agent_id, tick = self.tick, "agent joined");
        JoinedAgent {
            agent_id,
            name,
            resume_token: token,
        }
    }

    /// Rebinds transport state for an agent already in the table.
    pub fn attach_session(&mut self, agent_id: &str, delta_voxels: bool) -> Result<(), WorldError> {
        if !self.agents.contains_key(agent_id) {
            return Err(WorldError::AgentNotFound(agent_id.to_string()));
        }
        let session = self
            .sessions
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentSession::new(delta_voxels));
        session.delta_voxels = delta_voxels;
        session.force_full = true;
        debug!(world_id = %self.config.world_id, agent_id, "session attached");
        Ok(())
    }

    /// Removes an agent, releasing task escrow and pending trades.
    pub(super) fn remove_agent(&mut self, agent_id: &str) -> Option<Agent> {
        self.cancel_all_tasks(agent_id, "agent left");
        let trades: Vec<String> = self
            .trades
            .values()
            .filter(|trade| trade.from == agent_id || trade.to == agent_id)
            .map(|trade| trade.trade_id.clone())
            .collect();
        for trade_id in trades {
            self.trades.remove(&trade_id);
        }
        self.sessions.remove(agent_id);
        self.acks.forget_agent(agent_id);
        let agent = self.agents.remove(agent_id);
        if agent.is_some() {
            debug!(world_id = %self.config.world_id, agent_id, tick = self.tick, "agent left");
        }
        agent
    }
}
