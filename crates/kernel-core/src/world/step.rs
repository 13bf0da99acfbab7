use tracing::warn;

use super::*;

/// Everything one tick consumes, in the order it is applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInput {
    /// Between-tick mutations to re-apply first; live runtimes leave this empty.
    pub external: Vec<ExternalOp>,
    pub joins: Vec<JoinSpec>,
    pub leaves: Vec<String>,
    pub actions: Vec<ActionEnvelope>,
}

impl StepInput {
    pub fn is_empty(&self) -> bool {
        self.external.is_empty()
            && self.joins.is_empty()
            && self.leaves.is_empty()
            && self.actions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedAgent {
    pub agent_id: String,
    pub name: String,
    pub resume_token: String,
}

#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub tick: u64,
    pub digest: String,
    /// One entry per `StepInput::joins`, same order.
    pub joined: Vec<JoinedAgent>,
    pub observations: Vec<ObsMsg>,
    pub audit: Vec<AuditEntry>,
    pub log: TickLogEntry,
}

impl VoxelWorld {
    /// Advances exactly one tick.
    ///
    /// Order: external ops, tick advance, joins, leaves, actions by agent id
    /// (stable, so each agent keeps submission order), the fixed system
    /// sequence, digest, log entry, then observations.
    pub fn step_once(&mut self, input: StepInput) -> StepOutcome {
        let StepInput {
            external,
            joins,
            mut leaves,
            mut actions,
        } = input;
        for op in external {
            if let Err(err) = self.apply_external(op) {
                warn!(world_id = %self.config.world_id, tick = self.tick, error = %err, "external op failed");
            }
        }
        let external = std::mem::take(&mut self.pending_external);

        self.tick += 1;
        let now = self.tick;

        let joined: Vec<JoinedAgent> = joins.iter().map(|spec| self.join_agent(spec)).collect();

        leaves.retain(|agent_id| !agent_id.trim().is_empty());
        for agent_id in &leaves {
            self.remove_agent(agent_id);
        }

        actions.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        for envelope in &actions {
            self.apply_envelope(envelope);
        }

        self.run_systems();

        let digest = self.state_digest();
        let log = TickLogEntry {
            tick: now,
            joins,
            leaves,
            actions,
            external,
            digest: digest.clone(),
        };
        let observations = self.build_observations();
        let audit = std::mem::take(&mut self.pending_audit);
        debug!(
            world_id = %self.config.world_id,
            tick = now,
            agents = self.agents.len(),
            audit = audit.len(),
            "tick complete"
        );
        StepOutcome {
            tick: now,
            digest,
            joined,
            observations,
            audit,
            log,
        }
    }

    fn run_systems(&mut self) {
        self.run_movement_system();
        self.run_work_system();
        self.run_survival_system();
        self.run_economy_system();
        self.run_contract_system();
        self.run_law_system();
        self.run_conveyor_system();
        self.run_director_system();
        self.run_maintenance_system();
        self.run_respawn_system();
        self.run_structure_system();
    }
}

#[cfg(test)]
mod step_tests {
    use super::*;

    fn world() -> VoxelWorld {
        let mut config = WorldConfig::default();
        config.seed = 42;
        VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()))
    }

    #[test]
    fn joins_allocate_sequential_ids_and_log_the_tick() {
        let mut w = world();
        let outcome = w.step_once(StepInput {
            joins: vec![JoinSpec::new("bot"), JoinSpec::new("  ")],
            ..StepInput::default()
        });
        assert_eq!(outcome.tick, 1);
        assert_eq!(outcome.joined[0].agent_id, "A000001");
        assert_eq!(outcome.joined[1].name, "A000002");
        assert_eq!(outcome.log.joins.len(), 2);
        assert_eq!(outcome.log.digest, outcome.digest);
        assert_eq!(outcome.observations.len(), 2);
        assert_eq!(outcome.observations[0].voxels.encoding, "RLE");
    }

    #[test]
    fn actions_are_ordered_by_agent_then_submission() {
        let mut w = world();
        w.step_once(StepInput {
            joins: vec![JoinSpec::new("a"), JoinSpec::new("b")],
            ..StepInput::default()
        });
        let act = |agent: &str, id: &str| ActionEnvelope {
            agent_id: agent.to_string(),
            act: {
                let mut act = ActMsg::new(agent, 2);
                act.act_id = Some(id.to_string());
                act
            },
        };
        let outcome = w.step_once(StepInput {
            actions: vec![act("A000002", "x"), act("A000001", "y"), act("A000002", "z")],
            ..StepInput::default()
        });
        let order: Vec<&str> = outcome
            .log
            .actions
            .iter()
            .filter_map(|envelope| envelope.act.act_id.as_deref())
            .collect();
        assert_eq!(order, vec!["y", "x", "z"]);
    }

    #[test]
    fn between_tick_ops_land_in_the_next_log_entry() {
        let mut w = world();
        w.step_once(StepInput {
            joins: vec![JoinSpec::new("bot")],
            ..StepInput::default()
        });
        w.transfer_out("A000001").expect("transfer");
        let outcome = w.step_once(StepInput::default());
        assert!(matches!(
            outcome.log.external.as_slice(),
            [ExternalOp::TransferOut { agent_id }] if agent_id == "A000001"
        ));
        assert!(outcome.observations.is_empty());
        assert!(w.step_once(StepInput::default()).log.external.is_empty());
    }
}
