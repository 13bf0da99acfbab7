//! Cross-world agent moves and replicated org metadata.
//!
//! Every mutation here happens between ticks, so each one is also queued as an
//! [`ExternalOp`] for the next tick log entry; replay re-applies them in order.

use super::*;

impl VoxelWorld {
    /// Removes the agent and returns it with its org view.
    pub fn transfer_out(&mut self, agent_id: &str) -> Result<AgentTransfer, WorldError> {
        let org = self
            .agents
            .get(agent_id)
            .ok_or_else(|| WorldError::AgentNotFound(agent_id.to_string()))?
            .org_id
            .as_ref()
            .and_then(|org_id| self.orgs.get(org_id))
            .map(Org::meta);
        let Some(mut agent) = self.remove_agent(agent_id) else {
            return Err(WorldError::AgentNotFound(agent_id.to_string()));
        };
        agent.move_task = None;
        agent.work_task = None;
        let pos = agent.pos;
        self.audit(
            "TRANSFER_OUT",
            agent_id,
            Some(pos),
            "SWITCH_WORLD",
            json!({"world_id": self.config.world_id}),
        );
        self.pending_external.push(ExternalOp::TransferOut {
            agent_id: agent_id.to_string(),
        });
        info!(world_id = %self.config.world_id, agent_id, tick = self.tick, "agent transferred out");
        Ok(AgentTransfer {
            agent,
            org,
            from_world_id: self.config.world_id.clone(),
            from_entry_id: None,
            to_entry_id: None,
        })
    }

    /// Admits a transferred agent at the nearest walkable cell to its recorded position.
    pub fn transfer_in(&mut self, transfer: AgentTransfer, delta_voxels: bool) -> Result<(), WorldError> {
        let agent_id = transfer.agent.id.clone();
        if agent_id.trim().is_empty() {
            return Err(WorldError::InvalidSnapshot("transfer without agent id".to_string()));
        }
        if self.agents.contains_key(&agent_id) {
            return Err(WorldError::AgentExists(agent_id));
        }
        let logged = transfer.clone();
        let AgentTransfer { mut agent, org, from_world_id, .. } = transfer;
        let requested = agent.pos;
        let clamped = Vec3::new(
            requested.x.clamp(-self.config.boundary_r, self.config.boundary_r),
            requested.y.clamp(0, self.chunks.height() - 1),
            requested.z.clamp(-self.config.boundary_r, self.config.boundary_r),
        );
        agent.pos = self.nearest_walkable(clamped);
        agent.move_task = None;
        agent.work_task = None;
        agent.clamp_vitals();
        if let Some(meta) = &org {
            self.merge_org_meta(meta);
        }
        agent.org_id = agent
            .org_id
            .filter(|org_id| {
                self.orgs
                    .get(org_id)
                    .map(|org| org.members.contains_key(&agent.id))
                    .unwrap_or(false)
            });
        let pos = agent.pos;
        agent.seen_biomes.insert(self.biome_at(pos).to_string());
        self.agents.insert(agent_id.clone(), agent);
        self.sessions
            .insert(agent_id.clone(), AgentSession::new(delta_voxels));
        self.discover_chunk(pos);
        if let Some(event) = self.active_event_notice() {
            self.emit(&agent_id, event);
        }
        self.audit(
            "TRANSFER_IN",
            &agent_id,
            Some(pos),
            "SWITCH_WORLD",
            json!({"from_world_id": from_world_id, "world_id": self.config.world_id}),
        );
        self.pending_external.push(ExternalOp::TransferIn {
            transfer: Box::new(logged),
        });
        info!(world_id = %self.config.world_id, agent_id = %agent_id, tick = self.tick, "agent transferred in");
        Ok(())
    }

    pub fn org_meta_snapshot(&self) -> Vec<OrgMeta> {
        self.orgs.values().map(Org::meta).collect()
    }

    /// Merges replicated metadata; local treasuries are never touched. Returns true when anything changed.
    pub fn upsert_org_meta(&mut self, metas: &[OrgMeta]) -> bool {
        let mut changed = false;
        for meta in metas {
            changed |= self.merge_org_meta(meta);
        }
        if changed {
            self.pending_external.push(ExternalOp::UpsertOrgMeta {
                metas: metas.to_vec(),
            });
            debug!(world_id = %self.config.world_id, orgs = metas.len(), "org metadata merged");
        }
        changed
    }

    fn merge_org_meta(&mut self, candidate: &OrgMeta) -> bool {
        if candidate.org_id.trim().is_empty() {
            return false;
        }
        let now = self.tick;
        let merged = match self.orgs.get(&candidate.org_id) {
            Some(org) => {
                let mut current = org.meta();
                current.merge(candidate);
                if current == org.meta() {
                    return false;
                }
                current
            }
            None => candidate.clone(),
        };
        let org = self
            .orgs
            .entry(merged.org_id.clone())
            .or_insert_with(|| Org {
                org_id: merged.org_id.clone(),
                kind: merged.kind.unwrap_or(OrgKind::Guild),
                name: String::new(),
                members: BTreeMap::new(),
                treasury: Inventory::new(),
                created_tick: now,
                meta_version: 0,
            });
        if let Some(kind) = merged.kind {
            org.kind = kind;
        }
        org.name = merged.name.clone();
        org.members = merged.members.clone();
        if merged.created_tick > 0 {
            org.created_tick = merged.created_tick;
        }
        org.meta_version = merged.meta_version;
        let org_id = merged.org_id;
        for agent in self.agents.values_mut() {
            if merged.members.contains_key(&agent.id) {
                agent.org_id = Some(org_id.clone());
            } else if agent.org_id.as_deref() == Some(org_id.as_str()) {
                agent.org_id = None;
            }
        }
        true
    }

    /// Re-applies a logged between-tick mutation.
    pub fn apply_external(&mut self, op: ExternalOp) -> Result<(), WorldError> {
        match op {
            ExternalOp::TransferIn { transfer } => self.transfer_in(*transfer, false),
            ExternalOp::TransferOut { agent_id } => self.transfer_out(&agent_id).map(|_| ()),
            ExternalOp::UpsertOrgMeta { metas } => {
                self.upsert_org_meta(&metas);
                Ok(())
            }
            ExternalOp::ResetWorld { reason } => self.reset_world(&reason).map(|_| ()),
        }
    }
}

#[cfg(test)]
mod transfer_tests {
    use super::*;

    fn world(id: &str, prefix: &str) -> VoxelWorld {
        let mut config = WorldConfig::default();
        config.world_id = id.to_string();
        config.agent_id_prefix = prefix.to_string();
        VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()))
    }

    fn org(version: u64, members: &[(&str, OrgRole)]) -> OrgMeta {
        OrgMeta {
            org_id: "ORG000001".into(),
            kind: Some(OrgKind::Guild),
            name: "Miners".into(),
            created_tick: 3,
            meta_version: version,
            members: members.iter().map(|(id, role)| (id.to_string(), *role)).collect(),
        }
    }

    #[test]
    fn transfer_moves_agent_and_queues_external_ops() {
        let mut src = world("OVERWORLD", "A");
        let joined = src.join_agent(&JoinSpec::new("bot"));
        let mut transfer = src.transfer_out(&joined.agent_id).expect("transfer out");
        assert!(src.agent(&joined.agent_id).is_none());
        assert!(matches!(src.pending_external.as_slice(), [ExternalOp::TransferOut { .. }]));

        let mut dst = world("MINE_L1", "MINE_L1-A");
        transfer.agent.pos = Vec3::new(5, 0, 5);
        dst.transfer_in(transfer.clone(), true).expect("transfer in");
        assert!(dst.agent(&joined.agent_id).is_some());
        assert!(dst.session(&joined.agent_id).map(|s| s.delta_voxels).unwrap_or(false));
        assert_eq!(
            dst.transfer_in(transfer, false),
            Err(WorldError::AgentExists(joined.agent_id.clone()))
        );
    }

    #[test]
    fn org_upserts_keep_treasury_and_sync_members() {
        let mut w = world("OVERWORLD", "A");
        let joined = w.join_agent(&JoinSpec::new("bot"));
        assert!(w.upsert_org_meta(&[org(1, &[(joined.agent_id.as_str(), OrgRole::Leader)])]));
        assert_eq!(
            w.agent(&joined.agent_id).and_then(|a| a.org_id.clone()),
            Some("ORG000001".to_string())
        );
        if let Some(org) = w.orgs.get_mut("ORG000001") {
            inv_add(&mut org.treasury, "COAL", 4);
        }
        assert!(!w.upsert_org_meta(&[org(1, &[])]));
        assert!(w.upsert_org_meta(&[org(2, &[("B000009", OrgRole::Leader)])]));
        let stored = w.org("ORG000001").expect("org");
        assert_eq!(inv_count(&stored.treasury, "COAL"), 4);
        assert_eq!(w.agent(&joined.agent_id).and_then(|a| a.org_id.clone()), None);
    }
}
