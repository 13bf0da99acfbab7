//! Land administration, law proposals and votes, org membership.

use super::*;
use super::laws::normalize_law_params;

const ORG_NAME_MAX_CHARS: usize = 40;

/// Materials for growing a claim from `current` to `target` radius.
pub(super) fn upgrade_cost(current: i32, target: i32) -> Inventory {
    let mut cost = Inventory::new();
    if current < 64 && target >= 64 {
        inv_add(&mut cost, "BATTERY", 1);
        inv_add(&mut cost, "CRYSTAL_SHARD", 2);
    }
    if current < 128 && target >= 128 {
        inv_add(&mut cost, "BATTERY", 2);
        inv_add(&mut cost, "CRYSTAL_SHARD", 4);
    }
    cost
}

/// Successor after a leader leaves: the smallest remaining member id.
pub(super) fn next_leader(members: &BTreeMap<String, OrgRole>) -> Option<String> {
    members.keys().next().cloned()
}

impl VoxelWorld {
    /// Resolves `land_id` and requires the caller to administer it.
    fn administered_claim(&self, agent_id: &str, req: &InstantReq) -> Result<String, Reject> {
        let land_id = required(&req.land_id, "land_id")?;
        let claim = self
            .claims
            .get(land_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "land not found"))?;
        if !self.is_land_admin(agent_id, claim) {
            return Err(Reject::new(ErrorCode::NoPermission, "not land admin"));
        }
        Ok(land_id.to_string())
    }

    pub(super) fn instant_add_member(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let land_id = self.administered_claim(agent_id, req)?;
        let member_id = required(&req.member_id, "member_id")?.to_string();
        let Some(claim) = self.claims.get_mut(&land_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "land not found"));
        };
        claim.members.insert(member_id.clone());
        let anchor = claim.anchor;
        self.audit(
            "CLAIM_MEMBER_ADD",
            agent_id,
            Some(anchor),
            "ADD_MEMBER",
            json!({"land_id": land_id, "member_id": member_id}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.land_id = Some(land_id);
        Ok(result)
    }

    pub(super) fn instant_remove_member(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let land_id = self.administered_claim(agent_id, req)?;
        let member_id = required(&req.member_id, "member_id")?.to_string();
        let Some(claim) = self.claims.get_mut(&land_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "land not found"));
        };
        claim.members.remove(&member_id);
        let anchor = claim.anchor;
        self.audit(
            "CLAIM_MEMBER_REMOVE",
            agent_id,
            Some(anchor),
            "REMOVE_MEMBER",
            json!({"land_id": land_id, "member_id": member_id}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.land_id = Some(land_id);
        Ok(result)
    }

    pub(super) fn instant_deed_land(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let land_id = self.administered_claim(agent_id, req)?;
        let new_owner = required(&req.new_owner, "new_owner")?.to_string();
        if !self.agents.contains_key(&new_owner) && !self.orgs.contains_key(&new_owner) {
            return Err(Reject::new(ErrorCode::InvalidTarget, "new owner not found"));
        }
        let Some(claim) = self.claims.get_mut(&land_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "land not found"));
        };
        let previous = std::mem::replace(&mut claim.owner, new_owner.clone());
        let anchor = claim.anchor;
        self.audit(
            "CLAIM_DEED",
            agent_id,
            Some(anchor),
            "DEED_LAND",
            json!({"land_id": land_id, "from": previous, "to": new_owner}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.land_id = Some(land_id);
        Ok(result)
    }

    pub(super) fn instant_upgrade_claim(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let target = match req.radius {
            Some(r) if r > 0 => r,
            _ => return Err(Reject::bad_request("missing radius")),
        };
        let land_id = self.administered_claim(agent_id, req)?;
        let Some(claim) = self.claims.get(&land_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "land not found"));
        };
        if claim.maintenance_stage >= 1 {
            return Err(Reject::new(
                ErrorCode::NoPermission,
                "land maintenance stage disallows expansion",
            ));
        }
        if target != 64 && target != 128 {
            return Err(Reject::bad_request("radius must be 64 or 128"));
        }
        if target <= claim.radius {
            return Err(Reject::bad_request("radius must increase"));
        }
        let (anchor, current) = (claim.anchor, claim.radius);
        if self.block_name_at(anchor) != "CLAIM_TOTEM" {
            return Err(Reject::new(ErrorCode::InvalidTarget, "claim totem missing"));
        }
        let cost = upgrade_cost(current, target);
        let affordable = self
            .agents
            .get(agent_id)
            .map(|agent| inv_has_all(&agent.inventory, &cost))
            .unwrap_or(false);
        if !affordable {
            return Err(Reject::new(ErrorCode::NoResource, "missing upgrade materials"));
        }
        let overlaps = self
            .claims
            .values()
            .any(|other| other.land_id != land_id && other.overlaps(anchor, target));
        if overlaps {
            return Err(Reject::new(ErrorCode::Conflict, "claim overlaps existing land"));
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_take_all(&mut agent.inventory, &cost);
        }
        if let Some(claim) = self.claims.get_mut(&land_id) {
            claim.radius = target;
        }
        self.audit(
            "CLAIM_UPGRADE",
            agent_id,
            Some(anchor),
            "UPGRADE_CLAIM",
            json!({"land_id": land_id, "from": current, "to": target, "cost": stacks_from_map(&cost)}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.land_id = Some(land_id);
        result.radius = Some(target);
        Ok(result)
    }

    /// Overwrites only the flags present in the request.
    pub(super) fn instant_set_policy(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let land_id = self.administered_claim(agent_id, req)?;
        let flags = req
            .flags
            .as_ref()
            .filter(|flags| !flags.is_empty())
            .ok_or_else(|| Reject::bad_request("missing flags"))?;
        if let Some(unknown) = flags.keys().find(|name| {
            !matches!(name.as_str(), "allow_build" | "allow_break" | "allow_damage" | "allow_trade")
        }) {
            return Err(Reject::bad_request(format!("unknown flag {unknown}")));
        }
        let Some(claim) = self.claims.get_mut(&land_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "land not found"));
        };
        for (name, value) in flags {
            let slot = match name.as_str() {
                "allow_build" => &mut claim.flags.allow_build,
                "allow_break" => &mut claim.flags.allow_break,
                "allow_damage" => &mut claim.flags.allow_damage,
                _ => &mut claim.flags.allow_trade,
            };
            *slot = *value;
        }
        let (anchor, applied) = (claim.anchor, claim.flags);
        self.audit(
            "CLAIM_POLICY",
            agent_id,
            Some(anchor),
            "SET_POLICY",
            json!({"land_id": land_id, "flags": applied}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.land_id = Some(land_id);
        Ok(result)
    }

    pub(super) fn instant_propose_law(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        if !self.config.capabilities.allow_laws {
            return Err(Reject::new(ErrorCode::NoPermission, "laws disabled in this world"));
        }
        let land_id = required(&req.land_id, "land_id")?.to_string();
        let template_id = required(&req.template_id, "template_id")?.to_string();
        let claim = self
            .claims
            .get(&land_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "land not found"))?;
        if !self.is_land_member(agent_id, claim) {
            return Err(Reject::new(ErrorCode::NoPermission, "not eligible"));
        }
        let anchor = claim.anchor;
        let template = self
            .catalog
            .law_templates
            .get(&template_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "unknown law template"))?;
        let catalog = Arc::clone(&self.catalog);
        let params = normalize_law_params(&template_id, &req.params, |item| catalog.item(item).is_some())
            .map_err(Reject::bad_request)?;
        let title = match req.title.as_deref().map(str::trim) {
            Some(title) if !title.is_empty() => title.to_string(),
            _ => template.title.clone(),
        };

        let now = self.tick;
        let notice_ends_tick = now + self.config.law_notice_ticks;
        let vote_ends_tick = notice_ends_tick + self.config.law_vote_ticks;
        let law_id = Self::next_id(&mut self.counters.next_law, "LAW");
        self.laws.insert(
            law_id.clone(),
            Law {
                law_id: law_id.clone(),
                land_id: land_id.clone(),
                template_id: template_id.clone(),
                title: title.clone(),
                params: params.clone(),
                status: LawStatus::Notice,
                proposed_by: agent_id.to_string(),
                proposed_tick: now,
                notice_ends_tick,
                vote_ends_tick,
                votes: BTreeMap::new(),
            },
        );
        self.broadcast_law(&law_id, "PROPOSED", None);
        self.audit(
            "LAW_PROPOSE",
            agent_id,
            Some(anchor),
            "PROPOSE_LAW",
            json!({
                "law_id": law_id,
                "land_id": land_id,
                "template_id": template_id,
                "title": title,
                "params": params,
                "notice_ends": notice_ends_tick,
                "vote_ends": vote_ends_tick,
            }),
        );
        if self.director.event_active("CIVIC_VOTE", now) {
            self.award_event_participation(agent_id, "CIVIC_VOTE");
            self.award_fun(agent_id, FunDim::Narrative, "civic_vote_propose", 6, "CIVIC_VOTE_PROPOSE");
        }
        debug!(world_id = %self.config.world_id, law_id = %law_id, template = %template_id, "law proposed");
        let mut result = ActionResultEvent::ok(now, &req.id);
        result.law_id = Some(law_id);
        Ok(result)
    }

    pub(super) fn instant_vote(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        if !self.config.capabilities.allow_laws {
            return Err(Reject::new(ErrorCode::NoPermission, "laws disabled in this world"));
        }
        let law_id = required(&req.law_id, "law_id")?.to_string();
        let raw_choice = required(&req.choice, "choice")?;
        let law = self
            .laws
            .get(&law_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "law not found"))?;
        if law.status != LawStatus::Voting {
            return Err(Reject::new(ErrorCode::Blocked, "law not in voting"));
        }
        let claim = self
            .claims
            .get(&law.land_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "land not found"))?;
        if !self.is_land_member(agent_id, claim) {
            return Err(Reject::new(ErrorCode::NoPermission, "not eligible to vote"));
        }
        let anchor = claim.anchor;
        let choice = VoteChoice::parse(raw_choice).ok_or_else(|| Reject::bad_request("bad choice"))?;
        let land_id = law.land_id.clone();
        if let Some(law) = self.laws.get_mut(&law_id) {
            law.votes.insert(agent_id.to_string(), choice);
        }
        if self.director.event_active("CIVIC_VOTE", self.tick) {
            self.award_event_participation(agent_id, "CIVIC_VOTE");
            self.award_fun(agent_id, FunDim::Narrative, "civic_vote_vote", 4, "CIVIC_VOTE_VOTE");
        } else {
            self.award_fun(agent_id, FunDim::Narrative, "vote", 2, "VOTE");
        }
        self.audit(
            "LAW_VOTE",
            agent_id,
            Some(anchor),
            "VOTE",
            json!({"law_id": law_id, "land_id": land_id, "choice": choice, "voter_id": agent_id}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.law_id = Some(law_id);
        Ok(result)
    }

    pub(super) fn instant_create_org(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let kind = req
            .org_kind
            .as_deref()
            .and_then(OrgKind::parse)
            .ok_or_else(|| Reject::bad_request("bad org_kind"))?;
        let name = req.org_name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || name.chars().count() > ORG_NAME_MAX_CHARS {
            return Err(Reject::bad_request("bad org_name"));
        }
        let agent = self
            .agents
            .get(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        if agent.org_id.is_some() {
            return Err(Reject::new(ErrorCode::Conflict, "already in org"));
        }
        let pos = agent.pos;
        let org_id = Self::next_id(&mut self.counters.next_org, "ORG");
        let mut members = BTreeMap::new();
        members.insert(agent_id.to_string(), OrgRole::Leader);
        self.orgs.insert(
            org_id.clone(),
            Org {
                org_id: org_id.clone(),
                kind,
                name: name.to_string(),
                members,
                treasury: Inventory::new(),
                created_tick: self.tick,
                meta_version: 1,
            },
        );
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.org_id = Some(org_id.clone());
        }
        self.audit(
            "ORG_CREATE",
            agent_id,
            Some(pos),
            "CREATE_ORG",
            json!({"org_id": org_id, "org_kind": kind, "org_name": name, "leader": agent_id}),
        );
        info!(world_id = %self.config.world_id, org_id = %org_id, "org created");
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.org_id = Some(org_id);
        Ok(result)
    }

    pub(super) fn instant_join_org(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let org_id = required(&req.org_id, "org_id")?.to_string();
        if !self.orgs.contains_key(&org_id) {
            return Err(Reject::new(ErrorCode::InvalidTarget, "org not found"));
        }
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        if agent.org_id.is_some() {
            return Err(Reject::new(ErrorCode::Conflict, "already in org"));
        }
        agent.org_id = Some(org_id.clone());
        let pos = agent.pos;
        let kind = match self.orgs.get_mut(&org_id) {
            Some(org) => {
                org.members.insert(agent_id.to_string(), OrgRole::Member);
                org.meta_version += 1;
                org.kind
            }
            None => return Err(Reject::new(ErrorCode::InvalidTarget, "org not found")),
        };
        self.audit(
            "ORG_JOIN",
            agent_id,
            Some(pos),
            "JOIN_ORG",
            json!({"org_id": org_id, "member": agent_id, "org_kind": kind}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.org_id = Some(org_id);
        Ok(result)
    }

    pub(super) fn instant_leave_org(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        let Some(org_id) = agent.org_id.take() else {
            return Err(Reject::new(ErrorCode::Blocked, "not in org"));
        };
        let pos = agent.pos;
        let mut dissolved = false;
        let mut successor = None;
        if let Some(org) = self.orgs.get_mut(&org_id) {
            let role = org.members.remove(agent_id);
            org.meta_version += 1;
            if org.members.is_empty() {
                dissolved = true;
            } else if role == Some(OrgRole::Leader) {
                successor = next_leader(&org.members);
                if let Some(next) = &successor {
                    org.members.insert(next.clone(), OrgRole::Leader);
                    org.meta_version += 1;
                }
            }
        }
        if dissolved {
            self.orgs.remove(&org_id);
        }
        self.audit(
            "ORG_LEAVE",
            agent_id,
            Some(pos),
            "LEAVE_ORG",
            json!({"org_id": org_id, "member": agent_id, "dissolved": dissolved, "new_leader": successor}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.org_id = Some(org_id);
        Ok(result)
    }
}

#[cfg(test)]
mod governance_tests {
    use super::*;

    #[test]
    fn upgrade_cost_is_cumulative() {
        let to_64 = upgrade_cost(32, 64);
        assert_eq!(inv_count(&to_64, "BATTERY"), 1);
        assert_eq!(inv_count(&to_64, "CRYSTAL_SHARD"), 2);
        let to_128 = upgrade_cost(32, 128);
        assert_eq!(inv_count(&to_128, "BATTERY"), 3);
        assert_eq!(inv_count(&to_128, "CRYSTAL_SHARD"), 6);
        let step = upgrade_cost(64, 128);
        assert_eq!(inv_count(&step, "BATTERY"), 2);
        assert!(upgrade_cost(128, 128).is_empty());
    }

    #[test]
    fn successor_is_smallest_member() {
        let mut members = BTreeMap::new();
        members.insert("A000007".to_string(), OrgRole::Member);
        members.insert("A000003".to_string(), OrgRole::Member);
        assert_eq!(next_leader(&members).as_deref(), Some("A000003"));
        assert_eq!(next_leader(&BTreeMap::new()), None);
    }
}
