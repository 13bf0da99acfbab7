use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Wild,
    Owner,
    Member,
    Visitor,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Wild => "WILD",
            Role::Owner => "OWNER",
            Role::Member => "MEMBER",
            Role::Visitor => "VISITOR",
        }
    }
}

/// Effective rules for one agent at one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalRules {
    pub land_id: Option<String>,
    pub owner: Option<String>,
    pub role: Role,
    pub can_build: bool,
    pub can_break: bool,
    pub can_damage: bool,
    pub can_trade: bool,
    pub tax: f64,
    pub maintenance_stage: u8,
    pub maintenance_due_tick: Option<u64>,
}

impl LocalRules {
    pub fn permissions(&self) -> BTreeMap<String, bool> {
        [
            ("can_build", self.can_build),
            ("can_break", self.can_break),
            ("can_damage", self.can_damage),
            ("can_trade", self.can_trade),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
    }
}

impl VoxelWorld {
    /// First claim (by land id) whose circle contains `pos`.
    pub fn claim_at(&self, pos: Vec3) -> Option<&Claim> {
        self.claims.values().find(|claim| claim.contains(pos))
    }

    /// Owner agent, or leader of the owning org.
    pub(super) fn is_land_admin(&self, agent_id: &str, claim: &Claim) -> bool {
        if claim.owner == agent_id {
            return true;
        }
        self.orgs
            .get(&claim.owner)
            .map(|org| org.members.get(agent_id) == Some(&OrgRole::Leader))
            .unwrap_or(false)
    }

    pub(super) fn is_land_member(&self, agent_id: &str, claim: &Claim) -> bool {
        if self.is_land_admin(agent_id, claim) || claim.members.contains(agent_id) {
            return true;
        }
        self.orgs
            .get(&claim.owner)
            .map(|org| org.members.contains_key(agent_id))
            .unwrap_or(false)
    }

    /// Market tax on `claim`, halved during MARKET_WEEK.
    pub(super) fn effective_tax(&self, claim: &Claim) -> f64 {
        let mut rate = claim.market_tax;
        if self.director.event_active("MARKET_WEEK", self.tick) {
            rate *= 0.5;
        }
        rate.clamp(0.0, 1.0)
    }

    pub fn local_rules(&self, agent_id: &str, pos: Vec3) -> LocalRules {
        let Some(claim) = self.claim_at(pos) else {
            return LocalRules {
                land_id: None,
                owner: None,
                role: Role::Wild,
                can_build: true,
                can_break: true,
                can_damage: true,
                can_trade: true,
                tax: 0.0,
                maintenance_stage: 0,
                maintenance_due_tick: None,
            };
        };
        let role = if self.is_land_admin(agent_id, claim) {
            Role::Owner
        } else if self.is_land_member(agent_id, claim) {
            Role::Member
        } else {
            Role::Visitor
        };
        let unprotected = claim.maintenance_stage >= 2;
        let (mut can_build, mut can_break, can_damage, can_trade) =
            if role != Role::Visitor || unprotected {
                (true, true, true, true)
            } else {
                (
                    claim.flags.allow_build,
                    claim.flags.allow_break,
                    claim.flags.allow_damage,
                    claim.flags.allow_trade,
                )
            };
        if claim.in_curfew(self.time_of_day()) {
            can_build = false;
            can_break = false;
        }
        LocalRules {
            land_id: Some(claim.land_id.clone()),
            owner: Some(claim.owner.clone()),
            role,
            can_build,
            can_break,
            can_damage,
            can_trade,
            tax: self.effective_tax(claim),
            maintenance_stage: claim.maintenance_stage,
            maintenance_due_tick: Some(claim.maintenance_due_tick),
        }
    }

    /// Access-pass core: within `access_pass_core_radius` of the anchor.
    pub(super) fn in_claim_core(&self, claim: &Claim, pos: Vec3) -> bool {
        let r = i64::from(self.config.access_pass_core_radius.min(claim.radius));
        pos.dist2_xz(claim.anchor) <= r * r
    }

    pub(super) fn record_denied(&mut self) {
        self.stats.record_denied(self.tick);
    }

    /// Build permission plus world capability.
    pub(super) fn require_build(&mut self, agent_id: &str, pos: Vec3) -> Result<(), Reject> {
        if !self.config.capabilities.allow_place {
            return Err(Reject::new(ErrorCode::NoPermission, "building disabled in this world"));
        }
        if !self.local_rules(agent_id, pos).can_build {
            self.record_denied();
            return Err(Reject::new(ErrorCode::NoPermission, "cannot build here"));
        }
        Ok(())
    }

    /// Break permission; a denied break inside a fining claim still charges the fine.
    pub(super) fn require_break(&mut self, agent_id: &str, pos: Vec3) -> Result<(), Reject> {
        if !self.config.capabilities.allow_mine {
            return Err(Reject::new(ErrorCode::NoPermission, "mining disabled in this world"));
        }
        let rules = self.local_rules(agent_id, pos);
        if rules.can_break {
            return Ok(());
        }
        self.record_denied();
        if let Some(land_id) = rules.land_id {
            self.charge_break_fine(agent_id, &land_id);
        }
        Err(Reject::new(ErrorCode::NoPermission, "cannot break here"))
    }

    pub(super) fn charge_break_fine(&mut self, agent_id: &str, land_id: &str) {
        let Some(claim) = self.claims.get(land_id) else {
            return;
        };
        let (Some(item), fine) = (claim.fine_item.clone(), claim.fine_per_block) else {
            return;
        };
        if fine == 0 {
            return;
        }
        let owner = claim.owner.clone();
        let paid = self
            .agents
            .get_mut(agent_id)
            .map(|agent| inv_take(&mut agent.inventory, &item, fine))
            .unwrap_or(false);
        if !paid {
            return;
        }
        self.credit_owner(&owner, &item, fine);
        self.adjust_rep(agent_id, RepField::Law, -5);
        self.audit(
            "FINE",
            agent_id,
            None,
            "FINE_BREAK_PER_BLOCK",
            json!({"land_id": land_id, "item": item, "count": fine}),
        );
        self.emit(
            agent_id,
            Event::Fine {
                t: self.tick,
                land_id: land_id.to_string(),
                item,
                count: fine,
                reason: "BREAK".to_string(),
            },
        );
    }
}
