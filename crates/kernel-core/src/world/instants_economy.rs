//! Trade offers, eating, contract posting and settlement, org treasuries.

use super::*;
use super::contracts_system::deposit_multiplier;
use crate::config::RATE_OFFER_TRADE;

impl VoxelWorld {
    pub(super) fn instant_offer_trade(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        if !self.config.capabilities.allow_trade {
            return Err(Reject::new(ErrorCode::NoPermission, "trade disabled in this world"));
        }
        self.check_rate(agent_id, RATE_OFFER_TRADE)?;
        let to = required(&req.to, "to")?.to_string();
        if to == agent_id {
            return Err(Reject::bad_request("cannot trade with self"));
        }
        if !self.agents.contains_key(&to) {
            return Err(Reject::new(ErrorCode::InvalidTarget, "target not found"));
        }
        let pos = self
            .agent_pos(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        if !self.local_rules(agent_id, pos).can_trade {
            self.record_denied();
            return Err(Reject::new(ErrorCode::NoPermission, "trade not allowed here"));
        }
        let offer = parse_pairs(&req.offer, &self.catalog)?;
        let request = parse_pairs(&req.request, &self.catalog)?;
        if offer.is_empty() || request.is_empty() {
            return Err(Reject::bad_request("offer and request must be non-empty"));
        }
        let trade_id = Self::next_id(&mut self.counters.next_trade, "T");
        self.trades.insert(
            trade_id.clone(),
            Trade {
                trade_id: trade_id.clone(),
                from: agent_id.to_string(),
                to: to.clone(),
                offer: offer.clone(),
                request: request.clone(),
                created_tick: self.tick,
            },
        );
        self.emit(
            &to,
            Event::TradeOffer {
                t: self.tick,
                trade_id: trade_id.clone(),
                from: agent_id.to_string(),
                offer: stacks_from_map(&offer),
                request: stacks_from_map(&request),
            },
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.trade_id = Some(trade_id);
        Ok(result)
    }

    pub(super) fn instant_accept_trade(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        if !self.config.capabilities.allow_trade {
            return Err(Reject::new(ErrorCode::NoPermission, "trade disabled in this world"));
        }
        let trade_id = required(&req.trade_id, "trade_id")?;
        let trade = self
            .trades
            .get(trade_id)
            .cloned()
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "trade not found"))?;
        if trade.to != agent_id {
            return Err(Reject::new(ErrorCode::NoPermission, "not the trade recipient"));
        }
        let (Some(from_pos), Some(to_pos)) = (self.agent_pos(&trade.from), self.agent_pos(&trade.to)) else {
            self.trades.remove(trade_id);
            return Err(Reject::new(ErrorCode::InvalidTarget, "trade party offline"));
        };
        if !self.local_rules(&trade.from, from_pos).can_trade
            || !self.local_rules(&trade.to, to_pos).can_trade
        {
            self.record_denied();
            return Err(Reject::new(ErrorCode::NoPermission, "trade not allowed here"));
        }
        let holds = |world: &Self, who: &str, items: &Inventory| {
            world
                .agents
                .get(who)
                .map(|agent| inv_has_all(&agent.inventory, items))
                .unwrap_or(false)
        };
        if !holds(self, &trade.from, &trade.offer) || !holds(self, &trade.to, &trade.request) {
            return Err(Reject::new(ErrorCode::NoResource, "missing trade items"));
        }

        let tax = self.trade_tax(&trade.from, &trade.to);
        let (rate, sink) = match &tax {
            Some((rate, _, owner)) => (*rate, Some(owner.as_str())),
            None => (0.0, None),
        };
        let offer_tax = self.transfer_with_tax(&trade.from, &trade.to, &trade.offer, rate, sink);
        let request_tax = self.transfer_with_tax(&trade.to, &trade.from, &trade.request, rate, sink);
        self.trades.remove(trade_id);

        let offer_value = self.trade_value(&trade.offer);
        let request_value = self.trade_value(&trade.request);
        let fair = fair_trade(offer_value, request_value);
        self.audit(
            "TRADE",
            agent_id,
            Some(to_pos),
            "ACCEPT_TRADE",
            json!({
                "trade_id": trade.trade_id,
                "from": trade.from,
                "to": trade.to,
                "offer": stacks_from_map(&trade.offer),
                "request": stacks_from_map(&trade.request),
                "tax_rate": rate,
                "land_id": tax.as_ref().map(|(_, land_id, _)| land_id.clone()),
                "offer_tax": stacks_from_map(&offer_tax),
                "request_tax": stacks_from_map(&request_tax),
                "fair": fair,
            }),
        );

        let market_week = self.director.event_active("MARKET_WEEK", self.tick);
        for party in [&trade.from, &trade.to] {
            self.adjust_rep(party, RepField::Trade, 2);
            if fair {
                self.adjust_rep(party, RepField::Social, 1);
                self.award_fun(party, FunDim::Social, "trade", 2, "TRADE");
            }
            if market_week {
                self.award_event_participation(party, "MARKET_WEEK");
                self.award_fun(party, FunDim::Narrative, "event:MARKET_WEEK", 5, "MARKET_WEEK_TRADE");
            }
        }
        self.stats.record_trade(self.tick);
        debug!(world_id = %self.config.world_id, trade_id = %trade.trade_id, fair, "trade settled");

        let now = self.tick;
        self.emit(
            &trade.from,
            Event::TradeDone {
                t: now,
                trade_id: trade.trade_id.clone(),
                with: trade.to.clone(),
            },
        );
        self.emit(
            &trade.to,
            Event::TradeDone {
                t: now,
                trade_id: trade.trade_id.clone(),
                with: trade.from.clone(),
            },
        );
        let mut result = ActionResultEvent::ok(now, &req.id);
        result.trade_id = Some(trade.trade_id);
        Ok(result)
    }

    pub(super) fn instant_decline_trade(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let trade_id = required(&req.trade_id, "trade_id")?;
        let Some(trade) = self.trades.get(trade_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "trade not found"));
        };
        if trade.to != agent_id && trade.from != agent_id {
            return Err(Reject::new(ErrorCode::NoPermission, "not a trade party"));
        }
        let Some(trade) = self.trades.remove(trade_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "trade not found"));
        };
        let other = if trade.from == agent_id { &trade.to } else { &trade.from };
        self.emit(
            other,
            Event::TradeDeclined {
                t: self.tick,
                trade_id: trade.trade_id.clone(),
                by: agent_id.to_string(),
            },
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.trade_id = Some(trade.trade_id);
        result.message = Some("declined".to_string());
        Ok(result)
    }

    pub(super) fn instant_eat(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let item_id = required(&req.item_id, "item_id")?;
        let count = positive_count(req.count, 1)?;
        let edible = match self.catalog.item(item_id) {
            None => return Err(Reject::new(ErrorCode::InvalidTarget, "unknown item")),
            Some(def) => def
                .edible
                .ok_or_else(|| Reject::bad_request("item not edible"))?,
        };
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        if !inv_take(&mut agent.inventory, item_id, count) {
            return Err(Reject::new(ErrorCode::NoResource, "missing food"));
        }
        let n = i32::try_from(count).unwrap_or(i32::MAX);
        agent.hp = agent.hp.saturating_add(edible.hp.saturating_mul(n)).min(HP_MAX);
        agent.hunger = agent.hunger.saturating_add(edible.hunger.saturating_mul(n)).min(HUNGER_MAX);
        agent.stamina_milli = agent
            .stamina_milli
            .saturating_add(edible.stamina_milli.saturating_mul(n))
            .min(STAMINA_MAX);
        Ok(ActionResultEvent::ok(self.tick, &req.id))
    }

    /// Resolves `terminal_id` to a reachable contract terminal position.
    fn reachable_terminal(&self, agent_id: &str, terminal_id: &str) -> Result<Vec3, Reject> {
        let pos = parse_positional_id(terminal_id)
            .filter(|(kind, _)| *kind == "CONTRACT_TERMINAL")
            .map(|(_, pos)| pos)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "contract terminal not found"))?;
        match self.containers.get(&pos) {
            Some(container) if container.kind == "CONTRACT_TERMINAL" => {}
            _ => return Err(Reject::new(ErrorCode::InvalidTarget, "contract terminal not found")),
        }
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        Ok(pos)
    }

    /// Moves `items` from the agent into the terminal and reserves them.
    fn escrow_into_terminal(&mut self, agent_id: &str, terminal: Vec3, items: &Inventory, missing: &str) -> Result<(), Reject> {
        let holds = self
            .agents
            .get(agent_id)
            .map(|agent| inv_has_all(&agent.inventory, items))
            .unwrap_or(false);
        if !holds {
            return Err(Reject::new(ErrorCode::NoResource, missing));
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_take_all(&mut agent.inventory, items);
        }
        if let Some(container) = self.containers.get_mut(&terminal) {
            inv_merge(&mut container.inventory, items);
            container.reserve(items);
        }
        Ok(())
    }

    pub(super) fn instant_post_contract(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let terminal_id = required(&req.terminal_id, "terminal_id")?.to_string();
        let terminal_pos = self.reachable_terminal(agent_id, &terminal_id)?;
        let kind = req
            .contract_kind
            .as_deref()
            .and_then(ContractKind::parse)
            .ok_or_else(|| Reject::bad_request("bad contract_kind"))?;
        let requirements = parse_pairs(&req.requirements, &self.catalog)?;
        let reward = parse_pairs(&req.reward, &self.catalog)?;
        let deposit = parse_pairs(&req.deposit, &self.catalog)?;
        if reward.is_empty() {
            return Err(Reject::bad_request("missing reward"));
        }
        if kind != ContractKind::Build && requirements.is_empty() {
            return Err(Reject::bad_request("missing requirements"));
        }
        let (blueprint_id, anchor, rotation) = if kind == ContractKind::Build {
            let blueprint_id = required(&req.blueprint_id, "blueprint_id")?;
            if !self.catalog.blueprints.contains_key(blueprint_id) {
                return Err(Reject::new(ErrorCode::InvalidTarget, "unknown blueprint"));
            }
            let anchor = req
                .anchor
                .map(Vec3::from_array)
                .ok_or_else(|| Reject::bad_request("missing anchor"))?;
            (
                Some(blueprint_id.to_string()),
                Some(anchor),
                normalize_rotation(req.rotation.unwrap_or(0)),
            )
        } else {
            (None, None, 0)
        };
        let duration = match req.duration_ticks {
            Some(ticks) if ticks > 0 => ticks,
            _ => self.config.day_ticks,
        };
        self.escrow_into_terminal(agent_id, terminal_pos, &reward, "insufficient reward items")?;

        let contract_id = Self::next_id(&mut self.counters.next_contract, "C");
        let contract = Contract {
            contract_id: contract_id.clone(),
            terminal_id: terminal_id.clone(),
            terminal_pos,
            poster: agent_id.to_string(),
            acceptor: None,
            kind,
            state: ContractState::Open,
            requirements,
            reward,
            deposit,
            blueprint_id,
            anchor,
            rotation,
            created_tick: self.tick,
            deadline_tick: self.tick + duration,
        };
        self.audit(
            "CONTRACT_POST",
            agent_id,
            Some(terminal_pos),
            "POST_CONTRACT",
            json!({
                "contract_id": contract.contract_id,
                "terminal_id": terminal_id,
                "kind": contract.kind.as_str(),
                "requirements": stacks_from_map(&contract.requirements),
                "reward": stacks_from_map(&contract.reward),
                "deposit": stacks_from_map(&contract.deposit),
                "deadline_tick": contract.deadline_tick,
                "blueprint_id": contract.blueprint_id,
                "anchor": contract.anchor.map(Vec3::to_array),
                "rotation": contract.rotation,
            }),
        );
        self.contracts.insert(contract_id.clone(), contract);
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.contract_id = Some(contract_id);
        Ok(result)
    }

    /// Looks up a contract and checks it lives at the given reachable terminal.
    fn contract_at_terminal(&self, agent_id: &str, req: &InstantReq) -> Result<Contract, Reject> {
        let contract_id = required(&req.contract_id, "contract_id")?;
        let terminal_id = required(&req.terminal_id, "terminal_id")?;
        let contract = self
            .contracts
            .get(contract_id)
            .cloned()
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "contract not found"))?;
        let terminal_pos = self.reachable_terminal(agent_id, terminal_id)?;
        if terminal_pos != contract.terminal_pos {
            return Err(Reject::new(ErrorCode::InvalidTarget, "terminal mismatch"));
        }
        Ok(contract)
    }

    pub(super) fn instant_accept_contract(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let contract = self.contract_at_terminal(agent_id, req)?;
        if contract.state != ContractState::Open {
            return Err(Reject::new(ErrorCode::Conflict, "contract not open"));
        }
        if contract.poster == agent_id {
            return Err(Reject::new(ErrorCode::Conflict, "cannot accept own contract"));
        }
        if self.tick > contract.deadline_tick {
            return Err(Reject::new(ErrorCode::Conflict, "contract expired"));
        }
        let multiplier = self
            .agents
            .get(agent_id)
            .map(|agent| deposit_multiplier(agent.rep_trade))
            .unwrap_or(1);
        let deposit: Inventory = contract
            .deposit
            .iter()
            .map(|(item, count)| (item.clone(), count.saturating_mul(multiplier)))
            .collect();
        self.escrow_into_terminal(agent_id, contract.terminal_pos, &deposit, "insufficient deposit")?;
        let Some(slot) = self.contracts.get_mut(&contract.contract_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "contract not found"));
        };
        slot.deposit = deposit;
        slot.acceptor = Some(agent_id.to_string());
        slot.state = ContractState::Accepted;
        let updated = slot.clone();
        self.audit(
            "CONTRACT_ACCEPT",
            agent_id,
            Some(updated.terminal_pos),
            "ACCEPT_CONTRACT",
            json!({
                "contract_id": updated.contract_id,
                "terminal_id": updated.terminal_id,
                "kind": updated.kind.as_str(),
                "poster": updated.poster,
                "acceptor": updated.acceptor,
                "deposit": stacks_from_map(&updated.deposit),
            }),
        );
        self.notify_contract(&updated, "ACCEPTED");
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.contract_id = Some(updated.contract_id);
        result.message = Some("accepted".to_string());
        Ok(result)
    }

    pub(super) fn instant_submit_contract(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let contract = self.contract_at_terminal(agent_id, req)?;
        if contract.state != ContractState::Accepted || contract.acceptor.as_deref() != Some(agent_id) {
            return Err(Reject::new(ErrorCode::NoPermission, "not acceptor"));
        }
        if self.tick > contract.deadline_tick {
            return Err(Reject::new(ErrorCode::Conflict, "contract expired"));
        }
        let met = match contract.kind {
            ContractKind::Gather | ContractKind::Deliver => self
                .containers
                .get(&contract.terminal_pos)
                .map(|terminal| {
                    contract
                        .requirements
                        .iter()
                        .all(|(item, count)| terminal.available(item) >= *count)
                })
                .unwrap_or(false),
            ContractKind::Build => self.build_contract_done(&contract),
        };
        if !met {
            return Err(Reject::new(ErrorCode::Blocked, "requirements not met"));
        }
        if contract.kind != ContractKind::Build {
            self.consume_requirements(contract.terminal_pos, &contract.requirements, &contract.poster);
        }
        self.release_escrow(contract.terminal_pos, &contract.reward, agent_id);
        self.release_escrow(contract.terminal_pos, &contract.deposit, agent_id);
        let Some(slot) = self.contracts.get_mut(&contract.contract_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "contract not found"));
        };
        slot.state = ContractState::Completed;
        let updated = slot.clone();
        self.credit_contract_completion(&updated);
        self.audit(
            "CONTRACT_COMPLETE",
            agent_id,
            Some(updated.terminal_pos),
            "SUBMIT_CONTRACT",
            json!({
                "contract_id": updated.contract_id,
                "terminal_id": updated.terminal_id,
                "kind": updated.kind.as_str(),
                "poster": updated.poster,
                "acceptor": updated.acceptor,
            }),
        );
        self.notify_contract(&updated, "COMPLETED");
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.contract_id = Some(updated.contract_id);
        result.message = Some("completed".to_string());
        Ok(result)
    }

    /// Withdraws everything a container holds for the agent.
    pub(super) fn instant_claim_owed(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let terminal_id = required(&req.terminal_id, "terminal_id")?;
        let pos = parse_positional_id(terminal_id)
            .map(|(_, pos)| pos)
            .filter(|pos| self.containers.contains_key(pos))
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "terminal not found"))?;
        if !self.within_interact(agent_id, pos) {
            return Err(Reject::new(ErrorCode::Blocked, "too far"));
        }
        let owed = self
            .containers
            .get_mut(&pos)
            .and_then(|container| container.owed.remove(agent_id))
            .unwrap_or_default();
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        if owed.values().all(|count| *count == 0) {
            result.message = Some("nothing owed".to_string());
            return Ok(result);
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_merge(&mut agent.inventory, &owed);
        }
        self.audit(
            "CLAIM_OWED",
            agent_id,
            Some(pos),
            "CLAIM_OWED",
            json!({"terminal_id": terminal_id, "items": stacks_from_map(&owed)}),
        );
        result.message = Some("claimed".to_string());
        Ok(result)
    }

    /// Explicit `org_id`, else the agent's own org.
    fn target_org(&self, agent_id: &str, req: &InstantReq) -> Result<String, Reject> {
        match req.org_id.as_deref().map(str::trim) {
            Some(org_id) if !org_id.is_empty() => {
                if self.orgs.contains_key(org_id) {
                    Ok(org_id.to_string())
                } else {
                    Err(Reject::new(ErrorCode::InvalidTarget, "org not found"))
                }
            }
            _ => self.member_org(agent_id),
        }
    }

    pub(super) fn instant_org_deposit(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let org_id = self.target_org(agent_id, req)?;
        let item_id = required(&req.item_id, "item_id")?.to_string();
        let count = positive_count(req.count, 1)?;
        let is_member = self
            .orgs
            .get(&org_id)
            .map(|org| org.members.contains_key(agent_id))
            .unwrap_or(false);
        if !is_member {
            return Err(Reject::new(ErrorCode::NoPermission, "not org member"));
        }
        let (taken, pos) = match self.agents.get_mut(agent_id) {
            Some(agent) => (inv_take(&mut agent.inventory, &item_id, count), agent.pos),
            None => return Err(Reject::new(ErrorCode::InvalidTarget, "agent not found")),
        };
        if !taken {
            return Err(Reject::new(ErrorCode::NoResource, "missing items"));
        }
        if let Some(org) = self.orgs.get_mut(&org_id) {
            inv_add(&mut org.treasury, &item_id, count);
        }
        self.audit(
            "ORG_DEPOSIT",
            agent_id,
            Some(pos),
            "ORG_DEPOSIT",
            json!({"org_id": org_id, "item": item_id, "count": count}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.org_id = Some(org_id);
        Ok(result)
    }

    pub(super) fn instant_org_withdraw(&mut self, agent_id: &str, req: &InstantReq) -> Outcome {
        let org_id = self.target_org(agent_id, req)?;
        let item_id = required(&req.item_id, "item_id")?.to_string();
        let count = positive_count(req.count, 1)?;
        let pos = self
            .agent_pos(agent_id)
            .ok_or_else(|| Reject::new(ErrorCode::InvalidTarget, "agent not found"))?;
        let Some(org) = self.orgs.get_mut(&org_id) else {
            return Err(Reject::new(ErrorCode::InvalidTarget, "org not found"));
        };
        if org.members.get(agent_id) != Some(&OrgRole::Leader) {
            return Err(Reject::new(ErrorCode::NoPermission, "not org leader"));
        }
        if !inv_take(&mut org.treasury, &item_id, count) {
            return Err(Reject::new(ErrorCode::NoResource, "treasury lacks items"));
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            inv_add(&mut agent.inventory, &item_id, count);
        }
        self.audit(
            "ORG_WITHDRAW",
            agent_id,
            Some(pos),
            "ORG_WITHDRAW",
            json!({"org_id": org_id, "item": item_id, "count": count}),
        );
        let mut result = ActionResultEvent::ok(self.tick, &req.id);
        result.org_id = Some(org_id);
        Ok(result)
    }
}
