//! Contract escrow at terminals and the per-tick settlement table.

use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ContractDecision {
    FailMissingTerminal,
    ExpireOpen,
    TimeoutAccepted,
    CompleteDeliver,
    CompleteBuild,
    Noop,
}

/// Settlement decision for one live contract.
pub(super) fn decide_contract(
    state: ContractState,
    kind: ContractKind,
    now: u64,
    deadline: u64,
    has_terminal: bool,
    requirements_ok: bool,
    build_done: bool,
) -> ContractDecision {
    if !matches!(state, ContractState::Open | ContractState::Accepted) {
        return ContractDecision::Noop;
    }
    if !has_terminal {
        return ContractDecision::FailMissingTerminal;
    }
    match state {
        ContractState::Open if now > deadline => ContractDecision::ExpireOpen,
        ContractState::Accepted if now > deadline => ContractDecision::TimeoutAccepted,
        ContractState::Accepted => match kind {
            ContractKind::Gather | ContractKind::Deliver if requirements_ok => {
                ContractDecision::CompleteDeliver
            }
            ContractKind::Build if build_done => ContractDecision::CompleteBuild,
            _ => ContractDecision::Noop,
        },
        _ => ContractDecision::Noop,
    }
}

/// Deposit scale by trade reputation: low standing pays more.
pub(super) fn deposit_multiplier(rep_trade: i32) -> u32 {
    match rep_trade {
        i32::MIN..=299 => 3,
        300..=499 => 2,
        _ => 1,
    }
}

impl VoxelWorld {
    pub(super) fn contract_summaries_for(&self, terminal_id: &str) -> Vec<contracts::ContractSummary> {
        self.contracts
            .values()
            .filter(|contract| contract.terminal_id == terminal_id)
            .map(|contract| contracts::ContractSummary {
                contract_id: contract.contract_id.clone(),
                kind: contract.kind.as_str().to_string(),
                state: contract.state.to_string(),
                poster: contract.poster.clone(),
                acceptor: contract.acceptor.clone(),
                requirements: stacks_from_map(&contract.requirements),
                reward: stacks_from_map(&contract.reward),
                deadline_tick: contract.deadline_tick,
            })
            .collect()
    }

    /// Releases escrowed `items` from the terminal to `recipient`, or into owed when offline.
    pub(super) fn release_escrow(&mut self, terminal: Vec3, items: &Inventory, recipient: &str) {
        let online = self.agents.contains_key(recipient);
        let Some(container) = self.containers.get_mut(&terminal) else {
            return;
        };
        container.unreserve(items);
        let mut moved = Inventory::new();
        for (item, count) in items {
            let n = (*count).min(inv_count(&container.inventory, item));
            inv_take(&mut container.inventory, item, n);
            inv_add(&mut moved, item, n);
        }
        if !online {
            inv_merge(container.owed.entry(recipient.to_string()).or_default(), &moved);
        } else if let Some(agent) = self.agents.get_mut(recipient) {
            inv_merge(&mut agent.inventory, &moved);
        }
    }

    /// Moves delivered requirements out of the terminal stock to the poster,
    /// or into the poster's owed items when offline.
    pub(super) fn consume_requirements(&mut self, terminal: Vec3, items: &Inventory, poster: &str) {
        let online = self.agents.contains_key(poster);
        let Some(container) = self.containers.get_mut(&terminal) else {
            return;
        };
        let mut moved = Inventory::new();
        for (item, count) in items {
            if inv_take(&mut container.inventory, item, *count) {
                inv_add(&mut moved, item, *count);
            }
        }
        if !online {
            inv_merge(container.owed.entry(poster.to_string()).or_default(), &moved);
        } else if let Some(agent) = self.agents.get_mut(poster) {
            inv_merge(&mut agent.inventory, &moved);
        }
    }

    fn requirements_available(&self, contract: &Contract) -> bool {
        self.containers
            .get(&contract.terminal_pos)
            .map(|terminal| {
                contract
                    .requirements
                    .iter()
                    .all(|(item, count)| terminal.available(item) >= *count)
            })
            .unwrap_or(false)
    }

    pub(super) fn build_contract_done(&self, contract: &Contract) -> bool {
        match (&contract.blueprint_id, contract.anchor) {
            (Some(blueprint_id), Some(anchor)) => {
                self.check_blueprint_placed(blueprint_id, anchor, contract.rotation)
                    && self.structure_stable(blueprint_id, anchor, contract.rotation)
            }
            _ => false,
        }
    }

    pub(super) fn notify_contract(&mut self, contract: &Contract, kind: &str) {
        let event = Event::Contract {
            t: self.tick,
            kind: kind.to_string(),
            contract_id: contract.contract_id.clone(),
            state: contract.state.to_string(),
        };
        self.emit(&contract.poster, event.clone());
        if let Some(acceptor) = &contract.acceptor {
            if acceptor != &contract.poster {
                self.emit(acceptor, event);
            }
        }
    }

    /// Credits the acceptor for a completed contract.
    pub(super) fn credit_contract_completion(&mut self, contract: &Contract) {
        let Some(acceptor) = contract.acceptor.clone() else {
            return;
        };
        match contract.kind {
            ContractKind::Build => self.adjust_rep(&acceptor, RepField::Build, 3),
            _ => {
                self.adjust_rep(&acceptor, RepField::Trade, 3);
                self.adjust_rep(&acceptor, RepField::Social, 1);
            }
        }
        self.stats.record_trade(self.tick);
        let base = if contract.kind == ContractKind::Build { 7 } else { 5 };
        self.award_fun(
            &acceptor,
            FunDim::Social,
            &format!("contract:{}", contract.kind.as_str()),
            base,
            "CONTRACT_COMPLETE",
        );
    }

    pub(super) fn run_contract_system(&mut self) {
        let now = self.tick;
        let live: Vec<String> = self
            .contracts
            .values()
            .filter(|c| matches!(c.state, ContractState::Open | ContractState::Accepted))
            .map(|c| c.contract_id.clone())
            .collect();
        for contract_id in live {
            let Some(contract) = self.contracts.get(&contract_id).cloned() else {
                continue;
            };
            let has_terminal = self
                .containers
                .get(&contract.terminal_pos)
                .map(|c| c.kind == "CONTRACT_TERMINAL")
                .unwrap_or(false);
            let accepted = contract.state == ContractState::Accepted && has_terminal;
            let requirements_ok = accepted
                && matches!(contract.kind, ContractKind::Gather | ContractKind::Deliver)
                && self.requirements_available(&contract);
            let build_done = accepted
                && contract.kind == ContractKind::Build
                && self.build_contract_done(&contract);
            let decision = decide_contract(
                contract.state,
                contract.kind,
                now,
                contract.deadline_tick,
                has_terminal,
                requirements_ok,
                build_done,
            );
            let acceptor = contract.acceptor.clone().unwrap_or_default();
            let (state, label, audit_action) = match decision {
                ContractDecision::Noop => continue,
                ContractDecision::FailMissingTerminal => {
                    (ContractState::Failed, "FAILED", "CONTRACT_FAIL")
                }
                ContractDecision::ExpireOpen => {
                    self.release_escrow(contract.terminal_pos, &contract.reward, &contract.poster);
                    (ContractState::Failed, "EXPIRED", "CONTRACT_EXPIRE")
                }
                ContractDecision::TimeoutAccepted => {
                    self.release_escrow(contract.terminal_pos, &contract.reward, &contract.poster);
                    self.release_escrow(contract.terminal_pos, &contract.deposit, &contract.poster);
                    self.adjust_rep(&acceptor, RepField::Trade, -5);
                    self.adjust_rep(&acceptor, RepField::Law, -10);
                    (ContractState::Failed, "TIMEOUT", "CONTRACT_FAIL")
                }
                ContractDecision::CompleteDeliver => {
                    self.consume_requirements(contract.terminal_pos, &contract.requirements, &contract.poster);
                    self.release_escrow(contract.terminal_pos, &contract.reward, &acceptor);
                    self.release_escrow(contract.terminal_pos, &contract.deposit, &acceptor);
                    (ContractState::Completed, "COMPLETED", "CONTRACT_COMPLETE")
                }
                ContractDecision::CompleteBuild => {
                    self.release_escrow(contract.terminal_pos, &contract.reward, &acceptor);
                    self.release_escrow(contract.terminal_pos, &contract.deposit, &acceptor);
                    (ContractState::Completed, "COMPLETED", "CONTRACT_COMPLETE")
                }
            };
            let Some(slot) = self.contracts.get_mut(&contract_id) else {
                continue;
            };
            slot.state = state;
            let updated = slot.clone();
            if state == ContractState::Completed {
                self.credit_contract_completion(&updated);
            }
            self.audit(
                audit_action,
                SYSTEM_ACTOR,
                Some(contract.terminal_pos),
                label,
                json!({
                    "contract_id": updated.contract_id,
                    "kind": updated.kind.as_str(),
                    "poster": updated.poster,
                    "acceptor": updated.acceptor,
                    "state": updated.state.to_string(),
                }),
            );
            self.notify_contract(&updated, label);
        }
    }
}

#[cfg(test)]
mod contract_tests {
    use super::*;

    #[test]
    fn decision_table() {
        use ContractDecision::*;
        use ContractKind::*;
        use ContractState::*;
        assert_eq!(decide_contract(Open, Gather, 5, 10, false, false, false), FailMissingTerminal);
        assert_eq!(decide_contract(Open, Gather, 11, 10, true, false, false), ExpireOpen);
        assert_eq!(decide_contract(Open, Gather, 10, 10, true, true, false), Noop);
        assert_eq!(decide_contract(Accepted, Deliver, 11, 10, true, true, false), TimeoutAccepted);
        assert_eq!(decide_contract(Accepted, Deliver, 9, 10, true, true, false), CompleteDeliver);
        assert_eq!(decide_contract(Accepted, Build, 9, 10, true, true, false), Noop);
        assert_eq!(decide_contract(Accepted, Build, 9, 10, true, false, true), CompleteBuild);
        assert_eq!(decide_contract(Completed, Build, 9, 10, false, false, true), Noop);
    }

    #[test]
    fn deposit_scales_with_trade_reputation() {
        assert_eq!(deposit_multiplier(100), 3);
        assert_eq!(deposit_multiplier(400), 2);
        assert_eq!(deposit_multiplier(REP_DEFAULT), 1);
    }
}
