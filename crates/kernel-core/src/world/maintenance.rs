use super::*;

/// Stage after a due date: paid resets to 0, unpaid escalates to at most 2.
pub(super) fn next_maintenance_stage(stage: u8, paid: bool) -> u8 {
    if paid {
        0
    } else {
        (stage + 1).min(2)
    }
}

impl VoxelWorld {
    /// Charges each due claim's owner the daily upkeep, in land id order.
    pub(super) fn run_maintenance_system(&mut self) {
        let day = self.config.day_ticks;
        if day == 0 || self.claims.is_empty() {
            return;
        }
        let now = self.tick;
        let ids: Vec<String> = self.claims.keys().cloned().collect();
        for land_id in ids {
            let Some((owner, due, stage, anchor)) = self
                .claims
                .get(&land_id)
                .map(|claim| (claim.owner.clone(), claim.maintenance_due_tick, claim.maintenance_stage, claim.anchor))
            else {
                continue;
            };
            if due == 0 {
                if let Some(claim) = self.claims.get_mut(&land_id) {
                    claim.maintenance_due_tick = now + day;
                }
                continue;
            }
            if now < due {
                continue;
            }
            let paid = self.pay_maintenance(&owner);
            let stage = next_maintenance_stage(stage, paid);
            let next_due = due + day;
            if let Some(claim) = self.claims.get_mut(&land_id) {
                claim.maintenance_stage = stage;
                claim.maintenance_due_tick = next_due;
            }
            self.audit(
                "MAINTENANCE",
                SYSTEM_ACTOR,
                Some(anchor),
                if paid { "PAID" } else { "LATE" },
                json!({"land_id": land_id, "owner": owner, "stage": stage, "next_due_tick": next_due}),
            );
            let recipient = match self.orgs.get(&owner) {
                Some(org) => org.leader().map(str::to_string),
                None => Some(owner.clone()),
            };
            if let Some(recipient) = recipient {
                self.emit(
                    &recipient,
                    Event::Maintenance {
                        t: now,
                        land_id: land_id.clone(),
                        paid,
                        stage,
                        next_due_tick: next_due,
                    },
                );
            }
        }
    }

    /// Org owners pay from the treasury, agents from their inventory; all or nothing.
    fn pay_maintenance(&mut self, owner: &str) -> bool {
        let cost = self.config.maintenance_cost.clone();
        if let Some(org) = self.orgs.get_mut(owner) {
            return inv_take_all(&mut org.treasury, &cost);
        }
        match self.agents.get_mut(owner) {
            Some(agent) => inv_take_all(&mut agent.inventory, &cost),
            None => false,
        }
    }
}

#[cfg(test)]
mod maintenance_tests {
    use super::*;

    #[test]
    fn unpaid_upkeep_escalates_and_caps() {
        assert_eq!(next_maintenance_stage(0, false), 1);
        assert_eq!(next_maintenance_stage(1, false), 2);
        assert_eq!(next_maintenance_stage(2, false), 2);
        assert_eq!(next_maintenance_stage(2, true), 0);
    }
}
