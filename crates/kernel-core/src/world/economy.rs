use super::*;

const TRADE_TTL_TICKS: u64 = 3000;
const ITEM_SWEEP_EVERY_TICKS: u64 = 50;
const FAIR_TRADE_MIN_PCT: u64 = 50;

/// Tax withheld from a stack of `count` at `rate`: `floor(count * rate)`.
pub fn tax_on(count: u32, rate: f64) -> u32 {
    if rate.is_nan() || rate <= 0.0 {
        return 0;
    }
    let rate = rate.min(1.0);
    ((f64::from(count) * rate).floor() as u32).min(count)
}

/// True when the smaller side is worth at least half of the larger.
pub fn fair_trade(offer_value: u64, request_value: u64) -> bool {
    let low = offer_value.min(request_value);
    let high = offer_value.max(request_value);
    high > 0 && low * 100 >= high * FAIR_TRADE_MIN_PCT
}

impl VoxelWorld {
    /// Sum of item values per the catalog value table.
    pub(super) fn trade_value(&self, items: &Inventory) -> u64 {
        items
            .iter()
            .map(|(item, count)| self.catalog.item_value(item) * u64::from(*count))
            .sum()
    }

    /// Trade tax rate and sink: both parties on the same land pay that land's effective tax.
    pub(super) fn trade_tax(&self, from: &str, to: &str) -> Option<(f64, String, String)> {
        let from_pos = self.agent_pos(from)?;
        let to_pos = self.agent_pos(to)?;
        let land = self.claim_at(from_pos)?;
        let other = self.claim_at(to_pos)?;
        if land.land_id != other.land_id {
            return None;
        }
        let rate = self.effective_tax(land);
        (rate > 0.0).then(|| (rate, land.land_id.clone(), land.owner.clone()))
    }

    /// Moves `items` from one agent to another, withholding tax for `sink`.
    pub(super) fn transfer_with_tax(&mut self, from: &str, to: &str, items: &Inventory, rate: f64, sink: Option<&str>) -> Inventory {
        let mut withheld = Inventory::new();
        for (item, count) in items {
            let tax = if sink.is_some() { tax_on(*count, rate) } else { 0 };
            if let Some(agent) = self.agents.get_mut(from) {
                inv_take(&mut agent.inventory, item, *count);
            }
            if let Some(agent) = self.agents.get_mut(to) {
                inv_add(&mut agent.inventory, item, count - tax);
            }
            inv_add(&mut withheld, item, tax);
        }
        if let Some(sink) = sink {
            for (item, count) in &withheld {
                self.credit_owner(sink, item, *count);
            }
        }
        withheld
    }

    /// Expires stale trade offers and sweeps old item entities.
    pub(super) fn run_economy_system(&mut self) {
        let now = self.tick;
        let expired: Vec<String> = self
            .trades
            .values()
            .filter(|trade| now >= trade.created_tick + TRADE_TTL_TICKS)
            .map(|trade| trade.trade_id.clone())
            .collect();
        for trade_id in expired {
            if let Some(trade) = self.trades.remove(&trade_id) {
                self.emit(
                    &trade.from,
                    Event::TradeDeclined {
                        t: now,
                        trade_id: trade.trade_id,
                        by: SYSTEM_ACTOR.to_string(),
                    },
                );
            }
        }
        if now % ITEM_SWEEP_EVERY_TICKS == 0 {
            let ttl = self.catalog.tuning.item_entity_ttl_ticks;
            self.items
                .retain(|_, item| item.count > 0 && now < item.spawned_tick + ttl);
        }
    }
}

#[cfg(test)]
mod economy_tests {
    use super::*;

    #[test]
    fn tax_floors_and_clamps() {
        assert_eq!(tax_on(10, 0.1), 1);
        assert_eq!(tax_on(9, 0.1), 0);
        assert_eq!(tax_on(7, 2.0), 7);
        assert_eq!(tax_on(7, -0.5), 0);
        assert_eq!(tax_on(7, f64::NAN), 0);
    }

    #[test]
    fn fairness_threshold_is_half() {
        assert!(fair_trade(10, 5));
        assert!(!fair_trade(10, 4));
        assert!(!fair_trade(0, 0));
    }
}
