use super::*;

/// Idempotency key for an ACT: the bundle id, else the first instant or task id.
pub fn ack_key(act: &ActMsg) -> Option<String> {
    act.act_id
        .as_deref()
        .or_else(|| act.instants.first().map(|instant| instant.id.as_str()))
        .or_else(|| act.tasks.first().map(|task| task.id.as_str()))
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

/// Bounded per-agent LRU of `(world_id, ack_for) -> AckMsg`.
#[derive(Debug, Clone, Default)]
pub(super) struct AckCache {
    capacity: usize,
    by_agent: BTreeMap<String, VecDeque<(String, AckMsg)>>,
}

impl AckCache {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            by_agent: BTreeMap::new(),
        }
    }

    fn check_or_remember(&mut self, agent_id: &str, key: String, ack: AckMsg) -> (AckMsg, bool) {
        let entries = self.by_agent.entry(agent_id.to_string()).or_default();
        if let Some(index) = entries.iter().position(|(existing, _)| *existing == key) {
            if let Some(hit) = entries.remove(index) {
                let cached = hit.1.clone();
                entries.push_back(hit);
                return (cached, true);
            }
        }
        entries.push_back((key, ack.clone()));
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        (ack, false)
    }

    pub(super) fn forget_agent(&mut self, agent_id: &str) {
        self.by_agent.remove(agent_id);
    }
}

impl VoxelWorld {
    /// Returns the first ack recorded for `(world_id, ack_for)`, remembering `ack` when new.
    pub fn check_or_remember_ack(
        &mut self,
        agent_id: &str,
        world_id: &str,
        ack_for: &str,
        ack: AckMsg,
    ) -> (AckMsg, bool) {
        let key = format!("{world_id}/{ack_for}");
        self.acks.check_or_remember(agent_id, key, ack)
    }
}

#[cfg(test)]
mod dedupe_tests {
    use super::*;

    #[test]
    fn replayed_key_returns_first_ack_and_evicts_oldest() {
        let mut cache = AckCache::new(2);
        let first = AckMsg::accepted("a1", "OVERWORLD", 4);
        let (ack, dup) = cache.check_or_remember("A000001", "OVERWORLD/a1".into(), first.clone());
        assert!(!dup);
        assert_eq!(ack, first);

        let later = AckMsg::accepted("a1", "OVERWORLD", 9);
        let (ack, dup) = cache.check_or_remember("A000001", "OVERWORLD/a1".into(), later);
        assert!(dup);
        assert_eq!(ack.tick, 4);

        cache.check_or_remember("A000001", "OVERWORLD/a2".into(), AckMsg::accepted("a2", "OVERWORLD", 5));
        cache.check_or_remember("A000001", "OVERWORLD/a3".into(), AckMsg::accepted("a3", "OVERWORLD", 6));
        let (_, dup) = cache.check_or_remember("A000001", "OVERWORLD/a1".into(), AckMsg::accepted("a1", "OVERWORLD", 10));
        assert!(!dup);
    }

    #[test]
    fn ack_key_falls_back_to_first_instant() {
        let act = ActMsg::new("A000001", 1).with_instant(InstantReq::new("i-7", InstantKind::Say));
        assert_eq!(ack_key(&act).as_deref(), Some("i-7"));
        assert_eq!(ack_key(&ActMsg::new("A000001", 1)), None);
    }
}
