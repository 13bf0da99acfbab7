//! Bounded per-agent OBS queue. The world never waits on it: when full, the
//! oldest frame is dropped and counted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use contracts::ObsMsg;
use tokio::sync::Notify;

#[derive(Debug)]
struct Shared {
    capacity: usize,
    queue: Mutex<VecDeque<ObsMsg>>,
    dropped: AtomicU64,
    notify: Notify,
}

/// Cloneable handle; the runtime pushes, the session side receives.
#[derive(Debug, Clone)]
pub struct Outbox {
    shared: Arc<Shared>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                queue: Mutex::new(VecDeque::new()),
                dropped: AtomicU64::new(0),
                notify: Notify::new(),
            }),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<ObsMsg>> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-blocking; returns true when an older frame had to be dropped.
    pub fn push(&self, obs: ObsMsg) -> bool {
        let dropped = {
            let mut queue = self.queue();
            let dropped = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(obs);
            dropped
        };
        if dropped {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.notify.notify_one();
        dropped
    }

    pub fn try_recv(&self) -> Option<ObsMsg> {
        self.queue().pop_front()
    }

    pub async fn recv(&self) -> ObsMsg {
        loop {
            if let Some(obs) = self.try_recv() {
                return obs;
            }
            self.shared.notify.notified().await;
        }
    }

    pub async fn recv_timeout(&self, timeout: Duration) -> Option<ObsMsg> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    pub fn drain(&self) -> Vec<ObsMsg> {
        self.queue().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use kernel_core::{CatalogBundle, JoinSpec, StepInput, VoxelWorld, WorldConfig};

    use super::*;

    fn obs(tick: u64) -> ObsMsg {
        let mut world = VoxelWorld::new(WorldConfig::default(), Arc::new(CatalogBundle::builtin()));
        let outcome = world.step_once(StepInput {
            joins: vec![JoinSpec::new("bot")],
            ..StepInput::default()
        });
        let mut obs = outcome.observations[0].clone();
        obs.tick = tick;
        obs
    }

    #[test]
    fn full_outbox_drops_oldest_and_counts() {
        let outbox = Outbox::new(2);
        assert!(!outbox.push(obs(1)));
        assert!(!outbox.push(obs(2)));
        assert!(outbox.push(obs(3)));
        assert_eq!(outbox.dropped(), 1);
        let ticks: Vec<u64> = outbox.drain().iter().map(|o| o.tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let outbox = Outbox::new(4);
        let reader = outbox.clone();
        let handle = tokio::spawn(async move { reader.recv().await.tick });
        outbox.push(obs(7));
        assert_eq!(handle.await.expect("join"), 7);
        assert!(outbox.recv_timeout(Duration::from_millis(10)).await.is_none());
    }
}
