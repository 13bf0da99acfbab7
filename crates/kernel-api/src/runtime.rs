//! One tokio task per world. The task owns the [`VoxelWorld`]; everything else
//! talks to it through typed requests on a bounded inbox and awaits the reply.
//!
//! Joins, leaves and actions queue until the next tick. Transfers, org
//! metadata, injected events and queries are served between ticks; the world
//! records those mutations for the next tick log entry itself.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use contracts::{AckMsg, Event, MessageType, WelcomeMsg, WorldRef, PROTOCOL_VERSION_LATEST};
use kernel_core::model::{AgentTransfer, OrgMeta};
use kernel_core::world::{EventPage, JoinedAgent};
use kernel_core::{ActionEnvelope, JoinSpec, SnapshotV1, StepInput, StepOutcome, Vec3, VoxelWorld};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::outbox::Outbox;
use crate::persistence::{write_snapshot, SnapshotIndex, WorldLogs, WorldPaths};
use crate::{ApiError, Result};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_LEAVE_TIMEOUT: Duration = Duration::from_millis(300);
pub const DEFAULT_INJECT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_INBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Snapshots, logs and the index go under `<data_dir>/worlds/<id>/`; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// `None` steps only on [`WorldHandle::step_once`].
    pub tick_interval: Option<Duration>,
    /// Sent in WELCOME.
    pub manifest: Vec<WorldRef>,
    pub inbox_capacity: usize,
    pub request_timeout: Duration,
    pub leave_timeout: Duration,
    pub inject_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            data_dir: None,
            tick_interval: None,
            manifest: Vec::new(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            leave_timeout: DEFAULT_LEAVE_TIMEOUT,
            inject_timeout: DEFAULT_INJECT_TIMEOUT,
        }
    }
}

impl RuntimeOptions {
    /// Ticks on a wall-clock timer at `tick_rate_hz`.
    pub fn live(tick_rate_hz: u32) -> Self {
        Self {
            tick_interval: Some(Duration::from_secs(1) / tick_rate_hz.max(1)),
            ..Self::default()
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    pub fn with_manifest(mut self, manifest: Vec<WorldRef>) -> Self {
        self.manifest = manifest;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub tick: u64,
    pub digest: String,
    /// Agents admitted by the step's own `joins`, same order.
    pub joined: Vec<JoinedAgent>,
}

enum Request {
    Join {
        spec: JoinSpec,
        outbox: Outbox,
        resp: oneshot::Sender<WelcomeMsg>,
    },
    Attach {
        resume_token: String,
        delta_voxels: bool,
        outbox: Outbox,
        resp: oneshot::Sender<Result<WelcomeMsg>>,
    },
    Leave {
        agent_id: String,
    },
    Submit {
        envelope: ActionEnvelope,
    },
    TransferOut {
        agent_id: String,
        resp: oneshot::Sender<Result<AgentTransfer>>,
    },
    TransferIn {
        transfer: Box<AgentTransfer>,
        outbox: Option<Outbox>,
        delta_voxels: bool,
        resp: oneshot::Sender<Result<()>>,
    },
    AgentPos {
        agent_id: String,
        resp: oneshot::Sender<Option<Vec3>>,
    },
    InjectEvent {
        agent_id: String,
        event: Event,
        resp: oneshot::Sender<Result<()>>,
    },
    OrgMetaSnapshot {
        resp: oneshot::Sender<Vec<OrgMeta>>,
    },
    UpsertOrgMeta {
        metas: Vec<OrgMeta>,
        resp: oneshot::Sender<bool>,
    },
    Snapshot {
        resp: oneshot::Sender<SnapshotV1>,
    },
    ImportSnapshot {
        snapshot: Box<SnapshotV1>,
        resp: oneshot::Sender<Result<()>>,
    },
    CheckOrRememberActAck {
        agent_id: String,
        world_id: String,
        ack_for: String,
        ack: AckMsg,
        resp: oneshot::Sender<(AckMsg, bool)>,
    },
    EventsSince {
        agent_id: String,
        since: u64,
        limit: usize,
        resp: oneshot::Sender<Option<EventPage>>,
    },
    ResetWorld {
        reason: String,
        resp: oneshot::Sender<Result<u64>>,
    },
    Tick {
        resp: oneshot::Sender<u64>,
    },
    StepOnce {
        input: StepInput,
        resp: oneshot::Sender<StepReport>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

struct PendingJoin {
    spec: JoinSpec,
    outbox: Outbox,
    resp: oneshot::Sender<WelcomeMsg>,
}

struct Persistence {
    paths: WorldPaths,
    logs: WorldLogs,
    index: SnapshotIndex,
    every: u64,
    last_snapshot_tick: Option<u64>,
}

impl Persistence {
    fn open(data_dir: PathBuf, world: &VoxelWorld) -> Result<Self> {
        let paths = WorldPaths::new(data_dir, world.world_id());
        let index = SnapshotIndex::open(paths.index_db())?;
        let mut persistence = Self {
            logs: WorldLogs::new(&paths),
            paths,
            index,
            every: world.config().snapshot_every_ticks,
            last_snapshot_tick: None,
        };
        persistence.snapshot(world)?;
        Ok(persistence)
    }

    fn after_step(&mut self, world: &VoxelWorld, outcome: &StepOutcome) -> Result<()> {
        self.logs.append(outcome)?;
        if self.every > 0 && outcome.tick % self.every == 0 {
            self.snapshot(world)?;
        }
        Ok(())
    }

    /// Writes `<tick>.snap.zst`, rotates the logs so the next segment starts after it, and indexes it.
    fn snapshot(&mut self, world: &VoxelWorld) -> Result<()> {
        let tick = world.tick();
        if self.last_snapshot_tick == Some(tick) {
            return Ok(());
        }
        let snapshot = world.export_snapshot();
        let path = self.paths.snapshot(tick);
        write_snapshot(&path, &snapshot)?;
        self.logs.rotate()?;
        self.index
            .record_snapshot(&path.display().to_string(), &snapshot)?;
        self.last_snapshot_tick = Some(tick);
        info!(world_id = %world.world_id(), tick, path = %path.display(), "snapshot written");
        Ok(())
    }

    fn close(&mut self, world: &VoxelWorld) -> Result<()> {
        self.snapshot(world)?;
        self.logs.rotate()
    }
}

struct WorldRuntime {
    world: VoxelWorld,
    manifest: Vec<WorldRef>,
    outboxes: BTreeMap<String, Outbox>,
    pending_joins: Vec<PendingJoin>,
    pending_leaves: Vec<String>,
    pending_actions: Vec<ActionEnvelope>,
    persistence: Option<Persistence>,
}

impl WorldRuntime {
    fn welcome(&self, agent_id: &str, resume_token: &str) -> WelcomeMsg {
        WelcomeMsg {
            msg_type: MessageType::Welcome,
            protocol_version: PROTOCOL_VERSION_LATEST.to_string(),
            agent_id: agent_id.to_string(),
            resume_token: resume_token.to_string(),
            world_params: self.world.world_params(),
            current_world_id: self.world.world_id().to_string(),
            world_manifest: self.manifest.clone(),
            catalogs: self.world.catalog().digests().clone(),
            server_capabilities: Default::default(),
        }
    }

    /// Returns false once the loop should stop.
    fn handle(&mut self, request: Request) -> bool {
        match request {
            Request::Join { spec, outbox, resp } => {
                self.pending_joins.push(PendingJoin { spec, outbox, resp });
            }
            Request::Attach {
                resume_token,
                delta_voxels,
                outbox,
                resp,
            } => {
                let _ = resp.send(self.attach(&resume_token, delta_voxels, outbox));
            }
            Request::Leave { agent_id } => self.pending_leaves.push(agent_id),
            Request::Submit { envelope } => self.pending_actions.push(envelope),
            Request::TransferOut { agent_id, resp } => {
                let result = self.world.transfer_out(&agent_id).map_err(ApiError::from);
                if result.is_ok() {
                    self.outboxes.remove(&agent_id);
                }
                let _ = resp.send(result);
            }
            Request::TransferIn {
                transfer,
                outbox,
                delta_voxels,
                resp,
            } => {
                let agent_id = transfer.agent.id.clone();
                let result = self
                    .world
                    .transfer_in(*transfer, delta_voxels)
                    .map_err(ApiError::from);
                if result.is_ok() {
                    if let Some(outbox) = outbox {
                        self.outboxes.insert(agent_id, outbox);
                    }
                }
                let _ = resp.send(result);
            }
            Request::AgentPos { agent_id, resp } => {
                let _ = resp.send(self.world.agent_pos(&agent_id));
            }
            Request::InjectEvent {
                agent_id,
                event,
                resp,
            } => {
                let _ = resp.send(self.world.inject_event(&agent_id, event).map_err(ApiError::from));
            }
            Request::OrgMetaSnapshot { resp } => {
                let _ = resp.send(self.world.org_meta_snapshot());
            }
            Request::UpsertOrgMeta { metas, resp } => {
                let _ = resp.send(self.world.upsert_org_meta(&metas));
            }
            Request::Snapshot { resp } => {
                let _ = resp.send(self.world.export_snapshot());
            }
            Request::ImportSnapshot { snapshot, resp } => {
                let result = self.world.import_snapshot(*snapshot).map_err(ApiError::from);
                if result.is_ok() {
                    let world = &self.world;
                    self.outboxes.retain(|agent_id, _| world.agent(agent_id).is_some());
                }
                let _ = resp.send(result);
            }
            Request::CheckOrRememberActAck {
                agent_id,
                world_id,
                ack_for,
                ack,
                resp,
            } => {
                let _ = resp.send(
                    self.world
                        .check_or_remember_ack(&agent_id, &world_id, &ack_for, ack),
                );
            }
            Request::EventsSince {
                agent_id,
                since,
                limit,
                resp,
            } => {
                let _ = resp.send(self.world.events_since(&agent_id, since, limit));
            }
            Request::ResetWorld { reason, resp } => {
                let _ = resp.send(self.world.reset_world(&reason).map_err(ApiError::from));
            }
            Request::Tick { resp } => {
                let _ = resp.send(self.world.tick());
            }
            Request::StepOnce { input, resp } => {
                let report = self.step(input);
                let _ = resp.send(report);
            }
            Request::Shutdown { resp } => {
                self.close();
                let _ = resp.send(());
                return false;
            }
        }
        true
    }

    fn attach(&mut self, resume_token: &str, delta_voxels: bool, outbox: Outbox) -> Result<WelcomeMsg> {
        let agent_id = self
            .world
            .agent_by_resume_token(resume_token)
            .map(|agent| agent.id.clone())
            .ok_or_else(|| ApiError::World(kernel_core::WorldError::AgentNotFound(resume_token.to_string())))?;
        self.world.attach_session(&agent_id, delta_voxels)?;
        self.outboxes.insert(agent_id.clone(), outbox);
        debug!(world_id = %self.world.world_id(), agent_id = %agent_id, "session attached");
        Ok(self.welcome(&agent_id, resume_token))
    }

    /// Runs one tick over everything queued plus `extra`.
    fn step(&mut self, extra: StepInput) -> StepReport {
        let pending = std::mem::take(&mut self.pending_joins);
        let queued_joins = pending.len();
        let mut joins: Vec<JoinSpec> = pending.iter().map(|join| join.spec.clone()).collect();
        joins.extend(extra.joins);
        let mut leaves = std::mem::take(&mut self.pending_leaves);
        leaves.extend(extra.leaves);
        let mut actions = std::mem::take(&mut self.pending_actions);
        actions.extend(extra.actions);

        let outcome = self.world.step_once(StepInput {
            external: extra.external,
            joins,
            leaves: leaves.clone(),
            actions,
        });

        for agent_id in &leaves {
            if self.outboxes.remove(agent_id).is_some() {
                debug!(world_id = %self.world.world_id(), agent_id = %agent_id, "session left");
            }
        }
        let mut welcomes = Vec::with_capacity(queued_joins);
        for (join, joined) in pending.into_iter().zip(outcome.joined.iter()) {
            self.outboxes.insert(joined.agent_id.clone(), join.outbox);
            debug!(world_id = %self.world.world_id(), agent_id = %joined.agent_id, name = %joined.name, "agent joined");
            welcomes.push((join.resp, self.welcome(&joined.agent_id, &joined.resume_token)));
        }

        for obs in &outcome.observations {
            if let Some(outbox) = self.outboxes.get(&obs.agent_id) {
                if outbox.push(obs.clone()) {
                    debug!(
                        world_id = %self.world.world_id(),
                        agent_id = %obs.agent_id,
                        tick = obs.tick,
                        obs_dropped = outbox.dropped(),
                        "outbox full, dropped oldest OBS"
                    );
                }
            }
        }

        if let Some(persistence) = self.persistence.as_mut() {
            if let Err(err) = persistence.after_step(&self.world, &outcome) {
                warn!(world_id = %self.world.world_id(), tick = outcome.tick, error = %err, "persistence failed");
            }
        }

        for (resp, welcome) in welcomes {
            let _ = resp.send(welcome);
        }
        StepReport {
            tick: outcome.tick,
            digest: outcome.digest,
            joined: outcome.joined.into_iter().skip(queued_joins).collect(),
        }
    }

    fn close(&mut self) {
        if let Some(persistence) = self.persistence.as_mut() {
            if let Err(err) = persistence.close(&self.world) {
                warn!(world_id = %self.world.world_id(), error = %err, "final snapshot failed");
            }
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Request>, tick_interval: Option<Duration>) {
        let mut ticker = tick_interval.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        info!(world_id = %self.world.world_id(), tick = self.world.tick(), "world started");
        loop {
            tokio::select! {
                request = inbox.recv() => match request {
                    Some(request) => {
                        if !self.handle(request) {
                            break;
                        }
                    }
                    None => {
                        self.close();
                        break;
                    }
                },
                _ = next_tick(&mut ticker) => {
                    self.step(StepInput::default());
                }
            }
        }
        info!(world_id = %self.world.world_id(), tick = self.world.tick(), "world stopped");
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cloneable client side of a world task.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    world_id: String,
    tx: mpsc::Sender<Request>,
    request_timeout: Duration,
    leave_timeout: Duration,
    inject_timeout: Duration,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Join { .. } => "Join",
            Self::Attach { .. } => "Attach",
            Self::Leave { .. } => "Leave",
            Self::Submit { .. } => "Submit",
            Self::TransferOut { .. } => "TransferOut",
            Self::TransferIn { .. } => "TransferIn",
            Self::AgentPos { .. } => "AgentPos",
            Self::InjectEvent { .. } => "InjectEvent",
            Self::OrgMetaSnapshot { .. } => "OrgMetaSnapshot",
            Self::UpsertOrgMeta { .. } => "UpsertOrgMeta",
            Self::Snapshot { .. } => "Snapshot",
            Self::ImportSnapshot { .. } => "ImportSnapshot",
            Self::CheckOrRememberActAck { .. } => "CheckOrRememberActAck",
            Self::EventsSince { .. } => "EventsSince",
            Self::ResetWorld { .. } => "ResetWorld",
            Self::Tick { .. } => "Tick",
            Self::StepOnce { .. } => "StepOnce",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl WorldHandle {
    /// Spawns the world task on the current tokio runtime. With a data dir the
    /// current state is snapshotted before the first tick.
    pub fn spawn(world: VoxelWorld, options: RuntimeOptions) -> Result<Self> {
        let persistence = match options.data_dir.clone() {
            Some(dir) => Some(Persistence::open(dir, &world)?),
            None => None,
        };
        let world_id = world.world_id().to_string();
        let (tx, rx) = mpsc::channel(options.inbox_capacity.max(1));
        let runtime = WorldRuntime {
            world,
            manifest: options.manifest.clone(),
            outboxes: BTreeMap::new(),
            pending_joins: Vec::new(),
            pending_leaves: Vec::new(),
            pending_actions: Vec::new(),
            persistence,
        };
        tokio::spawn(runtime.run(rx, options.tick_interval));
        Ok(Self {
            world_id,
            tx,
            request_timeout: options.request_timeout,
            leave_timeout: options.leave_timeout,
            inject_timeout: options.inject_timeout,
        })
    }

    pub fn world_id(&self) -> &str {
        &self.world_id
    }

    /// Sends and awaits the reply; the deadline covers both.
    async fn call<T>(
        &self,
        timeout: Duration,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T> {
        let (resp, rx) = oneshot::channel();
        let request = build(resp);
        let exchange = async {
            self.tx
                .send(request)
                .await
                .map_err(|_| ApiError::WorldClosed(self.world_id.clone()))?;
            rx.await
                .map_err(|_| ApiError::WorldClosed(self.world_id.clone()))
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(world_id = %self.world_id, timeout_ms = timeout.as_millis() as u64, "world request timed out");
                Err(ApiError::Timeout(self.world_id.clone()))
            }
        }
    }

    async fn send(&self, timeout: Duration, request: Request) -> Result<()> {
        match self.tx.send_timeout(request, timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(request)) => {
                warn!(world_id = %self.world_id, request = ?request, "world inbox full");
                Err(ApiError::Timeout(self.world_id.clone()))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                Err(ApiError::WorldClosed(self.world_id.clone()))
            }
        }
    }

    /// Resolves after the tick that admits the agent.
    pub async fn join(&self, name: &str, delta_voxels: bool, outbox: Outbox) -> Result<WelcomeMsg> {
        let spec = JoinSpec {
            name: name.to_string(),
            delta_voxels,
        };
        self.call(self.request_timeout, |resp| Request::Join { spec, outbox, resp })
            .await
    }

    pub async fn attach(&self, resume_token: &str, delta_voxels: bool, outbox: Outbox) -> Result<WelcomeMsg> {
        let resume_token = resume_token.to_string();
        self.call(self.request_timeout, |resp| Request::Attach {
            resume_token,
            delta_voxels,
            outbox,
            resp,
        })
        .await?
    }

    pub async fn leave(&self, agent_id: &str) -> Result<()> {
        self.send(
            self.leave_timeout,
            Request::Leave {
                agent_id: agent_id.to_string(),
            },
        )
        .await
    }

    pub async fn submit(&self, envelope: ActionEnvelope) -> Result<()> {
        self.send(self.request_timeout, Request::Submit { envelope })
            .await
    }

    pub async fn transfer_out(&self, agent_id: &str) -> Result<AgentTransfer> {
        let agent_id = agent_id.to_string();
        self.call(self.request_timeout, |resp| Request::TransferOut { agent_id, resp })
            .await?
    }

    pub async fn transfer_in(
        &self,
        transfer: AgentTransfer,
        outbox: Option<Outbox>,
        delta_voxels: bool,
    ) -> Result<()> {
        let transfer = Box::new(transfer);
        self.call(self.request_timeout, |resp| Request::TransferIn {
            transfer,
            outbox,
            delta_voxels,
            resp,
        })
        .await?
    }

    pub async fn agent_pos(&self, agent_id: &str) -> Result<Option<Vec3>> {
        let agent_id = agent_id.to_string();
        self.call(self.request_timeout, |resp| Request::AgentPos { agent_id, resp })
            .await
    }

    pub async fn inject_event(&self, agent_id: &str, event: Event) -> Result<()> {
        let agent_id = agent_id.to_string();
        self.call(self.inject_timeout, |resp| Request::InjectEvent {
            agent_id,
            event,
            resp,
        })
        .await?
    }

    pub async fn org_meta_snapshot(&self) -> Result<Vec<OrgMeta>> {
        self.call(self.request_timeout, |resp| Request::OrgMetaSnapshot { resp })
            .await
    }

    pub async fn upsert_org_meta(&self, metas: Vec<OrgMeta>) -> Result<bool> {
        self.call(self.request_timeout, |resp| Request::UpsertOrgMeta { metas, resp })
            .await
    }

    pub async fn snapshot(&self) -> Result<SnapshotV1> {
        self.call(self.request_timeout, |resp| Request::Snapshot { resp })
            .await
    }

    pub async fn import_snapshot(&self, snapshot: SnapshotV1) -> Result<()> {
        let snapshot = Box::new(snapshot);
        self.call(self.request_timeout, |resp| Request::ImportSnapshot { snapshot, resp })
            .await?
    }

    pub async fn check_or_remember_ack(
        &self,
        agent_id: &str,
        ack_for: &str,
        ack: AckMsg,
    ) -> Result<(AckMsg, bool)> {
        let agent_id = agent_id.to_string();
        let world_id = self.world_id.clone();
        let ack_for = ack_for.to_string();
        self.call(self.request_timeout, |resp| Request::CheckOrRememberActAck {
            agent_id,
            world_id,
            ack_for,
            ack,
            resp,
        })
        .await
    }

    pub async fn events_since(&self, agent_id: &str, since: u64, limit: usize) -> Result<Option<EventPage>> {
        let agent_id = agent_id.to_string();
        self.call(self.request_timeout, |resp| Request::EventsSince {
            agent_id,
            since,
            limit,
            resp,
        })
        .await
    }

    /// Admin reset; refused unless the world allows it.
    pub async fn reset_world(&self, reason: &str) -> Result<u64> {
        let reason = reason.to_string();
        self.call(self.request_timeout, |resp| Request::ResetWorld { reason, resp })
            .await?
    }

    pub async fn tick(&self) -> Result<u64> {
        self.call(self.request_timeout, |resp| Request::Tick { resp })
            .await
    }

    /// Runs exactly one tick over the queued requests plus `input`.
    pub async fn step_once(&self, input: StepInput) -> Result<StepReport> {
        self.call(self.request_timeout, |resp| Request::StepOnce { input, resp })
            .await
    }

    /// Flushes persistence and stops the task.
    pub async fn shutdown(&self) -> Result<()> {
        self.call(self.request_timeout, |resp| Request::Shutdown { resp })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contracts::{ActMsg, ActionResultEvent, InstantKind, InstantReq};
    use kernel_core::{CatalogBundle, WorldConfig};

    use super::*;
    use crate::persistence::{read_snapshot, read_tick_log_dir, IndexQuery};
    use crate::test_support::temp_dir;

    fn world(seed: i64) -> VoxelWorld {
        let mut config = WorldConfig::default();
        config.seed = seed;
        VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()))
    }

    async fn join(handle: &WorldHandle, name: &str, outbox: &Outbox) -> WelcomeMsg {
        let pending = {
            let handle = handle.clone();
            let name = name.to_string();
            let outbox = outbox.clone();
            tokio::spawn(async move { handle.join(&name, false, outbox).await })
        };
        tokio::task::yield_now().await;
        handle.step_once(StepInput::default()).await.expect("step");
        pending.await.expect("task").expect("welcome")
    }

    #[tokio::test]
    async fn join_resolves_on_the_next_tick_and_delivers_obs() {
        let handle = WorldHandle::spawn(world(1), RuntimeOptions::default()).expect("spawn");
        let outbox = Outbox::new(8);
        let welcome = join(&handle, "bot", &outbox).await;
        assert_eq!(welcome.agent_id, "A000001");
        assert_eq!(welcome.current_world_id, "OVERWORLD");
        let obs = outbox.try_recv().expect("obs");
        assert_eq!(obs.tick, 1);
        assert_eq!(handle.tick().await.expect("tick"), 1);
        let pos = handle.agent_pos("A000001").await.expect("pos");
        assert!(pos.is_some());
        handle.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn attach_by_resume_token_rebinds_the_outbox() {
        let handle = WorldHandle::spawn(world(2), RuntimeOptions::default()).expect("spawn");
        let first = Outbox::new(8);
        let welcome = join(&handle, "bot", &first).await;
        let second = Outbox::new(8);
        let again = handle
            .attach(&welcome.resume_token, false, second.clone())
            .await
            .expect("attach");
        assert_eq!(again.agent_id, welcome.agent_id);
        handle.step_once(StepInput::default()).await.expect("step");
        assert_eq!(second.try_recv().map(|obs| obs.tick), Some(2));
        assert!(handle.attach("nope", false, Outbox::new(1)).await.is_err());
    }

    #[tokio::test]
    async fn injected_result_shows_up_in_the_next_obs() {
        let handle = WorldHandle::spawn(world(3), RuntimeOptions::default()).expect("spawn");
        let outbox = Outbox::new(8);
        let welcome = join(&handle, "bot", &outbox).await;
        outbox.drain();
        handle
            .inject_event(&welcome.agent_id, Event::ActionResult(ActionResultEvent::ok(1, "sw")))
            .await
            .expect("inject");
        handle.step_once(StepInput::default()).await.expect("step");
        let obs = outbox.try_recv().expect("obs");
        assert!(obs
            .events
            .iter()
            .filter_map(Event::as_action_result)
            .any(|result| result.reference == "sw" && result.ok));
        assert!(handle
            .inject_event("A999999", Event::ActionResult(ActionResultEvent::ok(1, "x")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn queued_actions_apply_on_step() {
        let handle = WorldHandle::spawn(world(4), RuntimeOptions::default()).expect("spawn");
        let outbox = Outbox::new(8);
        let welcome = join(&handle, "bot", &outbox).await;
        outbox.drain();
        let mut say = InstantReq::new("hello", InstantKind::Say);
        say.text = Some("hi".into());
        handle
            .submit(ActionEnvelope {
                agent_id: welcome.agent_id.clone(),
                act: ActMsg::new(&welcome.agent_id, 2).with_instant(say),
            })
            .await
            .expect("submit");
        let report = handle.step_once(StepInput::default()).await.expect("step");
        assert_eq!(report.tick, 2);
        let obs = outbox.try_recv().expect("obs");
        assert!(obs
            .events
            .iter()
            .filter_map(Event::as_action_result)
            .any(|result| result.reference == "hello"));
    }

    #[tokio::test]
    async fn persistence_writes_snapshots_logs_and_index() {
        let dir = temp_dir("runtime-persist");
        let mut config = WorldConfig::default();
        config.snapshot_every_ticks = 4;
        let world = VoxelWorld::new(config, Arc::new(CatalogBundle::builtin()));
        let handle =
            WorldHandle::spawn(world, RuntimeOptions::default().with_data_dir(&dir)).expect("spawn");
        handle
            .step_once(StepInput {
                joins: vec![JoinSpec::new("bot")],
                ..StepInput::default()
            })
            .await
            .expect("step");
        for _ in 0..5 {
            handle.step_once(StepInput::default()).await.expect("step");
        }
        handle.shutdown().await.expect("shutdown");

        let paths = WorldPaths::new(&dir, "OVERWORLD");
        for tick in [0, 4, 6] {
            assert!(paths.snapshot(tick).exists(), "snapshot {tick}");
        }
        let snapshot = read_snapshot(paths.snapshot(4)).expect("read");
        assert_eq!(snapshot.tick(), 4);
        let ticks: Vec<u64> = read_tick_log_dir(paths.events_dir())
            .expect("logs")
            .iter()
            .map(|entry| entry.tick)
            .collect();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5, 6]);
        let index = SnapshotIndex::open(paths.index_db()).expect("index");
        assert_eq!(index.latest_tick().expect("latest"), Some(6));
        assert_eq!(index.query(IndexQuery::Agents, 4, 20).expect("agents").len(), 1);
    }
}
