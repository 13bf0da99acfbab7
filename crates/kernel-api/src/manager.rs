//! Multi-world manager: one runtime per configured world, agent residency,
//! cross-world switching, replicated org metadata, and the `state.json` file.
//!
//! Locks guard only the manager's own maps and are never held across an
//! `.await` on a world.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use contracts::{
    AckMsg, ActMsg, ActionResultEvent, ErrorCode, Event, InstantKind, WelcomeMsg,
};
use kernel_core::model::OrgMeta;
use kernel_core::world::ack_key;
use kernel_core::{ActionEnvelope, CatalogBundle, Vec3, VoxelWorld, WorldConfig};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info, warn};

use crate::outbox::Outbox;
use crate::persistence::{
    read_snapshot, read_state, state_file_path, write_state, PersistedState, SwitchMetric,
    WorldPaths, STATE_VERSION,
};
use crate::runtime::{RuntimeOptions, WorldHandle};
use crate::worlds_config::{EntryPoint, MultiWorldConfig, SwitchRoute, WorldSpec};
use crate::{ApiError, Result};

const STATE_DEBOUNCE: Duration = Duration::from_millis(200);
const ORG_REFRESH_DEBOUNCE: Duration = Duration::from_millis(150);
const ACT_REF: &str = "ACT";

#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub worlds: MultiWorldConfig,
    /// Shared tunables; each world overrides id, seed, boundary and capabilities.
    pub base: WorldConfig,
    pub catalog: Arc<CatalogBundle>,
    /// Holds `state.json` and per-world persistence; `None` runs in memory.
    pub data_dir: Option<PathBuf>,
    /// `None` uses each world's `tick_rate_hz`.
    pub tick_interval: Option<Duration>,
    pub state_debounce: Duration,
    pub org_refresh_debounce: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            worlds: MultiWorldConfig::default(),
            base: WorldConfig::default(),
            catalog: Arc::new(CatalogBundle::builtin()),
            data_dir: None,
            tick_interval: None,
            state_debounce: STATE_DEBOUNCE,
            org_refresh_debounce: ORG_REFRESH_DEBOUNCE,
        }
    }
}

/// What a caller holds for a connected agent.
#[derive(Debug, Clone)]
pub struct Session {
    pub agent_id: String,
    pub welcome: WelcomeMsg,
    pub outbox: Outbox,
}

#[derive(Debug, Clone)]
struct SessionState {
    resume_token: String,
    current_world: String,
    delta_voxels: bool,
    outbox: Outbox,
    permits: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Tables {
    agent_to_world: BTreeMap<String, String>,
    resume_to_world: BTreeMap<String, String>,
    org_meta: BTreeMap<String, OrgMeta>,
    switch_totals: BTreeMap<(String, String, String), u64>,
}

impl Tables {
    fn from_persisted(state: PersistedState) -> Self {
        let mut switch_totals = BTreeMap::new();
        for metric in state.switch_metrics {
            *switch_totals
                .entry((metric.from, metric.to, metric.result))
                .or_insert(0) += metric.count;
        }
        Self {
            agent_to_world: state.agent_to_world,
            resume_to_world: state.resume_to_world,
            org_meta: state.org_meta,
            switch_totals,
        }
    }

    fn to_persisted(&self) -> PersistedState {
        PersistedState {
            version: STATE_VERSION,
            agent_to_world: self.agent_to_world.clone(),
            resume_to_world: self.resume_to_world.clone(),
            org_meta: self.org_meta.clone(),
            switch_metrics: self.switch_metrics(),
        }
    }

    fn switch_metrics(&self) -> Vec<SwitchMetric> {
        self.switch_totals
            .iter()
            .map(|((from, to, result), count)| SwitchMetric {
                from: from.clone(),
                to: to.clone(),
                result: result.clone(),
                count: *count,
            })
            .collect()
    }

    fn merge_org(&mut self, candidate: &OrgMeta) {
        if candidate.org_id.trim().is_empty() {
            return;
        }
        match self.org_meta.get_mut(&candidate.org_id) {
            Some(current) => current.merge(candidate),
            None => {
                self.org_meta
                    .insert(candidate.org_id.clone(), candidate.clone());
            }
        }
    }
}

struct Inner {
    config: MultiWorldConfig,
    worlds: BTreeMap<String, WorldHandle>,
    outbox_capacity: usize,
    tables: RwLock<Tables>,
    sessions: RwLock<BTreeMap<String, SessionState>>,
    state_path: Option<PathBuf>,
    state_dirty: Notify,
    org_dirty: Notify,
    shutdown: watch::Sender<bool>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable handle to the running manager.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("worlds", &self.inner.worlds.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A route and both of its resolved entry points.
struct SelectedRoute {
    route: SwitchRoute,
    from: EntryPoint,
    to: EntryPoint,
}

impl Manager {
    /// Starts every configured world. With a data dir, worlds resume from their
    /// newest snapshot and manager state is reloaded from `state.json`.
    pub async fn start(options: ManagerOptions) -> Result<Self> {
        options.worlds.validate()?;
        let manifest = options.worlds.manifest();
        let mut worlds = BTreeMap::new();
        for spec in &options.worlds.worlds {
            let world = load_world(&options, spec)?;
            let tick_interval = options
                .tick_interval
                .or_else(|| RuntimeOptions::live(world.config().tick_rate_hz).tick_interval);
            let mut runtime = RuntimeOptions {
                tick_interval,
                ..RuntimeOptions::default()
            }
            .with_manifest(manifest.clone());
            if let Some(dir) = &options.data_dir {
                runtime = runtime.with_data_dir(dir.clone());
            }
            let handle = WorldHandle::spawn(world, runtime)?;
            worlds.insert(spec.id.clone(), handle);
        }

        let state_path = options.data_dir.as_ref().map(state_file_path);
        let tables = match &state_path {
            Some(path) => read_state(path)?.map(Tables::from_persisted).unwrap_or_default(),
            None => Tables::default(),
        };
        let (shutdown, _) = watch::channel(false);
        let inner = Arc::new(Inner {
            config: options.worlds.clone(),
            worlds,
            outbox_capacity: options.base.outbox_capacity,
            tables: RwLock::new(tables),
            sessions: RwLock::new(BTreeMap::new()),
            state_path,
            state_dirty: Notify::new(),
            org_dirty: Notify::new(),
            shutdown,
        });
        let manager = Self { inner };
        manager.spawn_state_writer(options.state_debounce);
        manager.spawn_org_refresher(options.org_refresh_debounce);
        if !read(&manager.inner.tables).org_meta.is_empty() {
            manager.inner.org_dirty.notify_one();
        }
        info!(worlds = manager.inner.worlds.len(), "world manager started");
        Ok(manager)
    }

    fn spawn_state_writer(&self, debounce: Duration) {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = inner.state_dirty.notified() => {
                        tokio::time::sleep(debounce).await;
                        inner.flush_state();
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    fn spawn_org_refresher(&self, debounce: Duration) {
        let manager = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = manager.inner.org_dirty.notified() => {
                        tokio::time::sleep(debounce).await;
                        if let Err(err) = manager.refresh_org_meta().await {
                            warn!(error = %err, "org metadata refresh failed");
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    pub fn config(&self) -> &MultiWorldConfig {
        &self.inner.config
    }

    pub fn world(&self, world_id: &str) -> Option<&WorldHandle> {
        self.inner.worlds.get(world_id)
    }

    pub fn world_ids(&self) -> Vec<String> {
        self.inner.worlds.keys().cloned().collect()
    }

    fn handle(&self, world_id: &str) -> Result<&WorldHandle> {
        self.world(world_id)
            .ok_or_else(|| ApiError::WorldNotFound(world_id.to_string()))
    }

    /// Joins the preferred world when it exists, else the default world.
    pub async fn join(&self, name: &str, delta_voxels: bool, preference: Option<&str>) -> Result<Session> {
        let target = match preference {
            Some(id) if self.inner.worlds.contains_key(id) => id.to_string(),
            _ => self.inner.config.default_world_id.clone(),
        };
        let outbox = Outbox::new(self.inner.outbox_capacity);
        let mut welcome = self
            .handle(&target)?
            .join(name, delta_voxels, outbox.clone())
            .await?;
        welcome.current_world_id = target.clone();
        self.register(&welcome, &target, delta_voxels, outbox.clone());
        info!(agent_id = %welcome.agent_id, world_id = %target, "agent joined");
        Ok(Session {
            agent_id: welcome.agent_id.clone(),
            welcome,
            outbox,
        })
    }

    /// Tries the world recorded for the token first, then every other world.
    pub async fn attach(&self, resume_token: &str, delta_voxels: bool) -> Result<Session> {
        let recorded = read(&self.inner.tables)
            .resume_to_world
            .get(resume_token)
            .cloned();
        let mut order: Vec<String> = recorded.iter().cloned().collect();
        order.extend(
            self.inner
                .worlds
                .keys()
                .filter(|id| Some(*id) != recorded.as_ref())
                .cloned(),
        );
        let outbox = Outbox::new(self.inner.outbox_capacity);
        for world_id in order {
            let Some(handle) = self.world(&world_id) else {
                continue;
            };
            match handle.attach(resume_token, delta_voxels, outbox.clone()).await {
                Ok(mut welcome) => {
                    welcome.current_world_id = world_id.clone();
                    self.register(&welcome, &world_id, delta_voxels, outbox.clone());
                    debug!(agent_id = %welcome.agent_id, world_id = %world_id, "session attached");
                    return Ok(Session {
                        agent_id: welcome.agent_id.clone(),
                        welcome,
                        outbox,
                    });
                }
                Err(err) => debug!(world_id = %world_id, error = %err, "attach attempt failed"),
            }
        }
        Err(ApiError::World(kernel_core::WorldError::AgentNotFound(
            resume_token.to_string(),
        )))
    }

    fn register(&self, welcome: &WelcomeMsg, world_id: &str, delta_voxels: bool, outbox: Outbox) {
        let permits = read(&self.inner.sessions)
            .get(&welcome.agent_id)
            .map(|session| session.permits.clone())
            .unwrap_or_default();
        write(&self.inner.sessions).insert(
            welcome.agent_id.clone(),
            SessionState {
                resume_token: welcome.resume_token.clone(),
                current_world: world_id.to_string(),
                delta_voxels,
                outbox,
                permits,
            },
        );
        self.update_residency(&welcome.agent_id, world_id, Some(&welcome.resume_token));
    }

    fn update_residency(&self, agent_id: &str, world_id: &str, resume_token: Option<&str>) {
        {
            let mut tables = write(&self.inner.tables);
            tables
                .agent_to_world
                .insert(agent_id.to_string(), world_id.to_string());
            if let Some(token) = resume_token.filter(|token| !token.trim().is_empty()) {
                tables
                    .resume_to_world
                    .insert(token.to_string(), world_id.to_string());
            }
        }
        self.inner.state_dirty.notify_one();
    }

    fn session(&self, agent_id: &str) -> Result<SessionState> {
        read(&self.inner.sessions)
            .get(agent_id)
            .cloned()
            .ok_or_else(|| ApiError::World(kernel_core::WorldError::AgentNotFound(agent_id.to_string())))
    }

    pub fn current_world(&self, agent_id: &str) -> Option<String> {
        read(&self.inner.sessions)
            .get(agent_id)
            .map(|session| session.current_world.clone())
    }

    /// Lets the agent use routes that require a permit into `world_id`.
    pub fn grant_permit(&self, agent_id: &str, world_id: &str) -> bool {
        match write(&self.inner.sessions).get_mut(agent_id) {
            Some(session) => session.permits.insert(world_id.to_string()),
            None => false,
        }
    }

    pub async fn leave(&self, agent_id: &str) -> Result<()> {
        let session = write(&self.inner.sessions).remove(agent_id);
        let Some(session) = session else {
            return Ok(());
        };
        debug!(agent_id, world_id = %session.current_world, "session left");
        self.handle(&session.current_world)?.leave(agent_id).await
    }

    /// Checks `expected_world_id`, drops repeated act ids, intercepts
    /// `SWITCH_WORLD`, and forwards the rest.
    ///
    /// Returns the ACK for acts that carry an id. A repeated id gets the first
    /// ACK back and is not applied again.
    pub async fn route_act(&self, agent_id: &str, act: ActMsg) -> Result<Option<AckMsg>> {
        let session = self.session(agent_id)?;
        let current = session.current_world.clone();
        if let Some(expected) = act.expected_world_id.as_deref() {
            if !expected.is_empty() && expected != current {
                self.inject_result(
                    &current,
                    agent_id,
                    ActionResultEvent::err(0, ACT_REF, ErrorCode::WorldBusy, "expected_world_id mismatch"),
                )
                .await?;
                return Ok(None);
            }
        }

        let ack = match ack_key(&act) {
            Some(key) => {
                let handle = self.handle(&current)?;
                let fresh = AckMsg::accepted(key.as_str(), current.as_str(), handle.tick().await?);
                let (ack, duplicate) = handle.check_or_remember_ack(agent_id, &key, fresh).await?;
                if duplicate {
                    debug!(agent_id, world_id = %current, ack_for = %key, "duplicate act dropped");
                    return Ok(Some(ack));
                }
                Some(ack)
            }
            None => None,
        };

        let switch = act
            .instants
            .iter()
            .find(|instant| InstantKind::parse(&instant.kind) == Some(InstantKind::SwitchWorld))
            .cloned();
        if let Some(instant) = switch {
            let target = instant.target_world_id.clone().unwrap_or_default();
            self.switch_world(
                agent_id,
                &session,
                target.trim(),
                instant.target_entry_id.as_deref(),
                &instant.id,
            )
            .await?;
            return Ok(ack);
        }

        let mutates_org = act.instants.iter().any(|instant| {
            InstantKind::parse(&instant.kind)
                .map(InstantKind::mutates_org)
                .unwrap_or(false)
        });
        let envelope = ActionEnvelope {
            agent_id: agent_id.to_string(),
            act,
        };
        if let Err(err) = self.handle(&current)?.submit(envelope).await {
            warn!(agent_id, world_id = %current, error = %err, "action not forwarded");
            self.inject_result(
                &current,
                agent_id,
                ActionResultEvent::err(0, ACT_REF, ErrorCode::WorldBusy, "world inbox busy"),
            )
            .await?;
            return Ok(ack);
        }
        if mutates_org {
            self.inner.org_dirty.notify_one();
        }
        Ok(ack)
    }

    /// Injects a manager-built ACTION_RESULT stamped with the world's tick.
    async fn inject_result(&self, world_id: &str, agent_id: &str, mut result: ActionResultEvent) -> Result<()> {
        let handle = self.handle(world_id)?;
        if result.t == 0 {
            result.t = handle.tick().await?;
        }
        handle
            .inject_event(agent_id, Event::ActionResult(result))
            .await
    }

    fn record_switch(&self, from: &str, to: &str, result: &str) {
        {
            let mut tables = write(&self.inner.tables);
            *tables
                .switch_totals
                .entry((from.to_string(), to.to_string(), result.to_string()))
                .or_insert(0) += 1;
        }
        info!(from, to, result, "world switch");
        self.inner.state_dirty.notify_one();
    }

    #[allow(clippy::too_many_arguments)]
    async fn deny(
        &self,
        world_id: &str,
        agent_id: &str,
        target: &str,
        result: &str,
        reference: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<()> {
        self.record_switch(world_id, target, result);
        self.inject_result(world_id, agent_id, ActionResultEvent::err(0, reference, code, message))
            .await
    }

    fn select_route(&self, from: &str, to: &str, requested: Option<&str>, pos: Vec3) -> Option<SelectedRoute> {
        let config = &self.inner.config;
        let entry = |world: &str, id: &str| -> Option<EntryPoint> {
            config
                .world(world)?
                .entry_points
                .iter()
                .find(|entry| entry.id == id && entry.enabled)
                .cloned()
        };
        let candidates: Vec<SelectedRoute> = config
            .switch_routes
            .iter()
            .filter(|route| route.from_world == from && route.to_world == to)
            .filter_map(|route| {
                Some(SelectedRoute {
                    from: entry(from, &route.from_entry_id)?,
                    to: entry(to, &route.to_entry_id)?,
                    route: route.clone(),
                })
            })
            .collect();
        if let Some(requested) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            return candidates
                .into_iter()
                .find(|selected| selected.route.from_entry_id == requested);
        }
        let mut candidates = candidates.into_iter();
        let mut first = None;
        for selected in candidates.by_ref() {
            if selected.from.contains(pos.x, pos.z) {
                return Some(selected);
            }
            if first.is_none() {
                first = Some(selected);
            }
        }
        first
    }

    async fn switch_world(
        &self,
        agent_id: &str,
        session: &SessionState,
        target: &str,
        requested_entry: Option<&str>,
        reference: &str,
    ) -> Result<()> {
        let src_id = session.current_world.as_str();
        if target.is_empty() {
            return self
                .deny(src_id, agent_id, target, "invalid_target", reference, ErrorCode::WorldNotFound, "missing target world")
                .await;
        }
        if target == src_id {
            self.record_switch(src_id, target, "noop");
            let mut result = ActionResultEvent::ok(0, reference);
            result.message = Some("already in target world".to_string());
            return self.inject_result(src_id, agent_id, result).await;
        }
        let (Some(src), Some(dst), Some(dst_spec)) = (
            self.world(src_id),
            self.world(target),
            self.inner.config.world(target),
        ) else {
            return self
                .deny(src_id, agent_id, target, "world_not_found", reference, ErrorCode::WorldNotFound, "target world not found")
                .await;
        };

        let pos = match src.agent_pos(agent_id).await {
            Ok(Some(pos)) => pos,
            Ok(None) => {
                return self
                    .deny(src_id, agent_id, target, "source_busy", reference, ErrorCode::WorldBusy, "agent not found in source world")
                    .await
            }
            Err(err) => {
                return self
                    .deny(src_id, agent_id, target, "source_busy", reference, ErrorCode::WorldBusy, &err.to_string())
                    .await
            }
        };
        let Some(selected) = self.select_route(src_id, target, requested_entry, pos) else {
            return self
                .deny(src_id, agent_id, target, "denied", reference, ErrorCode::WorldDenied, "entry point required")
                .await;
        };
        if (selected.route.requires_permit || dst_spec.requires_permit) && !session.permits.contains(target) {
            return self
                .deny(src_id, agent_id, target, "denied", reference, ErrorCode::WorldDenied, "permit required")
                .await;
        }
        if !selected.from.contains(pos.x, pos.z) {
            return self
                .deny(src_id, agent_id, target, "denied", reference, ErrorCode::WorldDenied, "entry point required")
                .await;
        }

        let mut transfer = match src.transfer_out(agent_id).await {
            Ok(transfer) => transfer,
            Err(err) => {
                return self
                    .deny(src_id, agent_id, target, "source_busy", reference, ErrorCode::WorldBusy, &err.to_string())
                    .await
            }
        };
        let outbox = Some(session.outbox.clone());

        let dst_tick = match dst.tick().await {
            Ok(tick) => tick,
            Err(err) => {
                return self
                    .restore(src, transfer, session, target, "target_busy", reference, &format!("switch failed: {err}"))
                    .await
            }
        };
        let until = transfer.agent.world_switch_cooldown_until_tick;
        if until != 0 && dst_tick < until {
            return self
                .restore_with(src, transfer, session, target, "cooldown", reference, ErrorCode::WorldCooldown, "switch cooldown active")
                .await;
        }

        let org = {
            let mut tables = write(&self.inner.tables);
            if let Some(meta) = &transfer.org {
                tables.merge_org(meta);
            }
            transfer
                .org
                .as_ref()
                .and_then(|meta| tables.org_meta.get(&meta.org_id).cloned())
        };
        if org.is_some() {
            transfer.org = org;
        }
        transfer.agent.pos = Vec3::new(selected.to.x, 0, selected.to.z);
        transfer.from_world_id = src_id.to_string();
        transfer.from_entry_id = Some(selected.from.id.clone());
        transfer.to_entry_id = Some(selected.to.id.clone());
        transfer.agent.world_switch_cooldown_until_tick = dst_tick + dst_spec.switch_cooldown_ticks;

        if let Err(err) = dst
            .transfer_in(transfer.clone(), outbox, session.delta_voxels)
            .await
        {
            return self
                .restore(src, transfer, session, target, "target_busy", reference, &format!("switch failed: {err}"))
                .await;
        }

        if let Some(state) = write(&self.inner.sessions).get_mut(agent_id) {
            state.current_world = target.to_string();
        }
        self.update_residency(agent_id, target, Some(&session.resume_token));
        self.record_switch(src_id, target, "ok");
        let mut result = ActionResultEvent::ok(0, reference);
        result.world_id = Some(target.to_string());
        result.from = Some(src_id.to_string());
        result.from_entry_id = Some(selected.from.id);
        result.to_entry_id = Some(selected.to.id);
        if transfer.org.is_some() {
            self.inner.org_dirty.notify_one();
        }
        self.inject_result(target, agent_id, result).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn restore(
        &self,
        src: &WorldHandle,
        transfer: kernel_core::model::AgentTransfer,
        session: &SessionState,
        target: &str,
        result: &str,
        reference: &str,
        message: &str,
    ) -> Result<()> {
        self.restore_with(src, transfer, session, target, result, reference, ErrorCode::WorldBusy, message)
            .await
    }

    /// Puts a transferred-out agent back into its source world and reports the failure there.
    #[allow(clippy::too_many_arguments)]
    async fn restore_with(
        &self,
        src: &WorldHandle,
        transfer: kernel_core::model::AgentTransfer,
        session: &SessionState,
        target: &str,
        result: &str,
        reference: &str,
        code: ErrorCode,
        message: &str,
    ) -> Result<()> {
        let agent_id = transfer.agent.id.clone();
        let src_id = src.world_id().to_string();
        if let Err(err) = src
            .transfer_in(transfer, Some(session.outbox.clone()), session.delta_voxels)
            .await
        {
            error!(agent_id = %agent_id, from = %src_id, to = target, error = %err, "switch rollback failed, agent orphaned");
            self.record_switch(&src_id, target, "orphaned");
            return Err(ApiError::Transfer(format!(
                "{}: agent {agent_id} orphaned after failed switch to {target}: {err}",
                ErrorCode::Internal.as_str()
            )));
        }
        warn!(agent_id = %agent_id, from = %src_id, to = target, result, "switch rolled back");
        self.deny(&src_id, &agent_id, target, result, reference, code, message)
            .await
    }

    /// Merges every world's org view into the global table, then pushes the result to every world.
    pub async fn refresh_org_meta(&self) -> Result<()> {
        let mut first_err = None;
        for (world_id, handle) in &self.inner.worlds {
            match handle.org_meta_snapshot().await {
                Ok(metas) => {
                    let mut tables = write(&self.inner.tables);
                    for meta in &metas {
                        tables.merge_org(meta);
                    }
                }
                Err(err) => {
                    warn!(world_id = %world_id, error = %err, "org snapshot failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        let merged: Vec<OrgMeta> = read(&self.inner.tables).org_meta.values().cloned().collect();
        if !merged.is_empty() {
            for (world_id, handle) in &self.inner.worlds {
                if let Err(err) = handle.upsert_org_meta(merged.clone()).await {
                    warn!(world_id = %world_id, error = %err, "org upsert failed");
                    first_err.get_or_insert(err);
                }
            }
            self.inner.state_dirty.notify_one();
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn org_meta(&self, org_id: &str) -> Option<OrgMeta> {
        read(&self.inner.tables).org_meta.get(org_id).cloned()
    }

    /// Switch counters sorted by `(from, to, result)`.
    pub fn switch_metrics(&self) -> Vec<SwitchMetric> {
        read(&self.inner.tables).switch_metrics()
    }

    pub fn switch_total(&self, from: &str, to: &str, result: &str) -> u64 {
        read(&self.inner.tables)
            .switch_totals
            .get(&(from.to_string(), to.to_string(), result.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn resident_world(&self, agent_id: &str) -> Option<String> {
        read(&self.inner.tables).agent_to_world.get(agent_id).cloned()
    }

    /// Admin reset of one world; refused unless the world allows it.
    pub async fn reset_world(&self, world_id: &str, reason: &str) -> Result<u64> {
        self.handle(world_id)?.reset_world(reason).await
    }

    /// Writes `state.json` now.
    pub fn flush(&self) {
        self.inner.flush_state();
    }

    /// Stops background tasks, flushes state, and shuts every world down.
    pub async fn close(&self) -> Result<()> {
        let _ = self.inner.shutdown.send(true);
        self.inner.flush_state();
        let mut first_err = None;
        for (world_id, handle) in &self.inner.worlds {
            if let Err(err) = handle.shutdown().await {
                warn!(world_id = %world_id, error = %err, "world shutdown failed");
                first_err.get_or_insert(err);
            }
        }
        info!("world manager stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Inner {
    fn flush_state(&self) {
        let Some(path) = &self.state_path else {
            return;
        };
        let state = read(&self.tables).to_persisted();
        if let Err(err) = write_state(path, &state) {
            warn!(path = %path.display(), error = %err, "state flush failed");
        }
    }
}

fn load_world(options: &ManagerOptions, spec: &WorldSpec) -> Result<VoxelWorld> {
    let config = options.worlds.world_config(spec, &options.base);
    if let Some(dir) = &options.data_dir {
        if let Some((tick, path)) = WorldPaths::new(dir, &spec.id).latest_snapshot()? {
            let snapshot = read_snapshot(&path)?;
            let world = VoxelWorld::from_snapshot(snapshot, Arc::clone(&options.catalog))?;
            info!(world_id = %spec.id, tick, "world resumed from snapshot");
            return Ok(world);
        }
    }
    Ok(VoxelWorld::new(config, Arc::clone(&options.catalog)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_world_topology() -> MultiWorldConfig {
        MultiWorldConfig::from_yaml(
            r#"
default_world_id: OVERWORLD
worlds:
  - id: OVERWORLD
    entry_points: [{id: over_spawn, x: 0, z: 0, radius: 16}]
  - id: MINE_L1
    switch_cooldown_ticks: 300
    entry_points: [{id: mine_gate, x: 0, z: 0, radius: 8}]
switch_routes:
  - {from_world: OVERWORLD, from_entry_id: over_spawn, to_world: MINE_L1, to_entry_id: mine_gate}
  - {from_world: MINE_L1, from_entry_id: mine_gate, to_world: OVERWORLD, to_entry_id: over_spawn}
"#,
        )
        .expect("topology")
    }

    #[test]
    fn route_selection_prefers_the_entry_containing_the_agent() {
        let mut config = two_world_topology();
        config.worlds[0]
            .entry_points
            .push(EntryPoint::new("over_far", 200, 200, 4));
        config.switch_routes.insert(
            0,
            SwitchRoute::new("OVERWORLD", "over_far", "MINE_L1", "mine_gate"),
        );
        let selected = select_for_test(&config, Vec3::new(1, 0, 1));
        assert_eq!(selected.as_deref(), Some("over_spawn"));
        let fallback = select_for_test(&config, Vec3::new(900, 0, 900));
        assert_eq!(fallback.as_deref(), Some("over_far"));
    }

    fn select_for_test(config: &MultiWorldConfig, pos: Vec3) -> Option<String> {
        let (shutdown, _) = watch::channel(false);
        let manager = Manager {
            inner: Arc::new(Inner {
                config: config.clone(),
                worlds: BTreeMap::new(),
                outbox_capacity: 8,
                tables: RwLock::new(Tables::default()),
                sessions: RwLock::new(BTreeMap::new()),
                state_path: None,
                state_dirty: Notify::new(),
                org_dirty: Notify::new(),
                shutdown,
            }),
        };
        manager
            .select_route("OVERWORLD", "MINE_L1", None, pos)
            .map(|selected| selected.from.id)
    }

    #[test]
    fn persisted_totals_fold_into_sorted_metrics() {
        let mut state = PersistedState::default();
        for (from, result) in [("MINE_L1", "ok"), ("OVERWORLD", "denied"), ("MINE_L1", "ok")] {
            state.switch_metrics.push(SwitchMetric {
                from: from.into(),
                to: "CITY_HUB".into(),
                result: result.into(),
                count: 1,
            });
        }
        let tables = Tables::from_persisted(state);
        let metrics = tables.switch_metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].from, "MINE_L1");
        assert_eq!(metrics[0].count, 2);
        assert_eq!(metrics[1].result, "denied");
    }
}
