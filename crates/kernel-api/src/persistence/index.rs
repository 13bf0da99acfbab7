use std::path::Path;
use std::str::FromStr;

use kernel_core::SnapshotV1;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{ApiError, Result};

/// Row sets `admin db` can print.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQuery {
    Snapshots,
    World,
    Agents,
    Claims,
    Orgs,
    Contracts,
    Boards,
    BoardPosts,
    Trades,
}

impl IndexQuery {
    pub const ALL: [IndexQuery; 9] = [
        Self::Snapshots,
        Self::World,
        Self::Agents,
        Self::Claims,
        Self::Orgs,
        Self::Contracts,
        Self::Boards,
        Self::BoardPosts,
        Self::Trades,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snapshots => "snapshots",
            Self::World => "world",
            Self::Agents => "agents",
            Self::Claims => "claims",
            Self::Orgs => "orgs",
            Self::Contracts => "contracts",
            Self::Boards => "boards",
            Self::BoardPosts => "board_posts",
            Self::Trades => "trades",
        }
    }
}

impl FromStr for IndexQuery {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|query| query.as_str() == raw.trim())
            .ok_or_else(|| ApiError::Config(format!("unknown query {raw:?}")))
    }
}

/// Per-world SQLite index of snapshot contents.
#[derive(Debug)]
pub struct SnapshotIndex {
    conn: Connection,
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(text)) => text,
        Ok(other) => other.to_string(),
        Err(_) => String::new(),
    }
}

impl SnapshotIndex {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        let mut index = Self { conn };
        index.configure()?;
        index.migrate()?;
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut index = Self {
            conn: Connection::open_in_memory()?,
        };
        index.migrate()?;
        Ok(index)
    }

    fn configure(&mut self) -> Result<()> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                tick INTEGER PRIMARY KEY,
                world_id TEXT NOT NULL,
                path TEXT NOT NULL,
                seed INTEGER NOT NULL,
                agents INTEGER NOT NULL,
                claims INTEGER NOT NULL,
                orgs INTEGER NOT NULL,
                contracts INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshot_world (
                tick INTEGER PRIMARY KEY,
                weather TEXT NOT NULL,
                weather_until_tick INTEGER NOT NULL,
                active_event_id TEXT,
                active_event_start_tick INTEGER NOT NULL,
                active_event_ends_tick INTEGER NOT NULL,
                active_event_center_json TEXT,
                active_event_radius INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS snapshot_agents (
                tick INTEGER NOT NULL,
                agent_id TEXT NOT NULL,
                name TEXT NOT NULL,
                org_id TEXT,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                z INTEGER NOT NULL,
                hp INTEGER NOT NULL,
                hunger INTEGER NOT NULL,
                stamina_milli INTEGER NOT NULL,
                rep_trade INTEGER NOT NULL,
                rep_build INTEGER NOT NULL,
                rep_social INTEGER NOT NULL,
                rep_law INTEGER NOT NULL,
                fun_json TEXT NOT NULL,
                inventory_json TEXT NOT NULL,
                PRIMARY KEY (tick, agent_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_claims (
                tick INTEGER NOT NULL,
                land_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                ax INTEGER NOT NULL,
                ay INTEGER NOT NULL,
                az INTEGER NOT NULL,
                radius INTEGER NOT NULL,
                market_tax REAL NOT NULL,
                members_json TEXT NOT NULL,
                PRIMARY KEY (tick, land_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_orgs (
                tick INTEGER NOT NULL,
                org_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                created_tick INTEGER NOT NULL,
                meta_version INTEGER NOT NULL,
                members_json TEXT NOT NULL,
                treasury_json TEXT NOT NULL,
                PRIMARY KEY (tick, org_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_contracts (
                tick INTEGER NOT NULL,
                contract_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                state TEXT NOT NULL,
                poster TEXT NOT NULL,
                acceptor TEXT,
                terminal_x INTEGER NOT NULL,
                terminal_y INTEGER NOT NULL,
                terminal_z INTEGER NOT NULL,
                created_tick INTEGER NOT NULL,
                deadline_tick INTEGER NOT NULL,
                requirements_json TEXT NOT NULL,
                reward_json TEXT NOT NULL,
                PRIMARY KEY (tick, contract_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_boards (
                tick INTEGER NOT NULL,
                board_id TEXT NOT NULL,
                x INTEGER NOT NULL,
                y INTEGER NOT NULL,
                z INTEGER NOT NULL,
                posts_count INTEGER NOT NULL,
                PRIMARY KEY (tick, board_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_board_posts (
                tick INTEGER NOT NULL,
                board_id TEXT NOT NULL,
                post_id TEXT NOT NULL,
                author TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                post_tick INTEGER NOT NULL,
                PRIMARY KEY (tick, board_id, post_id)
            );

            CREATE TABLE IF NOT EXISTS snapshot_trades (
                tick INTEGER NOT NULL,
                trade_id TEXT NOT NULL,
                from_agent TEXT NOT NULL,
                to_agent TEXT NOT NULL,
                created_tick INTEGER NOT NULL,
                offer_json TEXT NOT NULL,
                request_json TEXT NOT NULL,
                PRIMARY KEY (tick, trade_id)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshot_board_posts_author ON snapshot_board_posts(author, tick);
            CREATE INDEX IF NOT EXISTS idx_snapshot_trades_from ON snapshot_trades(from_agent, tick);
            ",
        )?;
        Ok(())
    }

    /// Replaces every row for the snapshot's tick in one transaction.
    pub fn record_snapshot(&mut self, path: &str, snapshot: &SnapshotV1) -> Result<()> {
        let tick = to_i64(snapshot.tick());
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT OR REPLACE INTO snapshots (
                tick, world_id, path, seed, agents, claims, orgs, contracts
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tick,
                snapshot.world_id(),
                path,
                snapshot.config.seed,
                snapshot.agents.len() as i64,
                snapshot.claims.len() as i64,
                snapshot.orgs.len() as i64,
                snapshot.contracts.len() as i64,
            ],
        )?;

        let director = &snapshot.director;
        let center_json = director
            .active_event_center
            .map(|center| serde_json::to_string(&center))
            .transpose()?;
        tx.execute(
            "INSERT OR REPLACE INTO snapshot_world (
                tick, weather, weather_until_tick, active_event_id, active_event_start_tick,
                active_event_ends_tick, active_event_center_json, active_event_radius
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                tick,
                director.weather.as_str(),
                to_i64(director.weather_until_tick),
                director.active_event_id.as_deref(),
                to_i64(director.active_event_start_tick),
                to_i64(director.active_event_ends_tick),
                center_json,
                director.active_event_radius,
            ],
        )?;

        for table in [
            "snapshot_agents",
            "snapshot_claims",
            "snapshot_orgs",
            "snapshot_contracts",
            "snapshot_boards",
            "snapshot_board_posts",
            "snapshot_trades",
        ] {
            tx.execute(&format!("DELETE FROM {table} WHERE tick = ?1"), params![tick])?;
        }

        for agent in &snapshot.agents {
            tx.execute(
                "INSERT INTO snapshot_agents (
                    tick, agent_id, name, org_id, x, y, z, hp, hunger, stamina_milli,
                    rep_trade, rep_build, rep_social, rep_law, fun_json, inventory_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    tick,
                    agent.id.as_str(),
                    agent.name.as_str(),
                    agent.org_id.as_deref(),
                    agent.pos.x,
                    agent.pos.y,
                    agent.pos.z,
                    agent.hp,
                    agent.hunger,
                    agent.stamina_milli,
                    agent.rep_trade,
                    agent.rep_build,
                    agent.rep_social,
                    agent.rep_law,
                    serde_json::to_string(&agent.fun)?,
                    serde_json::to_string(&agent.inventory)?,
                ],
            )?;
        }

        for claim in &snapshot.claims {
            tx.execute(
                "INSERT INTO snapshot_claims (
                    tick, land_id, owner, ax, ay, az, radius, market_tax, members_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    tick,
                    claim.land_id.as_str(),
                    claim.owner.as_str(),
                    claim.anchor.x,
                    claim.anchor.y,
                    claim.anchor.z,
                    claim.radius,
                    claim.market_tax,
                    serde_json::to_string(&claim.members)?,
                ],
            )?;
        }

        for org in &snapshot.orgs {
            tx.execute(
                "INSERT INTO snapshot_orgs (
                    tick, org_id, kind, name, created_tick, meta_version, members_json, treasury_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tick,
                    org.org_id.as_str(),
                    label(&org.kind),
                    org.name.as_str(),
                    to_i64(org.created_tick),
                    to_i64(org.meta_version),
                    serde_json::to_string(&org.members)?,
                    serde_json::to_string(&org.treasury)?,
                ],
            )?;
        }

        for contract in &snapshot.contracts {
            tx.execute(
                "INSERT INTO snapshot_contracts (
                    tick, contract_id, kind, state, poster, acceptor, terminal_x, terminal_y,
                    terminal_z, created_tick, deadline_tick, requirements_json, reward_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    tick,
                    contract.contract_id.as_str(),
                    label(&contract.kind),
                    label(&contract.state),
                    contract.poster.as_str(),
                    contract.acceptor.as_deref(),
                    contract.terminal_pos.x,
                    contract.terminal_pos.y,
                    contract.terminal_pos.z,
                    to_i64(contract.created_tick),
                    to_i64(contract.deadline_tick),
                    serde_json::to_string(&contract.requirements)?,
                    serde_json::to_string(&contract.reward)?,
                ],
            )?;
        }

        for board in &snapshot.boards {
            tx.execute(
                "INSERT INTO snapshot_boards (tick, board_id, x, y, z, posts_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tick,
                    board.id.as_str(),
                    board.pos.x,
                    board.pos.y,
                    board.pos.z,
                    board.posts.len() as i64,
                ],
            )?;
            for post in &board.posts {
                tx.execute(
                    "INSERT OR REPLACE INTO snapshot_board_posts (
                        tick, board_id, post_id, author, title, body, post_tick
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        tick,
                        board.id.as_str(),
                        post.post_id.as_str(),
                        post.author.as_str(),
                        post.title.as_str(),
                        post.body.as_str(),
                        to_i64(post.tick),
                    ],
                )?;
            }
        }

        for trade in &snapshot.trades {
            tx.execute(
                "INSERT INTO snapshot_trades (
                    tick, trade_id, from_agent, to_agent, created_tick, offer_json, request_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tick,
                    trade.trade_id.as_str(),
                    trade.from.as_str(),
                    trade.to.as_str(),
                    to_i64(trade.created_tick),
                    serde_json::to_string(&trade.offer)?,
                    serde_json::to_string(&trade.request)?,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn latest_tick(&self) -> Result<Option<u64>> {
        let tick: Option<i64> = self
            .conn
            .query_row("SELECT MAX(tick) FROM snapshots", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(tick.map(|t| u64::try_from(t).unwrap_or(0)))
    }

    /// Rows for `query` at `tick` as JSON objects; `snapshots` ignores the tick and lists newest first.
    pub fn query(&self, query: IndexQuery, tick: u64, limit: usize) -> Result<Vec<Value>> {
        let tick = to_i64(tick);
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        match query {
            IndexQuery::Snapshots => self.rows(
                tick,
                limit,
                "SELECT tick, world_id, path, seed, agents, claims, orgs, contracts
                 FROM snapshots WHERE ?1 >= 0 ORDER BY tick DESC LIMIT ?2",
                |row| {
                    Ok(json!({
                        "tick": row.get::<_, i64>(0)?,
                        "world_id": row.get::<_, String>(1)?,
                        "path": row.get::<_, String>(2)?,
                        "seed": row.get::<_, i64>(3)?,
                        "agents": row.get::<_, i64>(4)?,
                        "claims": row.get::<_, i64>(5)?,
                        "orgs": row.get::<_, i64>(6)?,
                        "contracts": row.get::<_, i64>(7)?,
                    }))
                },
            ),
            IndexQuery::World => self.rows(
                tick,
                limit,
                "SELECT tick, weather, weather_until_tick, active_event_id, active_event_start_tick,
                        active_event_ends_tick, active_event_center_json, active_event_radius
                 FROM snapshot_world WHERE tick = ?1 LIMIT ?2",
                |row| {
                    let center: Option<String> = row.get(6)?;
                    Ok(json!({
                        "tick": row.get::<_, i64>(0)?,
                        "weather": row.get::<_, String>(1)?,
                        "weather_until_tick": row.get::<_, i64>(2)?,
                        "active_event_id": row.get::<_, Option<String>>(3)?,
                        "active_event_start_tick": row.get::<_, i64>(4)?,
                        "active_event_ends_tick": row.get::<_, i64>(5)?,
                        "active_event_center": center
                            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok()),
                        "active_event_radius": row.get::<_, i64>(7)?,
                    }))
                },
            ),
            IndexQuery::Agents => self.rows(
                tick,
                limit,
                "SELECT agent_id, name, org_id, x, y, z, hp, hunger, stamina_milli,
                        rep_trade, rep_build, rep_social, rep_law, fun_json, inventory_json
                 FROM snapshot_agents WHERE tick = ?1 ORDER BY agent_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "agent_id": row.get::<_, String>(0)?,
                        "name": row.get::<_, String>(1)?,
                        "org_id": row.get::<_, Option<String>>(2)?,
                        "pos": [row.get::<_, i64>(3)?, row.get::<_, i64>(4)?, row.get::<_, i64>(5)?],
                        "hp": row.get::<_, i64>(6)?,
                        "hunger": row.get::<_, i64>(7)?,
                        "stamina_milli": row.get::<_, i64>(8)?,
                        "rep_trade": row.get::<_, i64>(9)?,
                        "rep_build": row.get::<_, i64>(10)?,
                        "rep_social": row.get::<_, i64>(11)?,
                        "rep_law": row.get::<_, i64>(12)?,
                        "fun": json_column(row, 13)?,
                        "inventory": json_column(row, 14)?,
                    }))
                },
            ),
            IndexQuery::Claims => self.rows(
                tick,
                limit,
                "SELECT land_id, owner, ax, ay, az, radius, market_tax, members_json
                 FROM snapshot_claims WHERE tick = ?1 ORDER BY land_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "land_id": row.get::<_, String>(0)?,
                        "owner": row.get::<_, String>(1)?,
                        "anchor": [row.get::<_, i64>(2)?, row.get::<_, i64>(3)?, row.get::<_, i64>(4)?],
                        "radius": row.get::<_, i64>(5)?,
                        "market_tax": row.get::<_, f64>(6)?,
                        "members": json_column(row, 7)?,
                    }))
                },
            ),
            IndexQuery::Orgs => self.rows(
                tick,
                limit,
                "SELECT org_id, kind, name, created_tick, meta_version, members_json, treasury_json
                 FROM snapshot_orgs WHERE tick = ?1 ORDER BY org_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "org_id": row.get::<_, String>(0)?,
                        "kind": row.get::<_, String>(1)?,
                        "name": row.get::<_, String>(2)?,
                        "created_tick": row.get::<_, i64>(3)?,
                        "meta_version": row.get::<_, i64>(4)?,
                        "members": json_column(row, 5)?,
                        "treasury": json_column(row, 6)?,
                    }))
                },
            ),
            IndexQuery::Contracts => self.rows(
                tick,
                limit,
                "SELECT contract_id, kind, state, poster, acceptor, terminal_x, terminal_y, terminal_z,
                        created_tick, deadline_tick, requirements_json, reward_json
                 FROM snapshot_contracts WHERE tick = ?1 ORDER BY contract_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "contract_id": row.get::<_, String>(0)?,
                        "kind": row.get::<_, String>(1)?,
                        "state": row.get::<_, String>(2)?,
                        "poster": row.get::<_, String>(3)?,
                        "acceptor": row.get::<_, Option<String>>(4)?,
                        "terminal_pos": [row.get::<_, i64>(5)?, row.get::<_, i64>(6)?, row.get::<_, i64>(7)?],
                        "created_tick": row.get::<_, i64>(8)?,
                        "deadline_tick": row.get::<_, i64>(9)?,
                        "requirements": json_column(row, 10)?,
                        "reward": json_column(row, 11)?,
                    }))
                },
            ),
            IndexQuery::Boards => self.rows(
                tick,
                limit,
                "SELECT board_id, x, y, z, posts_count
                 FROM snapshot_boards WHERE tick = ?1 ORDER BY board_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "board_id": row.get::<_, String>(0)?,
                        "pos": [row.get::<_, i64>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?],
                        "posts_count": row.get::<_, i64>(4)?,
                    }))
                },
            ),
            IndexQuery::BoardPosts => self.rows(
                tick,
                limit,
                "SELECT board_id, post_id, author, title, body, post_tick
                 FROM snapshot_board_posts WHERE tick = ?1
                 ORDER BY post_tick DESC, post_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "board_id": row.get::<_, String>(0)?,
                        "post_id": row.get::<_, String>(1)?,
                        "author": row.get::<_, String>(2)?,
                        "title": row.get::<_, String>(3)?,
                        "body": row.get::<_, String>(4)?,
                        "post_tick": row.get::<_, i64>(5)?,
                    }))
                },
            ),
            IndexQuery::Trades => self.rows(
                tick,
                limit,
                "SELECT trade_id, from_agent, to_agent, created_tick, offer_json, request_json
                 FROM snapshot_trades WHERE tick = ?1 ORDER BY trade_id LIMIT ?2",
                |row| {
                    Ok(json!({
                        "trade_id": row.get::<_, String>(0)?,
                        "from": row.get::<_, String>(1)?,
                        "to": row.get::<_, String>(2)?,
                        "created_tick": row.get::<_, i64>(3)?,
                        "offer": json_column(row, 4)?,
                        "request": json_column(row, 5)?,
                    }))
                },
            ),
        }
    }

    fn rows<F>(&self, tick: i64, limit: i64, sql: &str, map: F) -> Result<Vec<Value>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<Value>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![tick, limit], map)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn json_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Value> {
    let raw: String = row.get(index)?;
    Ok(serde_json::from_str(&raw).unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contracts::{ActMsg, InstantKind, InstantReq, ItemPair};
    use kernel_core::{ActionEnvelope, CatalogBundle, JoinSpec, StepInput, VoxelWorld, WorldConfig};

    use super::*;

    fn world_with_trade() -> VoxelWorld {
        let mut world = VoxelWorld::new(WorldConfig::default(), Arc::new(CatalogBundle::builtin()));
        world.step_once(StepInput {
            joins: vec![JoinSpec::new("alpha"), JoinSpec::new("beta")],
            ..StepInput::default()
        });
        let mut offer = InstantReq::new("o1", InstantKind::OfferTrade);
        offer.to = Some("A000002".into());
        offer.offer = vec![ItemPair("PLANK".into(), 2)];
        offer.request = vec![ItemPair("COAL".into(), 1)];
        let act = ActMsg::new("A000001", 2).with_instant(offer);
        world.step_once(StepInput {
            actions: vec![ActionEnvelope {
                agent_id: "A000001".into(),
                act,
            }],
            ..StepInput::default()
        });
        world
    }

    #[test]
    fn recorded_snapshot_answers_every_query() {
        let world = world_with_trade();
        let snapshot = world.export_snapshot();
        let mut index = SnapshotIndex::open_in_memory().expect("index");
        index.record_snapshot("snapshots/2.snap.zst", &snapshot).expect("record");
        index.record_snapshot("snapshots/2.snap.zst", &snapshot).expect("re-record is idempotent");

        assert_eq!(index.latest_tick().expect("latest"), Some(2));
        let snapshots = index.query(IndexQuery::Snapshots, 0, 20).expect("snapshots");
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0]["agents"], 2);

        let agents = index.query(IndexQuery::Agents, 2, 20).expect("agents");
        assert_eq!(agents.len(), 2);
        assert_eq!(agents[0]["agent_id"], "A000001");
        assert_eq!(agents[1]["name"], "beta");

        let trades = index.query(IndexQuery::Trades, 2, 20).expect("trades");
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0]["to"], "A000002");
        assert_eq!(trades[0]["offer"]["PLANK"], 2);

        let world_rows = index.query(IndexQuery::World, 2, 20).expect("world");
        assert_eq!(world_rows.len(), 1);
        assert_eq!(index.query(IndexQuery::Agents, 2, 1).expect("limited").len(), 1);
    }

    #[test]
    fn empty_index_has_no_latest_tick() {
        let index = SnapshotIndex::open_in_memory().expect("index");
        assert_eq!(index.latest_tick().expect("latest"), None);
        assert!(index.query(IndexQuery::Boards, 5, 20).expect("boards").is_empty());
    }

    #[test]
    fn query_names_parse() {
        assert_eq!("board_posts".parse::<IndexQuery>().ok(), Some(IndexQuery::BoardPosts));
        assert!("nope".parse::<IndexQuery>().is_err());
    }
}
