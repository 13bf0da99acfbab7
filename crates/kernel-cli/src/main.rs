use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kernel_api::persistence::{read_snapshot_header, IndexQuery, SnapshotIndex, WorldPaths};
use kernel_api::{
    replay_dir, rollback_world, simulate, Aabb, ApiError, MultiWorldConfig, ReplayOptions,
    RollbackOptions, SimulateOptions,
};
use tracing_subscriber::EnvFilter;

const DEFAULT_DB_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "voxel", version, about = "Voxel world kernel tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Re-step logged ticks on top of a snapshot and verify every digest.
    Replay {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        events: Option<PathBuf>,
        #[arg(long = "from_tick", alias = "from-tick")]
        from_tick: Option<u64>,
        #[arg(long = "to_tick", alias = "to-tick")]
        to_tick: Option<u64>,
    },
    Admin {
        #[command(subcommand)]
        command: AdminCommand,
    },
    /// Headless single world driven by scripted bots.
    Simulate {
        #[arg(long, default_value = kernel_api::worlds_config::DEFAULT_WORLD_ID)]
        world: String,
        #[arg(long, default_value_t = 1)]
        seed: i64,
        #[arg(long, default_value_t = 1000)]
        ticks: u64,
        #[arg(long, default_value_t = 2)]
        bots: usize,
        #[arg(long = "snapshot_every", alias = "snapshot-every")]
        snapshot_every: Option<u64>,
        #[arg(long)]
        data: Option<PathBuf>,
        /// Topology to take the world from; the built-in one when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    Worlds {
        #[command(subcommand)]
        command: WorldsCommand,
    },
}

#[derive(Subcommand)]
enum AdminCommand {
    /// Print snapshot index rows as NDJSON.
    Db {
        #[arg(long, default_value = kernel_api::worlds_config::DEFAULT_WORLD_ID)]
        world: String,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        tick: Option<u64>,
        #[arg(long, default_value_t = DEFAULT_DB_LIMIT)]
        limit: usize,
        query: IndexQuery,
    },
    /// Undo audited block writes inside a box and write a rollback snapshot.
    Rollback {
        #[arg(long)]
        world: String,
        #[arg(long)]
        aabb: Aabb,
        #[arg(long)]
        data: Option<PathBuf>,
        #[arg(long)]
        snapshot: Option<PathBuf>,
        #[arg(long = "since_tick", alias = "since-tick", default_value_t = 0)]
        since_tick: u64,
        #[arg(long = "to_tick", alias = "to-tick")]
        to_tick: Option<u64>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum WorldsCommand {
    /// Validate a worlds.yaml and print the normalized topology.
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn replay(snapshot: PathBuf, events: Option<PathBuf>, options: ReplayOptions) -> Result<(), ApiError> {
    let header = read_snapshot_header(&snapshot)?;
    println!(
        "snapshot v{} world={} tick={}",
        header.version, header.world_id, header.tick
    );
    let Some(events) = events else {
        return Ok(());
    };
    let report = replay_dir(&snapshot, &events, options)?;
    println!(
        "replay ok: checked={} ticks (from snapshot tick={}, last tick={})",
        report.checked, report.snapshot_tick, report.last_tick
    );
    Ok(())
}

fn admin_db(
    world: &str,
    db: Option<PathBuf>,
    data: Option<PathBuf>,
    tick: Option<u64>,
    limit: usize,
    query: IndexQuery,
) -> Result<(), ApiError> {
    let path = db.unwrap_or_else(|| {
        WorldPaths::new(data.unwrap_or_else(kernel_api::data_dir), world).index_db()
    });
    if !path.exists() {
        return Err(ApiError::Config(format!("index not found: {}", path.display())));
    }
    let index = SnapshotIndex::open(&path)?;
    let tick = match tick {
        Some(tick) => tick,
        None => index
            .latest_tick()?
            .ok_or_else(|| ApiError::Config(format!("index {} has no snapshots", path.display())))?,
    };
    for row in index.query(query, tick, limit)? {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}

fn worlds_check(config: Option<PathBuf>) -> Result<(), ApiError> {
    let path = config.unwrap_or_else(kernel_api::worlds_config_path);
    let topology = MultiWorldConfig::load(&path)?;
    print!("{}", serde_yaml::to_string(&topology)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<(), ApiError> {
    match cli.command {
        Command::Replay {
            snapshot,
            events,
            from_tick,
            to_tick,
        } => replay(snapshot, events, ReplayOptions { from_tick, to_tick }),
        Command::Admin {
            command:
                AdminCommand::Db {
                    world,
                    db,
                    data,
                    tick,
                    limit,
                    query,
                },
        } => admin_db(&world, db, data, tick, limit, query),
        Command::Admin {
            command:
                AdminCommand::Rollback {
                    world,
                    aabb,
                    data,
                    snapshot,
                    since_tick,
                    to_tick,
                    out,
                },
        } => {
            let report = rollback_world(&RollbackOptions {
                data_dir: data.unwrap_or_else(kernel_api::data_dir),
                world_id: world,
                aabb,
                snapshot,
                since_tick,
                to_tick,
                out,
            })?;
            match &report.out {
                Some(out) => println!(
                    "rollback ok: snapshot={} tick={} since={} to={} entries={} applied={} skipped={} out={}",
                    report.snapshot.display(),
                    report.snapshot_tick,
                    report.since_tick,
                    report.to_tick,
                    report.entries,
                    report.applied,
                    report.skipped,
                    out.display()
                ),
                None => println!("no matching audit entries; nothing to roll back"),
            }
            Ok(())
        }
        Command::Simulate {
            world,
            seed,
            ticks,
            bots,
            snapshot_every,
            data,
            config,
        } => {
            let worlds = match config {
                Some(path) => MultiWorldConfig::load(path)?,
                None => MultiWorldConfig::default(),
            };
            let data_dir = data.unwrap_or_else(kernel_api::data_dir);
            let report = simulate(SimulateOptions {
                world_id: world,
                seed,
                ticks,
                bots,
                data_dir: Some(data_dir.clone()),
                snapshot_every_ticks: snapshot_every,
                worlds,
            })
            .await?;
            println!(
                "simulated world={} seed={} tick={} digest={} agents={} acts={} data={}",
                report.world_id,
                seed,
                report.final_tick,
                report.digest,
                report.agents.len(),
                report.acts_sent,
                data_dir.display()
            );
            Ok(())
        }
        Command::Worlds {
            command: WorldsCommand::Check { config },
        } => worlds_check(config),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn admin_db_parses_query_and_defaults() {
        let cli = Cli::try_parse_from(["voxel", "admin", "db", "--world", "MINE_L1", "trades"]).expect("parse");
        match cli.command {
            Command::Admin {
                command: AdminCommand::Db { world, limit, query, tick, .. },
            } => {
                assert_eq!(world, "MINE_L1");
                assert_eq!(limit, DEFAULT_DB_LIMIT);
                assert_eq!(query, IndexQuery::Trades);
                assert_eq!(tick, None);
            }
            _ => panic!("expected admin db"),
        }
    }

    #[test]
    fn rollback_parses_the_box() {
        let cli = Cli::try_parse_from([
            "voxel", "admin", "rollback", "--world", "OVERWORLD", "--aabb", "0,0,0:4,0,4", "--since_tick", "3",
        ])
        .expect("parse");
        match cli.command {
            Command::Admin {
                command: AdminCommand::Rollback { aabb, since_tick, .. },
            } => {
                assert_eq!(aabb.max, [4, 0, 4]);
                assert_eq!(since_tick, 3);
            }
            _ => panic!("expected admin rollback"),
        }
        assert!(Cli::try_parse_from(["voxel", "admin", "rollback", "--world", "X", "--aabb", "bad"]).is_err());
    }
}
