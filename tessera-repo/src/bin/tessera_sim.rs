//! Tessera cache simulation.
//!
//! Starts a shard pool over a synthetic cluster, fires random key lookups at
//! every shard, and perturbs the topology between rounds (placement moves,
//! conflicts, deletions) to exercise the routing and cache lifecycles.
//!
//! ```bash
//! tessera-sim --shards 4 --tables 16 --machines 3 --rounds 6 --log-level debug
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_core::{KeyRange, MachineId, PeerId, ShardId, TableId};
use tessera_repo::{
    BusinessCard, DirectoryState, PeerDirectory, RepoConfig, RepoError, RoutedConstructor,
    ShardPool,
};
use tessera_routing::{PlacementPlan, Role, TableConfig, Topology};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Tessera shard cache simulation.
#[derive(Parser, Debug)]
#[command(name = "tessera-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker shards.
    #[arg(long, default_value = "4")]
    shards: u32,

    /// Number of tables in the synthetic topology.
    #[arg(long, default_value = "8")]
    tables: u64,

    /// Number of machines (one peer each).
    #[arg(long, default_value = "3")]
    machines: u64,

    /// Idle timeout for cache entries, in milliseconds.
    #[arg(long, default_value = "500")]
    idle_ms: u64,

    /// Number of request rounds.
    #[arg(long, default_value = "5")]
    rounds: u32,

    /// Requests per shard per round.
    #[arg(long, default_value = "200")]
    requests: u32,

    /// Seed for the request generator. Random if not given.
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

/// Outcome counts of one batch of lookups.
#[derive(Debug, Default, Clone, Copy)]
struct RoundStats {
    located: u64,
    with_contact: u64,
    unrouted: u64,
    cancelled: u64,
}

impl AddAssign for RoundStats {
    fn add_assign(&mut self, other: Self) {
        self.located += other.located;
        self.with_contact += other.with_contact;
        self.unrouted += other.unrouted;
        self.cancelled += other.cancelled;
    }
}

/// Splits the single-byte key space into `machines` contiguous primaries,
/// rotated by `shift`. Each machine is secondary for the next range.
fn placement(machines: u64, shift: u64) -> PlacementPlan {
    let mut plan = PlacementPlan::new();
    let step = 256 / machines;
    for slot in 0..machines {
        #[allow(clippy::cast_possible_truncation)]
        let start = if slot == 0 { Vec::new() } else { vec![(slot * step) as u8] };
        #[allow(clippy::cast_possible_truncation)]
        let range = if slot + 1 == machines {
            KeyRange::from_start(start)
        } else {
            KeyRange::new(start, vec![((slot + 1) * step) as u8])
        };
        let primary = MachineId::new((slot + shift) % machines);
        let secondary = MachineId::new((slot + shift + 1) % machines);
        plan.assign(primary, range.clone(), Role::Primary);
        if secondary != primary {
            plan.assign(secondary, range, Role::Secondary);
        }
    }
    plan
}

fn initial_topology(tables: u64, machines: u64) -> Topology {
    (0..tables).fold(Topology::new(), |topology, table| {
        topology.with_table(
            TableId::new(table),
            TableConfig::Resolved(placement(machines, table)),
        )
    })
}

fn directory(tables: u64, machines: u64) -> DirectoryState {
    (0..machines).fold(DirectoryState::new(), |state, machine| {
        let entry = (0..tables)
            // Every machine skips some tables so some lookups find no contact.
            // Each table keeps at least one card, otherwise it never gets ready.
            .filter(|table| machines == 1 || table % machines != machine)
            .fold(PeerDirectory::new(MachineId::new(machine)), |entry, table| {
                let card = BusinessCard::new(format!("machine-{machine}/table-{table}").into_bytes());
                entry.with_card(TableId::new(table), card)
            });
        state.with_peer(PeerId::new(machine), entry)
    })
}

/// Applies the round's topology change and describes it.
fn perturb(topology: &mut Topology, rng: &mut StdRng, args: &Args, round: u32) -> String {
    let table = TableId::new(rng.gen_range(0..args.tables));
    match round % 3 {
        0 => {
            let shift = rng.gen_range(0..args.machines);
            topology.set(table, TableConfig::Resolved(placement(args.machines, shift)));
            format!("moved primaries of {table}")
        }
        1 => {
            topology.set(table, TableConfig::InConflict);
            format!("marked {table} in conflict")
        }
        _ => {
            topology.set(table, TableConfig::Deleted);
            format!("deleted {table}")
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.tables == 0 || args.machines == 0 || args.machines > 256 {
        return Err("tables must be positive and machines must be within 1..=256".into());
    }

    let config = RepoConfig::new()
        .with_shard_count(args.shards)
        .with_idle_timeout(Duration::from_millis(args.idle_ms));
    let seed = args.seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    info!(
        shards = args.shards,
        tables = args.tables,
        machines = args.machines,
        idle_ms = args.idle_ms,
        seed,
        "Starting Tessera simulation"
    );

    let mut topology = initial_topology(args.tables, args.machines);
    let (topology_tx, topology_rx) = watch::channel(Arc::new(topology.clone()));
    let (_directory_tx, directory_rx) =
        watch::channel(Arc::new(directory(args.tables, args.machines)));

    let pool = ShardPool::start(config, RoutedConstructor, topology_rx, directory_rx)?;

    let mut total = RoundStats::default();
    for round in 0..args.rounds {
        let mut stats = RoundStats::default();
        for index in 0..args.shards {
            let requests: Vec<(TableId, [u8; 1])> = (0..args.requests)
                .map(|_| (TableId::new(rng.gen_range(0..args.tables)), [rng.gen::<u8>()]))
                .collect();

            stats += pool
                .run_on(ShardId::new(index), move |ctx| async move {
                    let mut stats = RoundStats::default();
                    for (table_id, key) in requests {
                        let table = match ctx.get_interface(table_id).await {
                            Ok(table) => table,
                            Err(RepoError::Cancelled { .. } | RepoError::ShuttingDown { .. }) => {
                                stats.cancelled += 1;
                                continue;
                            }
                        };
                        match table.locate(&key) {
                            Ok(location) => {
                                stats.located += 1;
                                if location.contact.is_some() {
                                    stats.with_contact += 1;
                                }
                            }
                            Err(_) => stats.unrouted += 1,
                        }
                    }
                    stats
                })
                .await?;
        }
        info!(
            round,
            located = stats.located,
            with_contact = stats.with_contact,
            unrouted = stats.unrouted,
            cancelled = stats.cancelled,
            "Round complete"
        );
        total += stats;

        let change = perturb(&mut topology, &mut rng, &args, round);
        topology_tx.send_replace(Arc::new(topology.clone()));
        info!(round, change = %change, "Topology changed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    report_caches(&pool, "after requests").await?;
    tokio::time::sleep(Duration::from_millis(args.idle_ms * 2)).await;
    report_caches(&pool, "after idle timeout").await?;

    info!(
        located = total.located,
        with_contact = total.with_contact,
        unrouted = total.unrouted,
        cancelled = total.cancelled,
        "Simulation complete"
    );
    pool.shutdown().await?;
    Ok(())
}

async fn report_caches(
    pool: &ShardPool<RoutedConstructor>,
    phase: &'static str,
) -> Result<(), Box<dyn std::error::Error>> {
    for index in 0..pool.shard_count() {
        #[allow(clippy::cast_possible_truncation)]
        let shard = ShardId::new(index as u32);
        let (entries, version, tables) = pool
            .run_on(shard, |ctx| async move {
                let snapshot = ctx.router().cell().load();
                (ctx.cache().len(), snapshot.version(), snapshot.table_count())
            })
            .await?;
        info!(
            shard = %shard,
            phase,
            cached = entries,
            routing_version = version,
            routed_tables = tables,
            "Shard state"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placement_covers_key_space() {
        let plan = placement(3, 1);
        let topology = Topology::new().with_table(TableId::new(0), TableConfig::Resolved(plan));
        let snapshot = tessera_routing::build_snapshot(
            &topology,
            &tessera_routing::RoutingSnapshot::empty(),
        );

        let regions = snapshot.table(TableId::new(0)).unwrap();
        assert_eq!(regions.len(), 3);
        for key in [0_u8, 84, 85, 170, 255] {
            assert!(regions.lookup(&[key]).is_some(), "key {key} unrouted");
        }
        assert_eq!(regions.lookup(&[0]), Some(MachineId::new(1)));
    }

    #[test]
    fn test_directory_skips_one_table_per_machine() {
        let state = directory(3, 3);
        let cards = state.project(TableId::new(1));
        assert_eq!(cards.len(), 3);
        assert!(cards[&PeerId::new(1)].card.is_none());
        assert!(cards[&PeerId::new(0)].card.is_some());
    }
}
