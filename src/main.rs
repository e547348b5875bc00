use std::num::NonZeroUsize;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ec_aggregate::aggregate::AggregateEngine;
use ec_aggregate::testkit::{boundary, Cluster, NoopDtx};
use ec_aggregate::types::PoolId;

fn main() {
    env_logger::init();
    let args = Cli::parse();
    match args.cmd {
        Commands::Aggregate { config } => aggregate(config.as_deref()),
        Commands::DemoBoundary => demo_boundary(),
    }
}

#[derive(Debug, Parser)]
#[command(name = "ec-aggregate")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one aggregation pass over a small in-memory demo cluster.
    Aggregate {
        /// EC class and credits configuration, in toml format.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run the six literal boundary scenarios of spec.md §8 and report
    /// pass/fail for each.
    DemoBoundary,
}

/// Seed a demo cluster with one full stripe, aggregate it once, and print
/// the resulting report — a local stand-in for exercising the engine
/// against a real container, cf. SPEC_FULL.md's CLI ambient-stack section.
fn aggregate(config_path: Option<&std::path::Path>) {
    if let Some(path) = config_path {
        ec_aggregate::config::init_config_toml(path).unwrap_or_else(|e| panic!("bad config: {e}"));
    } else {
        ec_aggregate::config::init_config(
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(2).unwrap(),
            NonZeroUsize::new(4).unwrap(),
            NonZeroUsize::new(4096).unwrap(),
        );
    }

    let k = NonZeroUsize::new(ec_aggregate::config::ec_k()).expect("ec_k must be nonzero");
    let p = NonZeroUsize::new(ec_aggregate::config::ec_p()).expect("ec_p must be nonzero");
    let l = NonZeroUsize::new(ec_aggregate::config::ec_l()).expect("ec_l must be nonzero");
    let record_size =
        NonZeroUsize::new(ec_aggregate::config::record_size()).expect("record_size must be nonzero");
    let class_attrs = ec_aggregate::types::EcClassAttrs { k, p, l, record_size };

    let cluster = Cluster::new(k.get() + p.get());
    let oid: ec_aggregate::types::Oid = 1;
    let dkey = b"demo-dkey".to_vec();
    let akey = b"demo-akey".to_vec();
    for i in 0..cluster.num_shards() {
        cluster.shard(i).set_class(oid, class_attrs);
    }

    let parity_shard_index = k.get();
    let parity_shard = cluster.shard(parity_shard_index);
    let cell_bytes = l.get() * record_size.get();
    for cell in 0..k.get() {
        let data = vec![(cell + 1) as u8; cell_bytes];
        parity_shard.seed_replica(
            oid,
            &dkey,
            &akey,
            ec_aggregate::recx::Recx::new((cell * l.get()) as u64, l.get() as u64),
            1,
            false,
            &data,
        );
    }

    let client = cluster.client();
    let transport = cluster.transport();
    let membership = cluster.membership();
    let dtx = NoopDtx;
    let engine = AggregateEngine::new(
        &*parity_shard,
        &client,
        &transport,
        &membership,
        &dtx,
        PoolId(1),
        parity_shard_index,
        ec_aggregate::config::credits_max(),
    );

    match engine.aggregate(cluster.container, (0, 1), || false, true) {
        Ok(report) => println!("{report:#?}"),
        Err(e) => eprintln!("aggregation run failed: {e}"),
    }
}

fn demo_boundary() {
    let mut any_failed = false;
    for result in boundary::run_all() {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!("[{status}] {}: {}", result.name, result.detail);
        any_failed |= !result.passed;
    }
    if any_failed {
        std::process::exit(1);
    }
}
