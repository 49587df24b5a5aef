use std::{env, sync::Arc};

use clap::Parser;
use itertools::Itertools;
use log::LevelFilter;
use rand::{Rng, SeedableRng, rngs::StdRng};
use stopwatch::Stopwatch;

use pageframe_core::{
    configuration::Configuration,
    core::{
        bus::MessageBus,
        context::ExecutionContext,
        cursor::RecordCursor,
        error::ScanError,
        factory::{AsyncFilteredCursorFactory, RecordCursorFactory},
        filter::filter_fn,
        frame::{
            ColumnMetadata, ColumnType, MemorySymbolTable, RecordMetadata,
            memory::{ColumnBuilder, MemoryFrameSource},
        },
        record::Record,
        worker::WorkerPool,
    },
};

const VENUES: [&str; 4] = ["LSE", "NYSE", "XETR", "TSE"];

#[derive(Parser, Debug)]
#[command(name = "pageframe_core", version, about = "Runs a parallel filtered scan over a synthetic table")]
struct Args {
    /// Number of partitions to generate (default: 16)
    #[arg(long, value_name = "N", default_value_t = 16)]
    partitions: usize,

    /// Rows per partition (default: 100000)
    #[arg(long = "rows-per-partition", alias = "rows_per_partition", value_name = "N", default_value_t = 100_000)]
    rows_per_partition: u64,

    /// Maximum rows per page frame (default: 65536)
    #[arg(long = "page-frame-rows", alias = "page_frame_rows", value_name = "N")]
    page_frame_rows: Option<usize>,

    /// Number of reduce worker threads, 0 lets the consumer do all the work (default: 4)
    #[arg(long = "workers", value_name = "N")]
    workers: Option<usize>,

    /// Number of reduce queue shards (default: 4)
    #[arg(long = "shards", value_name = "N")]
    shards: Option<usize>,

    /// Slots per reduce queue (default: 64)
    #[arg(long = "queue-capacity", alias = "queue_capacity", value_name = "N")]
    queue_capacity: Option<usize>,

    /// Keep rows whose price is above this value (default: 990.0)
    #[arg(long = "min-price", alias = "min_price", default_value_t = 990.0)]
    min_price: f64,

    /// Scan partitions from last to first
    #[arg(long)]
    descending: bool,

    /// Seed for the generated data (default: 42)
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Logging level off, error, warn, info, debug, trace (default: info)
    #[arg(long = "log-level", alias = "log_level", value_name = "LEVEL")]
    log_level: Option<LevelFilter>,
}

fn main() -> Result<(), ScanError> {
    let args = Args::parse();

    unsafe { env::set_var("RUST_BACKTRACE", "full"); }
    env_logger::Builder::new()
        .filter_level(args.log_level.unwrap_or(LevelFilter::Info))
        .init();

    let configuration = Configuration {
        shard_count: args.shards,
        queue_capacity: args.queue_capacity,
        worker_count: args.workers,
        page_frame_max_rows: args.page_frame_rows,
        worker_idle_wait: None,
        steal_timeout: None,
    };

    let base = generate_table(&args, &configuration)?;
    log::info!(
        "generated table [partitions={}, rows={}]",
        base.partition_count(),
        base.row_count()
    );

    let bus = Arc::new(MessageBus::new(&configuration));
    let _pool = WorkerPool::start(Arc::clone(&bus), &configuration)?;
    let context = ExecutionContext::new(bus);

    let min_price = args.min_price;
    let filter = filter_fn(move |record: &dyn Record| Ok(record.get_double(1) > min_price));
    let mut factory = AsyncFilteredCursorFactory::new(Box::new(base), filter);

    let mut stopwatch = Stopwatch::start_new();

    let mut cursor = factory.get_cursor(&context)?;
    let mut matched = 0u64;
    let mut first_rows = Vec::with_capacity(5);

    while cursor.has_next()? {
        let record = cursor.record();
        if first_rows.len() < 5 {
            first_rows.push(format!(
                "{}@{}:{:.2}",
                record.get_sym(2).unwrap_or("?"),
                record.get_timestamp(0),
                record.get_double(1)
            ));
        }
        matched += 1;
    }

    let (claimed, released) = cursor.slot_counts();
    drop(cursor);
    stopwatch.stop();

    log::info!("first rows: {}", first_rows.iter().join(", "));
    log::info!(
        "matched {} rows in {:?} [workers={}, shards={}, claimed={}, released={}]",
        matched,
        stopwatch.elapsed(),
        configuration.worker_count(),
        configuration.shard_count(),
        claimed,
        released
    );

    factory.close();
    Ok(())
}

fn generate_table(args: &Args, configuration: &Configuration) -> Result<MemoryFrameSource, ScanError> {
    let metadata = RecordMetadata::new(vec![
        ColumnMetadata::new("ts", ColumnType::TIMESTAMP),
        ColumnMetadata::new("price", ColumnType::F64),
        ColumnMetadata::new("venue", ColumnType::SYMBOL),
    ]);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut venues = MemorySymbolTable::new();
    let mut partitions = Vec::with_capacity(args.partitions);

    for p in 0..args.partitions as u64 {
        let mut ts = ColumnBuilder::new(ColumnType::TIMESTAMP);
        let mut price = ColumnBuilder::new(ColumnType::F64);
        let mut venue = ColumnBuilder::new(ColumnType::SYMBOL);

        for r in 0..args.rows_per_partition {
            ts.push_long(((p * args.rows_per_partition + r) * 1_000_000) as i64);
            price.push_double(rng.random_range(0.0..1000.0));
            venue.push_symbol(&mut venues, VENUES[rng.random_range(0..VENUES.len())]);
        }

        partitions.push(vec![ts, price, venue]);
    }

    let mut source = MemoryFrameSource::new(metadata, configuration)
        .with_descending_order(args.descending)
        .with_symbol_table(2, venues);

    for columns in partitions {
        source.add_partition(columns)?;
    }

    Ok(source)
}
