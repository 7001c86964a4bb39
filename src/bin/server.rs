//! StashKV Server Binary
//!
//! Starts the TCP server for StashKV.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use stashkv::network::Server;
use stashkv::{Backend, Config, Engine, ItemAllocator, ItemStore, MemoryBackend, StashError};
use tracing_subscriber::{fmt, EnvFilter};

/// StashKV Server
#[derive(Parser, Debug)]
#[command(name = "stashkv-server")]
#[command(about = "Memcached-style item store over a persistent key-value engine")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./stashkv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:21201")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// Worker threads serving connections
    #[arg(short = 't', long, default_value = "4")]
    threads: usize,

    /// Size of pooled item buffers in bytes
    #[arg(short = 'b', long, default_value = "256")]
    item_buf_size: usize,

    /// MemTable size limit in MB before flush
    #[arg(short = 'M', long, default_value = "64")]
    memtable_mb: usize,

    /// Keep everything in memory instead of opening the data directory
    #[arg(long)]
    in_memory: bool,

    /// Verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "info,stashkv=debug",
        _ => "info,stashkv=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("StashKV Server v{}", stashkv::VERSION);
    tracing::info!("Listen address: {}", args.listen);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .worker_threads(args.threads)
        .item_buf_size(args.item_buf_size)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .verbose(args.verbose)
        .build();

    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let result = if args.in_memory {
        tracing::info!("Using in-memory backend");
        serve(config, MemoryBackend::new())
    } else {
        tracing::info!("Data directory: {}", args.data_dir);
        match Engine::open(config.clone()) {
            Ok(engine) => {
                let engine = Arc::new(engine);
                let served = serve(config, Arc::clone(&engine));
                let closed = close_engine(engine);
                served.and(closed)
            }
            Err(e) => {
                tracing::error!("Failed to open engine: {}", e);
                std::process::exit(1);
            }
        }
    };

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn serve<B: Backend + 'static>(config: Config, backend: B) -> stashkv::Result<()> {
    let allocator = Arc::new(ItemAllocator::from_config(&config));
    let store = Arc::new(ItemStore::new(allocator, backend));

    let server = Server::bind(config, store)?;

    // Ctrl-C or SIGTERM stops the acceptor; run() then closes clients and joins workers
    let shutdown = server.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received");
        shutdown.store(true, Ordering::SeqCst);
    })
    .map_err(|e| StashError::Config(format!("failed to install signal handler: {}", e)))?;

    server.run()
}

/// Flush the memtable and sync the WAL once every worker has let go of the engine
fn close_engine(engine: Arc<Engine>) -> stashkv::Result<()> {
    match Arc::try_unwrap(engine) {
        Ok(engine) => engine.close(),
        Err(engine) => {
            tracing::warn!("Engine still shared at shutdown; flushing without close");
            engine.flush()
        }
    }
}
