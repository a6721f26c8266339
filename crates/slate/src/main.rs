//! Slate: scheduled-post engine.
//!
//! Main binary with subcommands:
//! - `worker`: the background publishing daemon (queue poll, retries,
//!   cross-process notifications)
//! - `queue-len`: print the scheduling queue depth

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use uuid::Uuid;

use slate_notify::{Notifier, RedisBus};
use slate_scheduler::{MemoryQueue, PublishFn, RedisQueue, TimeQueue, Worker, WorkerConfig};
use slate_store::{Channel, MemoryStore, Post, RedisViewCache};

#[derive(Parser)]
#[command(name = "slate")]
#[command(about = "Scheduled post engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the background publishing worker
    Worker {
        /// Redis URL (queue, bus, and view cache)
        #[arg(long, env = "SLATE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        /// Queue poll interval in seconds
        #[arg(long, default_value = "10")]
        poll_interval: u64,

        /// Maximum posts claimed per poll
        #[arg(long, default_value = "100")]
        batch_limit: usize,

        /// Maximum publish attempts before a post is marked failed
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Pub/sub channel for cross-process notifications
        #[arg(long, env = "SLATE_BUS_CHANNEL", default_value = slate_notify::DEFAULT_BUS_CHANNEL)]
        bus_channel: String,

        /// Run against an in-memory queue and store. Required until a
        /// durable post store is wired: without one, ids claimed from the
        /// production queue could never be resolved to posts.
        #[arg(long)]
        demo_store: bool,
    },

    /// Print the number of posts waiting in the scheduling queue
    QueueLen {
        /// Redis URL
        #[arg(long, env = "SLATE_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
        redis_url: String,

        /// Sorted-set key of the scheduling queue
        #[arg(long, env = "SLATE_QUEUE_KEY", default_value = slate_scheduler::DEFAULT_QUEUE_KEY)]
        queue_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "slate=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Worker {
            redis_url,
            poll_interval,
            batch_limit,
            max_attempts,
            bus_channel,
            demo_store,
        } => {
            require_demo_store(demo_store)?;
            run_worker(
                &redis_url,
                WorkerConfig {
                    poll_interval: Duration::from_secs(poll_interval),
                    batch_limit,
                    max_attempts,
                },
                bus_channel,
            )
            .await
        }
        Commands::QueueLen {
            redis_url,
            queue_key,
        } => {
            let conn = connect(&redis_url).await?;
            let queue = RedisQueue::with_key(conn, queue_key);
            let len = queue.len().await.map_err(|e| miette::miette!("{}", e))?;
            println!("{}", len);
            Ok(())
        }
    }
}

async fn connect(redis_url: &str) -> Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(redis_url).map_err(|e| miette::miette!("{}", e))?;
    client
        .get_connection_manager()
        .await
        .map_err(|e| miette::miette!("{}", e))
}

/// The standalone daemon has no durable post store yet; claimed queue
/// entries are destroyed on pop, so resolving them against an empty store
/// would silently discard them. Refuse to start unless the caller opted
/// into the self-contained in-memory stack.
fn require_demo_store(demo_store: bool) -> Result<()> {
    if demo_store {
        Ok(())
    } else {
        Err(miette::miette!(
            "no durable post store is wired; pass --demo-store to run \
             against an in-memory queue and store"
        ))
    }
}

async fn run_worker(redis_url: &str, config: WorkerConfig, bus_channel: String) -> Result<()> {
    let conn = connect(redis_url).await?;
    let cache = Arc::new(RedisViewCache::new(conn));

    let bus = RedisBus::connect_channel(redis_url, bus_channel)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let notifier = Notifier::with_bus(Arc::new(bus));

    // In-memory queue and store, seeded with a post due immediately so the
    // first poll exercises the publish path end to end.
    let queue = Arc::new(MemoryQueue::new());
    let store = Arc::new(MemoryStore::new());
    let demo = Post::scheduled(
        Uuid::new_v4(),
        "hello from slate".to_string(),
        Channel::Twitter,
        chrono::Utc::now(),
    );
    queue
        .enqueue(demo.id, demo.scheduled_at)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    store.insert(demo).await;

    // Stand-in publish operation; real channel API calls plug in here.
    let publish: PublishFn = Box::new(|post| {
        Box::pin(async move {
            info!(post_id = %post.id, channel = ?post.channel, "publishing post");
            Ok(())
        })
    });

    let worker = Worker::new(queue, store, cache, notifier.clone(), config, publish);

    // Handle shutdown signals
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let relay = tokio::spawn(notifier.run_relay(shutdown_rx.clone()));

    worker.run(shutdown_rx).await;
    relay.await.map_err(|e| miette::miette!("{}", e))?;

    Ok(())
}
