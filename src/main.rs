use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use windowgate::clock::{Clock, SystemClock};
use windowgate::config::{LoggingConfig, StoreBackend, WindowgateConfig};
use windowgate::ratelimit::{Decision, RateLimiterBackend, SlidingWindowLimiter, WindowConfig};
use windowgate::store::MemoryWindowStore;

/// Query and drive sliding window rate limits.
#[derive(Debug, Parser)]
#[command(name = "windowgate", version, about)]
struct Cli {
    /// Configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Policy to apply; defaults to the configured default policy
    #[arg(short, long, global = true)]
    policy: Option<String>,

    /// Use an in-process store instead of the configured backend
    #[arg(long, global = true)]
    memory: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the standing of an identifier without recording a request
    Check { identifier: String },
    /// Record `cost` requests for an identifier if they fit
    Consume {
        identifier: String,
        #[arg(long, default_value_t = 1)]
        cost: u32,
    },
    /// Forget all requests recorded for an identifier
    Reset { identifier: String },
    /// Fire concurrent single-unit consumes and count admissions
    Burst {
        identifier: String,
        #[arg(long, default_value_t = 100)]
        count: usize,
        #[arg(long, default_value_t = 16)]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = WindowgateConfig::load(cli.config.as_deref())?;
    init_tracing(&config.logging, cli.json);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting windowgate");
    match &cli.config {
        Some(path) => info!(path = %path.display(), "Loaded configuration file"),
        None => info!("No configuration file given, using defaults and environment"),
    }

    let limiter = build_limiter(&config, cli.policy.as_deref(), cli.memory).await?;

    match cli.command {
        Command::Check { identifier } => {
            let decision = limiter.check(&identifier).await?;
            print_decision(&identifier, &decision);
        }
        Command::Consume { identifier, cost } => {
            let decision = limiter.consume(&identifier, cost).await?;
            print_decision(&identifier, &decision);
        }
        Command::Reset { identifier } => {
            limiter.reset(&identifier).await?;
            println!("{}", json!({ "identifier": identifier, "reset": true }));
        }
        Command::Burst {
            identifier,
            count,
            concurrency,
        } => run_burst(limiter, identifier, count, concurrency).await,
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Decisions go to stdout; keep logs on stderr.
    if logging.json || force_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn build_limiter(
    config: &WindowgateConfig,
    policy: Option<&str>,
    force_memory: bool,
) -> anyhow::Result<Arc<dyn RateLimiterBackend>> {
    let window = WindowConfig::try_from(config.policy(policy)?.clone())?;
    let backend = if force_memory {
        StoreBackend::Memory
    } else {
        config.store.backend
    };

    info!(
        backend = ?backend,
        window_ms = window.window_ms(),
        max = window.max(),
        mode = ?window.mode(),
        "Limiter configured"
    );

    match backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryWindowStore::new());
            Ok(Arc::new(SlidingWindowLimiter::new(store, window)?))
        }
        #[cfg(feature = "redis")]
        StoreBackend::Redis => {
            let store = windowgate::store::RedisWindowStore::connect(&config.store).await?;
            Ok(Arc::new(SlidingWindowLimiter::new(Arc::new(store), window)?))
        }
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => {
            anyhow::bail!("the redis backend requires building with the `redis` feature")
        }
    }
}

fn print_decision(identifier: &str, decision: &Decision) {
    let now = SystemClock.now_millis();
    let headers: serde_json::Map<String, serde_json::Value> = decision
        .headers(now)
        .into_iter()
        .map(|(name, value)| (name.to_string(), json!(value)))
        .collect();
    let reset_at = i64::try_from(decision.reset_at)
        .ok()
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339());

    println!(
        "{}",
        json!({
            "identifier": identifier,
            "decision": decision,
            "reset_at_utc": reset_at,
            "headers": headers,
        })
    );
}

async fn run_burst(
    limiter: Arc<dyn RateLimiterBackend>,
    identifier: String,
    count: usize,
    concurrency: usize,
) {
    let results: Vec<_> = stream::iter(0..count)
        .map(|_| {
            let limiter = limiter.clone();
            let identifier = identifier.clone();
            async move { limiter.consume(&identifier, 1).await }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut admitted = 0usize;
    let mut rejected = 0usize;
    let mut failed = 0usize;
    for result in results {
        match result {
            Ok(d) if d.allowed => admitted += 1,
            Ok(_) => rejected += 1,
            Err(e) => {
                warn!(error = %e, "Consume failed during burst");
                failed += 1;
            }
        }
    }

    let max = limiter.window().max();
    println!(
        "{}",
        json!({
            "identifier": identifier,
            "requested": count,
            "admitted": admitted,
            "rejected": rejected,
            "failed": failed,
            "max": max,
            "overshoot": admitted.saturating_sub(max as usize),
        })
    );
}
