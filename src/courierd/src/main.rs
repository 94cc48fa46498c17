//! Courier — multi-tenant message routing, retry, and rate-limiting engine.
//!
//! Main entry point that wires the stores, limiters, providers, and the
//! queue processor, then polls until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use courier_controls::{FrequencyLimiter, ProviderRateLimiter, SuppressionList};
use courier_core::config::AppConfig;
use courier_core::message::{ChannelType, Message};
use courier_core::routing::{ChannelRoutingConfig, RetryStrategy};
use courier_engine::{DeliveryExecutor, QueueProcessor};
use courier_providers::{MockProvider, ProviderRegistry};
use courier_routing::ChannelRouter;
use courier_store::{AttemptLog, MessageStore, RoutingTable};

#[derive(Parser, Debug)]
#[command(name = "courierd")]
#[command(about = "Message routing, retry, and rate-limiting engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "COURIER__NODE_ID")]
    node_id: Option<String>,

    /// Poll interval in seconds (overrides config)
    #[arg(long, env = "COURIER__QUEUE__POLL_INTERVAL_SECS")]
    poll_interval: Option<u64>,

    /// Maximum concurrent delivery tasks (overrides config)
    #[arg(long, env = "COURIER__QUEUE__MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Seed demo routing configs and messages on startup
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courierd=info,courier_engine=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Courier starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(poll_interval) = cli.poll_interval {
        config.queue.poll_interval_secs = poll_interval;
    }
    if let Some(max_concurrency) = cli.max_concurrency {
        config.queue.max_concurrency = max_concurrency;
    }

    info!(
        node_id = %config.node_id,
        poll_interval_secs = config.queue.poll_interval_secs,
        batch_size = config.queue.batch_size,
        max_concurrency = config.queue.max_concurrency,
        "Configuration loaded"
    );

    // Start metrics exporter
    let metrics_addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
    {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Stores
    let store = Arc::new(MessageStore::new());
    let attempts = Arc::new(AttemptLog::new());
    let routing_table = Arc::new(RoutingTable::new());

    // Providers, resolved once at startup
    let registry = Arc::new(
        ProviderRegistry::new()
            .with(Arc::new(MockProvider::sms("mock-sms")))
            .with(Arc::new(MockProvider::sms("mock-sms-backup")))
            .with(Arc::new(MockProvider::mms("mock-mms")))
            .with(Arc::new(MockProvider::email("mock-email"))),
    );

    // Delivery controls
    let frequency = Arc::new(FrequencyLimiter::new(config.frequency.clone()));
    let provider_limits = Arc::new(ProviderRateLimiter::new());
    let suppression = Arc::new(SuppressionList::new());

    // Router and executor
    let router = Arc::new(ChannelRouter::new(
        routing_table.clone(),
        registry,
        provider_limits.clone(),
    ));
    let executor = Arc::new(DeliveryExecutor::new(
        store.clone(),
        attempts,
        router,
        frequency,
        provider_limits,
        suppression,
    ));

    if cli.seed_demo {
        seed_demo_data(&routing_table, &store);
    }

    let processor = QueueProcessor::new(executor, store, config.queue.clone());

    // Shutdown on ctrl-c
    let shutdown = CancellationToken::new();
    let shutdown_handle = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown_handle.cancel();
        }
    });

    info!("Courier is ready, entering poll loop");
    processor.run(shutdown).await;

    Ok(())
}

/// Seed demo routing configs and a few queued messages for development.
fn seed_demo_data(routing_table: &RoutingTable, store: &MessageStore) {
    info!("Seeding demo routing configs and messages");

    routing_table.upsert(
        ChannelRoutingConfig::new(ChannelType::Sms, "mock-sms")
            .with_fallback("mock-sms-backup")
            .with_retry(RetryStrategy::Exponential, 60, 3600),
    );
    routing_table.upsert(ChannelRoutingConfig::new(ChannelType::Mms, "mock-mms"));
    routing_table.upsert(
        ChannelRoutingConfig::new(ChannelType::Email, "mock-email").with_retry(
            RetryStrategy::Linear,
            120,
            3600,
        ),
    );

    let campaign_id = Uuid::new_v4();
    store.insert(
        Message::queued(
            campaign_id,
            Uuid::new_v4(),
            "demo-tenant",
            ChannelType::Sms,
            "+15551230001",
        )
        .with_body("Welcome to Courier!"),
    );
    store.insert(
        Message::queued(
            campaign_id,
            Uuid::new_v4(),
            "demo-tenant",
            ChannelType::Email,
            "demo@example.com",
        )
        .with_subject("Welcome")
        .with_body("Welcome to Courier!"),
    );

    info!("Seeded 3 routing configs and 2 messages");
}
