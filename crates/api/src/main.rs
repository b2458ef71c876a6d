//! Orchestrator process entry point.

use std::collections::BTreeSet;
use std::sync::Arc;

use api::{AppState, Config, LogFormat};
use messaging::{Consumer, ConsumerConfig, InProcessBus, Subscription};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{InstanceLocks, Orchestrator};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use workflow_store::{
    CatalogDefinition, InMemoryWorkflowStore, PostgresWorkflowStore, WorkflowStore,
    default_catalog,
};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Reads the catalog file, or falls back to the built-in catalog.
fn load_catalog(config: &Config) -> CatalogDefinition {
    let catalog = match &config.catalog_path {
        Some(path) => {
            let json = std::fs::read_to_string(path).expect("failed to read catalog file");
            CatalogDefinition::from_json(&json).expect("failed to parse catalog file")
        }
        None => default_catalog(),
    };

    let candidates = catalog.validate().expect("invalid step catalog");
    for candidate in candidates {
        tracing::info!(
            step = %candidate.step,
            payload_keys = ?candidate.payload_keys,
            "step merges several sources, colliding fields are overwritten in key order"
        );
    }

    catalog
}

/// Logs every message of a topic nothing else in this process consumes.
async fn drain(mut subscription: Subscription, mut shutdown: watch::Receiver<bool>, dead: bool) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            message = subscription.recv() => match message {
                Some(message) if dead => tracing::error!(
                    topic = %message.topic,
                    key = %message.key,
                    payload = %message.payload_str(),
                    "event dead-lettered"
                ),
                Some(message) => tracing::info!(
                    topic = %message.topic,
                    key = %message.key,
                    "command published"
                ),
                None => break,
            },
        }
    }
}

async fn run<S>(config: Config, store: S, catalog: CatalogDefinition, metrics_handle: PrometheusHandle)
where
    S: WorkflowStore + Clone + 'static,
{
    store
        .seed_catalog(&catalog)
        .await
        .expect("failed to seed step catalog");

    let bus = InProcessBus::new();
    let inbound = bus
        .subscribe(config.orchestra_topic.as_str())
        .expect("failed to subscribe inbound topic");
    let dead_letters = bus
        .subscribe(config.dead_letter_topic.as_str())
        .expect("failed to subscribe dead-letter topic");

    // Participating services run out of process; their command topics are
    // drained into the log so publishes succeed.
    let command_topics: BTreeSet<&str> = catalog.steps.iter().map(|s| s.topic.as_str()).collect();
    let mut commands = Vec::new();
    for topic in command_topics {
        match bus.subscribe(topic) {
            Ok(subscription) => commands.push(subscription),
            Err(e) => tracing::warn!(topic, error = %e, "command topic not drained"),
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let orchestrator = Arc::new(
        Orchestrator::new(store.clone(), bus.clone())
            .with_locks(InstanceLocks::new(config.lock_shards)),
    );
    let consumer = Consumer::new(
        orchestrator,
        bus.clone(),
        ConsumerConfig {
            max_deliveries: config.max_deliveries,
            dead_letter_topic: config.dead_letter_topic.clone(),
        },
    );
    let consumer_task = {
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { consumer.run(inbound, shutdown).await })
    };

    tokio::spawn(drain(dead_letters, shutdown_rx.clone(), true));
    for subscription in commands {
        tokio::spawn(drain(subscription, shutdown_rx.clone(), false));
    }

    let state = Arc::new(AppState::new(store, bus, config.orchestra_topic.clone()));
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, topic = %config.orchestra_topic, "starting orchestrator");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Let the consumer finish the message in hand.
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.await {
        tracing::error!(error = %e, "consumer task panicked");
    }

    tracing::info!("orchestrator shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Load the step catalog
    let catalog = load_catalog(&config);

    // 4. Pick the store and run
    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let store = PostgresWorkflowStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL workflow store");
            run(config, store, catalog, metrics_handle).await;
        }
        None => {
            tracing::info!("using in-memory workflow store");
            run(config, InMemoryWorkflowStore::new(), catalog, metrics_handle).await;
        }
    }
}
