use std::net::SocketAddr;
use std::sync::Arc;

use event_bus::{EventBus, JetStreamBus};
use inventory_client::{InventoryClient, InventoryClientConfig};
use sqlx::postgres::PgPoolOptions;
use taskqueue::{TaskQueue, TaskWorker};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use transaction_rs::config::Config;
use transaction_rs::payment::{MidtransClient, PaymentAdapter};
use transaction_rs::tasks::{
    ExpireFinalTaskHandler, ExpireTaskHandler, ExpiryTasks, TASK_TRANSACTION_EXPIRE,
    TASK_TRANSACTION_EXPIRE_FINAL,
};
use transaction_rs::{consumer, routes, scheduler, SagaDeps};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting transaction service...");

    let config = Config::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .min_connections(config.db.min_conns)
        .max_connections(config.db.max_conns)
        .connect(&config.db.url())
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running migrations...");
    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Connecting to NATS at {}", config.nats_url);
    let (bus, jetstream) = JetStreamBus::connect(&config.nats_url)
        .await
        .expect("Failed to connect to NATS");
    let bus: Arc<dyn EventBus> = Arc::new(bus);

    // The lifecycle stream must exist before the first publish, whichever
    // service boots first.
    event_bus::jetstream::ensure_stream(
        &jetstream,
        platform_contracts::events::TRANSACTION_STREAM,
        &platform_contracts::events::TRANSACTION_SUBJECTS,
    )
    .await
    .expect("Failed to create transaction stream");

    tracing::info!("Connecting to Redis at {}", config.redis_url);
    let redis_client =
        redis::Client::open(config.redis_url.clone()).expect("Invalid Redis URL");
    let redis = redis_client
        .get_connection_manager()
        .await
        .expect("Failed to connect to Redis");

    let midtrans =
        MidtransClient::new(config.midtrans_server_key.clone(), config.environment)
            .expect("Failed to build Midtrans client");
    let payment = PaymentAdapter::new(midtrans, redis.clone());

    let inventory = InventoryClient::new(InventoryClientConfig::new(
        config.inventory_rpc_url.clone(),
    ))
    .expect("Failed to build inventory client");

    let task_queue = TaskQueue::new(redis.clone(), "transaction");
    let expiry_tasks = ExpiryTasks::new(
        task_queue.clone(),
        config.expiration_ttl,
        config.expiration_final_ttl,
    );

    let deps = SagaDeps {
        pool: pool.clone(),
        bus: bus.clone(),
        inventory,
        payment,
        tasks: expiry_tasks,
        redis,
    };

    // Delayed-task worker: the two expiry deadlines.
    TaskWorker::new(task_queue)
        .register(
            TASK_TRANSACTION_EXPIRE,
            Arc::new(ExpireTaskHandler { pool: pool.clone() }),
        )
        .register(
            TASK_TRANSACTION_EXPIRE_FINAL,
            Arc::new(ExpireFinalTaskHandler {
                pool: pool.clone(),
                bus: bus.clone(),
            }),
        )
        .start();

    // Webhook consumer over the durable stream.
    consumer::start_webhook_consumer(jetstream, deps.clone())
        .await
        .expect("Failed to start webhook consumer");

    // Periodic reconcile sweep.
    scheduler::start_scheduler(deps.clone(), config.check_scheduler_period);

    let app = routes::transactions::transaction_router(deps.clone())
        .merge(routes::webhook::webhook_router(deps))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("Transaction service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
