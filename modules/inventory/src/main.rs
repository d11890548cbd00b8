use std::net::SocketAddr;

use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use inventory_rs::{config::Config, consumer, routes, rpc};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    tracing::info!("Starting inventory service...");

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
    let nats_client = async_nats::connect(&config.nats_url)
        .await
        .expect("Failed to connect to NATS");
    let jetstream = async_nats::jetstream::new(nats_client);

    consumer::start_transaction_consumers(jetstream, pool.clone())
        .await
        .expect("Failed to start transaction consumers");

    let app = routes::products::product_router(pool.clone())
        .merge(rpc::rpc_router(pool))
        .layer(
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    tracing::info!("Inventory service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
