/// Integration tests for the saga's database-facing paths: reconciliation
/// under a row lock, the two expiry tiers, and the events they emit.
///
/// The event bus is the in-memory implementation so the tests can observe
/// exactly which lifecycle events each transition publishes.
use std::sync::Arc;

use event_bus::{EventBus, InMemoryBus};
use futures::StreamExt;
use platform_contracts::events::TransactionEvent;
use platform_contracts::ErrorKind;
use serial_test::serial;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use transaction_rs::entities::{CustomerStatus, InternalStatus};
use transaction_rs::models::CheckAndUpdateTransactionRequest;
use transaction_rs::repos::transaction_repo;
use transaction_rs::services::{cancelation_service, reconcile};

const SERVER_KEY: &str = "test-server-key";

async fn setup_test_db() -> sqlx::PgPool {
    dotenvy::dotenv().ok();

    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database");

    sqlx::migrate!("./db/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

async fn cleanup_test_data(pool: &sqlx::PgPool) {
    sqlx::query("DELETE FROM transaction_details")
        .execute(pool)
        .await
        .expect("Failed to clean details");
    sqlx::query("DELETE FROM transactions")
        .execute(pool)
        .await
        .expect("Failed to clean transactions");
}

async fn seed_basket(pool: &sqlx::PgPool, total: i64) -> Uuid {
    let id = Uuid::new_v4();
    let mut conn = pool.acquire().await.unwrap();
    transaction_repo::insert(&mut *conn, id, Uuid::new_v4(), total)
        .await
        .expect("Failed to seed basket");
    id
}

async fn make_token_ready(pool: &sqlx::PgPool, id: Uuid) {
    let mut conn = pool.acquire().await.unwrap();
    let affected = transaction_repo::update_token_if_pending(&mut *conn, id, "snap-token-123")
        .await
        .unwrap();
    assert_eq!(affected, 1);
}

async fn load(pool: &sqlx::PgPool, id: Uuid) -> transaction_rs::entities::Transaction {
    let mut conn = pool.acquire().await.unwrap();
    transaction_repo::find_by_id(&mut *conn, id, false)
        .await
        .unwrap()
        .expect("basket must exist")
}

/// A provider notification whose signature verifies against SERVER_KEY.
fn signed_request(
    order_id: Uuid,
    provider_status: &str,
    settlement_time: Option<&str>,
) -> CheckAndUpdateTransactionRequest {
    let status_code = "200";
    let gross_amount = "450.00";
    let signature_key = reconcile::compute_signature(
        &order_id.to_string(),
        status_code,
        gross_amount,
        SERVER_KEY,
    );
    let body = serde_json::to_vec(&serde_json::json!({
        "order_id": order_id,
        "transaction_status": provider_status,
        "status_code": status_code,
        "gross_amount": gross_amount,
        "settlement_time": settlement_time,
        "signature_key": signature_key,
    }))
    .unwrap();

    CheckAndUpdateTransactionRequest {
        provider_status: provider_status.to_string(),
        status_code: status_code.to_string(),
        signature_key,
        settlement_time: settlement_time.map(str::to_string),
        order_id,
        gross_amount: gross_amount.to_string(),
        body,
    }
}

/// Provider wall clock (UTC+7) representing roughly "now"; comfortably
/// inside any grace window measured from a row updated moments ago.
fn provider_now() -> String {
    (chrono::Utc::now() + chrono::Duration::hours(7))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[tokio::test]
#[serial]
async fn settlement_webhook_settles_live_basket_and_emits_event() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let mut settled_events = bus.subscribe("transaction.settled").await.unwrap();

    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;

    let request = signed_request(basket, "settlement", Some(&provider_now()));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .expect("settlement must reconcile");

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::Settled);
    assert_eq!(row.transaction_status, CustomerStatus::Success);
    assert!(row.snap_token.is_none(), "token must be cleared on settlement");
    assert!(row.payment_at.is_some());
    assert!(row.external_settlement_at.is_some());
    assert_eq!(row.external_status.as_deref(), Some("settlement"));
    assert!(row.external_callback_response.is_some(), "raw callback stored");

    let msg = tokio::time::timeout(std::time::Duration::from_secs(1), settled_events.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let event: TransactionEvent = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(event.transaction_id, basket);
}

#[tokio::test]
#[serial]
async fn forged_signature_is_forbidden_and_mutates_nothing() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let basket = seed_basket(&pool, 450).await;

    let mut request = signed_request(basket, "settlement", Some(&provider_now()));
    request.signature_key = format!("{}x", request.signature_key);

    let err = reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .expect_err("forged signature must be rejected");
    assert_eq!(err.kind, ErrorKind::Forbidden);

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::Pending);
    assert!(row.external_status.is_none(), "nothing may be persisted");
}

#[tokio::test]
#[serial]
async fn unknown_basket_is_resource_not_found() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let request = signed_request(Uuid::new_v4(), "settlement", Some(&provider_now()));

    let err = reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .expect_err("unknown basket must be rejected");
    assert_eq!(err.kind, ErrorKind::ResourceNotFound);
}

#[tokio::test]
#[serial]
async fn short_expiry_then_grace_settlement_is_honoured() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;

    // Short-TTL deadline fires: tentative expiry, token cleared, no event.
    cancelation_service::expire_pending_transaction(&pool, basket)
        .await
        .unwrap();
    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::Expired);
    assert_eq!(row.transaction_status, CustomerStatus::Expired);
    assert!(row.snap_token.is_none());

    // Provider reports a settlement from moments ago, inside the grace
    // window measured against the expiry's updated_at.
    let request = signed_request(basket, "settlement", Some(&provider_now()));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .unwrap();

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::ExpiredCheckedValid);
    assert_eq!(row.transaction_status, CustomerStatus::Success);
    assert!(row.payment_at.is_some());
}

#[tokio::test]
#[serial]
async fn short_expiry_then_stale_settlement_is_held_as_late() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;

    cancelation_service::expire_pending_transaction(&pool, basket)
        .await
        .unwrap();

    // Settlement time far past the grace window.
    let stale = (chrono::Utc::now() + chrono::Duration::hours(7) + chrono::Duration::minutes(20))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    let request = signed_request(basket, "settlement", Some(&stale));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .unwrap();

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::LateSettlement);
    assert_eq!(
        row.transaction_status,
        CustomerStatus::Expired,
        "held money does not make the basket a success"
    );
    assert!(row.external_settlement_at.is_some(), "held money is recorded");
}

#[tokio::test]
#[serial]
async fn final_expiry_emits_only_when_it_transitions() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let mut expired_events = bus.subscribe("transaction.expired").await.unwrap();

    // Basket still tentatively expired: final expiry transitions and emits.
    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;
    cancelation_service::expire_pending_transaction(&pool, basket)
        .await
        .unwrap();
    cancelation_service::expire_final_transaction(&pool, &bus, basket)
        .await
        .unwrap();

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::ExpiredCheckedInvalid);

    let msg = tokio::time::timeout(std::time::Duration::from_secs(1), expired_events.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let event: TransactionEvent = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(event.transaction_id, basket);

    // Already-settled basket: final expiry is a silent no-op.
    let settled = seed_basket(&pool, 450).await;
    make_token_ready(&pool, settled).await;
    let request = signed_request(settled, "settlement", Some(&provider_now()));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .unwrap();

    cancelation_service::expire_final_transaction(&pool, &bus, settled)
        .await
        .unwrap();

    let row = load(&pool, settled).await;
    assert_eq!(
        row.internal_status,
        InternalStatus::Settled,
        "final expiry must not touch a settled basket"
    );

    let extra =
        tokio::time::timeout(std::time::Duration::from_millis(200), expired_events.next()).await;
    assert!(extra.is_err(), "no expired event for the settled basket");
}

#[tokio::test]
#[serial]
async fn reconciler_skips_basket_the_webhook_already_settled() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;

    // Webhook wins the race.
    let webhook = signed_request(basket, "settlement", Some(&provider_now()));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &webhook)
        .await
        .unwrap();
    let settled_row = load(&pool, basket).await;

    // Scheduler observes the same provider state afterwards: absorbed.
    let scheduler = signed_request(basket, "settlement", Some(&provider_now()));
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &scheduler)
        .await
        .unwrap();

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::Settled);
    assert_eq!(
        row.updated_at, settled_row.updated_at,
        "absorbed notification must not touch the row"
    );
}

#[tokio::test]
#[serial]
async fn provider_cancel_cancels_by_system_and_emits_canceled() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::new());
    let mut canceled_events = bus.subscribe("transaction.canceled").await.unwrap();

    let basket = seed_basket(&pool, 450).await;
    make_token_ready(&pool, basket).await;

    let request = signed_request(basket, "cancel", None);
    reconcile::check_and_update_transaction(&pool, &bus, SERVER_KEY, &request)
        .await
        .unwrap();

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::CanceledBySystem);
    assert_eq!(row.transaction_status, CustomerStatus::Canceled);
    assert!(row.snap_token.is_none());

    let msg = tokio::time::timeout(std::time::Duration::from_secs(1), canceled_events.next())
        .await
        .expect("timeout")
        .expect("stream ended");
    let event: TransactionEvent = serde_json::from_slice(&msg.payload).unwrap();
    assert_eq!(event.transaction_id, basket);
}

#[tokio::test]
#[serial]
async fn token_cannot_resurrect_an_expired_basket() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let basket = seed_basket(&pool, 450).await;
    cancelation_service::expire_pending_transaction(&pool, basket)
        .await
        .unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let affected = transaction_repo::update_token_if_pending(&mut *conn, basket, "late-token")
        .await
        .unwrap();
    assert_eq!(affected, 0, "late token must not reopen the basket");

    let row = load(&pool, basket).await;
    assert_eq!(row.internal_status, InternalStatus::Expired);
    assert!(row.snap_token.is_none());
}
