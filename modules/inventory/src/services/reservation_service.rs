//! Stock reservation protocol.
//!
//! Two write paths touch product quantity, and both run inside a single DB
//! transaction holding `FOR UPDATE` on the product rows sorted by id:
//!
//! - [`check_and_reserve`], the synchronous RPC that decrements stock and
//!   creates RESERVED rows, atomically across the whole basket;
//! - [`apply_transaction_event`], the consumer path that transitions
//!   reservations on lifecycle events and restores stock on cancel/expire.
//!
//! The id-sorted lock order is shared by both paths, so two baskets fighting
//! over an overlapping product set serialize instead of deadlocking.

use std::collections::HashMap;

use platform_contracts::events::TransactionEventStatus;
use platform_contracts::{AppError, AppResult, ErrorKind};
use sqlx::PgPool;
use uuid::Uuid;

use crate::entities::{Product, ReservationStatus};
use crate::models::{CheckAndReserveRequest, CheckProductQuantity};
use crate::repos::{product_repo, reservation_repo};
use crate::repos::product_repo::LockMode;

pub const MSG_PRODUCT_NOT_FOUND: &str = "Product not found for the given id";
pub const MSG_OUT_OF_STOCK: &str = "Product is out of stock, please check again";
pub const MSG_MORE_THAN_AVAILABLE: &str =
    "Requested product quantity is more than available stock";
pub const MSG_PRICE_CHANGED: &str = "Product price has been changed, please check again";
pub const MSG_RESERVATION_NOT_FOUND: &str =
    "No reservations found for the given transaction id";
pub const MSG_PRODUCT_GONE: &str = "Product not found or already deleted";

/// Deduplicate request lines by product id. A basket listing the same
/// product twice collapses to one line (last occurrence wins), which in turn
/// means one lock and one decrement per product. Returns the deduplicated
/// ids in input order; locking sorts separately.
fn dedup_lines(
    lines: &[CheckProductQuantity],
) -> (Vec<Uuid>, HashMap<Uuid, CheckProductQuantity>) {
    let mut by_id: HashMap<Uuid, CheckProductQuantity> = HashMap::with_capacity(lines.len());
    let mut input_order: Vec<Uuid> = Vec::with_capacity(lines.len());
    for line in lines {
        if by_id.insert(line.product_id, line.clone()).is_none() {
            input_order.push(line.product_id);
        }
    }
    (input_order, by_id)
}

/// Atomically reserve every line of the basket or nothing.
pub async fn check_and_reserve(
    pool: &PgPool,
    request: &CheckAndReserveRequest,
) -> AppResult<Vec<Product>> {
    request.validate()?;

    let (input_order, by_id) = dedup_lines(&request.products);

    // Lock in id order regardless of request order; see module docs.
    let mut sorted_ids = input_order.clone();
    sorted_ids.sort();

    tracing::info!(
        transaction_id = %request.transaction_id,
        products = sorted_ids.len(),
        "checking and reserving products"
    );

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin reservation transaction", e))?;

    let products = product_repo::find_many_by_ids(&mut *tx, &sorted_ids, LockMode::Update)
        .await
        .map_err(|e| AppError::internal("failed to lock products", e))?;

    if products.len() != sorted_ids.len() {
        return Err(AppError::invalid_argument(MSG_PRODUCT_NOT_FOUND));
    }

    let product_by_id: HashMap<Uuid, &Product> =
        products.iter().map(|p| (p.id, p)).collect();

    // Validate and decrement following the request's own order, so the
    // first offending line is the one reported.
    for product_id in &input_order {
        let line = &by_id[product_id];
        let product = product_by_id[product_id];

        if product.quantity == 0 {
            return Err(AppError::invalid_argument(MSG_OUT_OF_STOCK));
        }
        if line.quantity > product.quantity {
            return Err(AppError::invalid_argument(MSG_MORE_THAN_AVAILABLE));
        }
        if line.price != product.price {
            return Err(AppError::invalid_argument(MSG_PRICE_CHANGED));
        }

        let affected = product_repo::reduce_quantity(&mut *tx, product.id, line.quantity)
            .await
            .map_err(|e| AppError::internal("failed to reduce product quantity", e))?;
        if affected != 1 {
            return Err(AppError::new(ErrorKind::Internal, MSG_PRODUCT_GONE));
        }

        reservation_repo::insert(
            &mut *tx,
            request.transaction_id,
            product.id,
            line.quantity,
            line.quantity * product.price,
        )
        .await
        .map_err(|e| AppError::internal("failed to insert reservation", e))?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit reservation transaction", e))?;

    tracing::info!(
        transaction_id = %request.transaction_id,
        "products reserved"
    );

    Ok(products)
}

/// Translate a stream event into the reservation transition it demands.
fn target_status(event: TransactionEventStatus) -> ReservationStatus {
    match event {
        TransactionEventStatus::Committed => ReservationStatus::Committed,
        TransactionEventStatus::Settled => ReservationStatus::Settled,
        TransactionEventStatus::Canceled => ReservationStatus::Canceled,
        TransactionEventStatus::Expired => ReservationStatus::Expired,
    }
}

/// Whether the transition returns held stock to the shelf.
fn restores_stock(status: ReservationStatus) -> bool {
    matches!(
        status,
        ReservationStatus::Canceled | ReservationStatus::Expired
    )
}

/// Apply one basket lifecycle event to its reservations.
///
/// Monotonic: a reservation already at or past the target state is left
/// untouched, so at-least-once delivery and replays cannot double-restore
/// stock. Zero matching reservations is INVALID_ARGUMENT; the consumer acks
/// it, because redelivery cannot conjure the rows.
pub async fn apply_transaction_event(
    pool: &PgPool,
    transaction_id: Uuid,
    event: TransactionEventStatus,
) -> AppResult<()> {
    let target = target_status(event);

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::internal("failed to begin event transaction", e))?;

    let reservations =
        reservation_repo::find_many_by_transaction_id(&mut *tx, transaction_id, true)
            .await
            .map_err(|e| AppError::internal("failed to lock reservations", e))?;

    if reservations.is_empty() {
        return Err(AppError::invalid_argument(MSG_RESERVATION_NOT_FOUND));
    }

    let transitioning: Vec<_> = reservations
        .iter()
        .filter(|r| r.status.can_transition_to(target))
        .collect();

    if transitioning.is_empty() {
        // Duplicate or out-of-order delivery; the state machine already
        // absorbed this event.
        tracing::info!(
            transaction_id = %transaction_id,
            ?target,
            "no reservation accepts the transition, skipping"
        );
        tx.commit()
            .await
            .map_err(|e| AppError::internal("failed to commit no-op event", e))?;
        return Ok(());
    }

    // Quantity is only mutated under FOR UPDATE; commit/settle can hold the
    // weaker shared lock since they leave quantity alone.
    let product_ids: Vec<Uuid> = {
        let mut ids: Vec<Uuid> = transitioning.iter().map(|r| r.product_id).collect();
        ids.sort();
        ids
    };
    let lock = if restores_stock(target) {
        LockMode::Update
    } else {
        LockMode::Share
    };
    let products = product_repo::find_many_by_ids(&mut *tx, &product_ids, lock)
        .await
        .map_err(|e| AppError::internal("failed to lock products for event", e))?;

    if products.len() != product_ids.len() {
        return Err(AppError::invalid_argument(MSG_PRODUCT_GONE));
    }

    for reservation in &transitioning {
        if restores_stock(target) {
            let affected = product_repo::restore_quantity(
                &mut *tx,
                reservation.product_id,
                reservation.quantity,
            )
            .await
            .map_err(|e| AppError::internal("failed to restore product quantity", e))?;
            if affected != 1 {
                return Err(AppError::new(ErrorKind::ResourceNotFound, MSG_PRODUCT_GONE));
            }
        }

        reservation_repo::update_status(
            &mut *tx,
            transaction_id,
            reservation.product_id,
            target,
        )
        .await
        .map_err(|e| AppError::internal("failed to update reservation status", e))?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::internal("failed to commit event transaction", e))?;

    tracing::info!(
        transaction_id = %transaction_id,
        ?target,
        count = transitioning.len(),
        "reservations transitioned"
    );

    Ok(())
}

/// Ownership-checked product lookup for the owner transaction view.
pub async fn owner_get_product(
    pool: &PgPool,
    user_id: Uuid,
    product_id: Uuid,
) -> AppResult<Product> {
    product_repo::find_by_id_and_user_id(pool, product_id, user_id)
        .await
        .map_err(|e| AppError::internal("failed to fetch product", e))?
        .ok_or_else(|| AppError::not_found(MSG_PRODUCT_NOT_FOUND))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: Uuid, quantity: i64, price: i64) -> CheckProductQuantity {
        CheckProductQuantity {
            product_id,
            quantity,
            price,
        }
    }

    #[test]
    fn dedup_collapses_repeated_products_last_wins() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let (input_order, by_id) = dedup_lines(&[
            line(id, 1, 100),
            line(other, 2, 50),
            line(id, 3, 100),
        ]);

        assert_eq!(input_order, vec![id, other], "first occurrence keeps its place");
        assert_eq!(by_id[&id].quantity, 3, "last occurrence wins the content");
        assert_eq!(by_id[&other].quantity, 2);
    }

    #[test]
    fn event_to_reservation_status() {
        assert_eq!(
            target_status(TransactionEventStatus::Committed),
            ReservationStatus::Committed
        );
        assert_eq!(
            target_status(TransactionEventStatus::Settled),
            ReservationStatus::Settled
        );
        assert_eq!(
            target_status(TransactionEventStatus::Canceled),
            ReservationStatus::Canceled
        );
        assert_eq!(
            target_status(TransactionEventStatus::Expired),
            ReservationStatus::Expired
        );
    }

    #[test]
    fn only_cancel_and_expire_restore_stock() {
        assert!(restores_stock(ReservationStatus::Canceled));
        assert!(restores_stock(ReservationStatus::Expired));
        assert!(!restores_stock(ReservationStatus::Committed));
        assert!(!restores_stock(ReservationStatus::Settled));
    }
}
