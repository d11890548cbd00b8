//! Row types for the inventory tables.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle position of a stock reservation.
///
/// RESERVED is the only non-terminal state reachable from creation;
/// COMMITTED is the interior state between basket commit and the terminal
/// outcome. CANCELED / EXPIRED / SETTLED are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Reserved,
    Committed,
    Canceled,
    Expired,
    Settled,
}

impl ReservationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Canceled | ReservationStatus::Expired | ReservationStatus::Settled
        )
    }

    /// Whether a reservation in `self` may move to `next`. Duplicate stream
    /// deliveries land here as refused transitions and are dropped.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        match self {
            ReservationStatus::Reserved => matches!(
                next,
                ReservationStatus::Committed
                    | ReservationStatus::Canceled
                    | ReservationStatus::Expired
                    | ReservationStatus::Settled
            ),
            ReservationStatus::Committed => matches!(
                next,
                ReservationStatus::Canceled
                    | ReservationStatus::Expired
                    | ReservationStatus::Settled
            ),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Product row carrying the window total for paginated listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductWithTotal {
    pub total_data: i64,
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductReservation {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub product_id: Uuid,
    pub status: ReservationStatus,
    pub quantity: i64,
    pub total_price: i64,
    pub reserved_at: DateTime<Utc>,
    pub committed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [
            ReservationStatus::Canceled,
            ReservationStatus::Expired,
            ReservationStatus::Settled,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                ReservationStatus::Reserved,
                ReservationStatus::Committed,
                ReservationStatus::Canceled,
                ReservationStatus::Expired,
                ReservationStatus::Settled,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn reserved_reaches_every_later_state() {
        let from = ReservationStatus::Reserved;
        assert!(from.can_transition_to(ReservationStatus::Committed));
        assert!(from.can_transition_to(ReservationStatus::Settled));
        assert!(from.can_transition_to(ReservationStatus::Canceled));
        assert!(from.can_transition_to(ReservationStatus::Expired));
        assert!(!from.can_transition_to(ReservationStatus::Reserved));
    }

    #[test]
    fn committed_cannot_regress() {
        let from = ReservationStatus::Committed;
        assert!(!from.can_transition_to(ReservationStatus::Reserved));
        assert!(!from.can_transition_to(ReservationStatus::Committed));
        assert!(from.can_transition_to(ReservationStatus::Settled));
    }
}
