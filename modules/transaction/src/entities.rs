//! Row types and status enums for the transaction tables.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Coarse, customer-visible basket outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerStatus {
    Pending,
    Success,
    Expired,
    Canceled,
    Failed,
    Refunding,
    Refunded,
}

/// Fine-grained saga position. The reconciler only acts on the three live
/// states; everything else is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InternalStatus {
    Pending,
    TokenReady,
    Expired,
    ExpiredCheckedInvalid,
    ExpiredCheckedValid,
    LateSettlement,
    Settled,
    CanceledBySystem,
    CanceledByUser,
    Refunded,
    Failed,
}

impl InternalStatus {
    /// The states the reconciler (webhook or scheduler) may still act on.
    /// A short-TTL-expired basket stays live so a late settlement can land.
    pub fn is_checkable(&self) -> bool {
        matches!(
            self,
            InternalStatus::Pending | InternalStatus::TokenReady | InternalStatus::Expired
        )
    }
}

/// Payment status as reported by the provider. Tolerant of unknown strings:
/// the provider's vocabulary grows without breaking the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Capture,
    Settlement,
    Pending,
    Deny,
    Cancel,
    Expire,
    Failure,
    Unknown(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "capture" => ProviderStatus::Capture,
            "settlement" => ProviderStatus::Settlement,
            "pending" => ProviderStatus::Pending,
            "deny" => ProviderStatus::Deny,
            "cancel" => ProviderStatus::Cancel,
            "expire" => ProviderStatus::Expire,
            "failure" => ProviderStatus::Failure,
            other => ProviderStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_settlementish(&self) -> bool {
        matches!(self, ProviderStatus::Capture | ProviderStatus::Settlement)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub transaction_status: CustomerStatus,
    pub internal_status: InternalStatus,
    pub external_status: Option<String>,
    pub external_settlement_at: Option<DateTime<Utc>>,
    pub external_callback_response: Option<serde_json::Value>,
    pub snap_token: Option<String>,
    pub checkout_at: DateTime<Utc>,
    pub payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Basket row carrying the window total for paginated listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionWithTotal {
    pub total_data: i64,
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub transaction_status: CustomerStatus,
    pub internal_status: InternalStatus,
    pub checkout_at: DateTime<Utc>,
    pub payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionDetail {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub price: i64,
    pub created_at: DateTime<Utc>,
}

/// Joined basket + line row for the detail listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TransactionDetailJoined {
    pub total_data: i64,
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub transaction_status: CustomerStatus,
    pub checkout_at: DateTime<Utc>,
    pub payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub detail_id: Uuid,
    pub detail_product_id: Uuid,
    pub detail_quantity: i64,
    pub detail_price: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_live_states_are_checkable() {
        assert!(InternalStatus::Pending.is_checkable());
        assert!(InternalStatus::TokenReady.is_checkable());
        assert!(InternalStatus::Expired.is_checkable());

        for terminal in [
            InternalStatus::ExpiredCheckedInvalid,
            InternalStatus::ExpiredCheckedValid,
            InternalStatus::LateSettlement,
            InternalStatus::Settled,
            InternalStatus::CanceledBySystem,
            InternalStatus::CanceledByUser,
            InternalStatus::Refunded,
            InternalStatus::Failed,
        ] {
            assert!(!terminal.is_checkable(), "{terminal:?} must be absorbing");
        }
    }

    #[test]
    fn provider_status_parsing() {
        assert_eq!(ProviderStatus::parse("settlement"), ProviderStatus::Settlement);
        assert_eq!(ProviderStatus::parse("capture"), ProviderStatus::Capture);
        assert_eq!(ProviderStatus::parse("deny"), ProviderStatus::Deny);
        assert!(ProviderStatus::parse("capture").is_settlementish());
        assert!(!ProviderStatus::parse("pending").is_settlementish());
        assert_eq!(
            ProviderStatus::parse("chargeback"),
            ProviderStatus::Unknown("chargeback".into())
        );
    }
}
