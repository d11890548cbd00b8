//! Request/response DTOs for the transaction HTTP surface.

use chrono::{DateTime, Utc};
use platform_contracts::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{CustomerStatus, Transaction, TransactionWithTotal};

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionProduct {
    pub product_id: Uuid,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransactionRequest {
    pub products: Vec<TransactionProduct>,
}

impl CreateTransactionRequest {
    pub fn validate(&self) -> AppResult<()> {
        if self.products.is_empty() {
            return Err(AppError::invalid_argument("products must not be empty"));
        }
        for line in &self.products {
            if line.quantity <= 0 {
                return Err(AppError::invalid_argument("quantity must be positive"));
            }
            if line.price <= 0 {
                return Err(AppError::invalid_argument("price must be positive"));
            }
        }
        Ok(())
    }

    pub fn total_price(&self) -> i64 {
        self.products
            .iter()
            .map(|line| line.price * line.quantity)
            .sum()
    }
}

#[derive(Debug, Serialize)]
pub struct CreateTransactionResponse {
    pub transaction_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snap_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OwnerListQuery {
    pub product_id: Uuid,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_price: i64,
    pub transaction_status: CustomerStatus,
    pub checkout_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_details: Option<Vec<TransactionDetailResponse>>,
}

#[derive(Debug, Serialize)]
pub struct TransactionDetailResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub quantity: i64,
    pub price: i64,
}

impl From<&TransactionWithTotal> for TransactionResponse {
    fn from(row: &TransactionWithTotal) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            total_price: row.total_price,
            transaction_status: row.transaction_status,
            checkout_at: row.checkout_at,
            payment_at: row.payment_at,
            updated_at: row.updated_at,
            transaction_details: None,
        }
    }
}

impl TransactionResponse {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            user_id: tx.user_id,
            total_price: tx.total_price,
            transaction_status: tx.transaction_status,
            checkout_at: tx.checkout_at,
            payment_at: tx.payment_at,
            updated_at: tx.updated_at,
            transaction_details: None,
        }
    }
}

/// Provider notification after intake parsing; the single input shape of
/// `check_and_update_transaction`, fed by both webhook and scheduler.
#[derive(Debug, Clone)]
pub struct CheckAndUpdateTransactionRequest {
    pub provider_status: String,
    pub status_code: String,
    pub signature_key: String,
    pub settlement_time: Option<String>,
    pub order_id: Uuid,
    pub gross_amount: String,
    pub body: Vec<u8>,
}

/// The provider's webhook body, minimally parsed: the fields the reconciler
/// routes on. Everything else stays in the raw bytes.
#[derive(Debug, Deserialize)]
pub struct WebhookNotifyRequest {
    pub transaction_status: String,
    pub status_code: String,
    pub signature_key: String,
    #[serde(default)]
    pub settlement_time: Option<String>,
    pub order_id: String,
    pub gross_amount: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_totals_lines() {
        let request = CreateTransactionRequest {
            products: vec![
                TransactionProduct {
                    product_id: Uuid::new_v4(),
                    price: 100,
                    quantity: 2,
                },
                TransactionProduct {
                    product_id: Uuid::new_v4(),
                    price: 250,
                    quantity: 1,
                },
            ],
        };
        assert!(request.validate().is_ok());
        assert_eq!(request.total_price(), 450);
    }

    #[test]
    fn create_request_rejects_empty_and_nonpositive() {
        assert!(CreateTransactionRequest { products: vec![] }
            .validate()
            .is_err());

        let zero_qty = CreateTransactionRequest {
            products: vec![TransactionProduct {
                product_id: Uuid::new_v4(),
                price: 100,
                quantity: 0,
            }],
        };
        assert!(zero_qty.validate().is_err());

        let free_product = CreateTransactionRequest {
            products: vec![TransactionProduct {
                product_id: Uuid::new_v4(),
                price: 0,
                quantity: 1,
            }],
        };
        assert!(free_product.validate().is_err());
    }

    #[test]
    fn webhook_body_parses_provider_fields() {
        let raw = r#"{
            "transaction_status": "settlement",
            "status_code": "200",
            "signature_key": "deadbeef",
            "settlement_time": "2026-07-01 10:00:00",
            "order_id": "5f7c9bde-08a4-4a2b-9fb2-5f4c4d7e9a01",
            "gross_amount": "450.00",
            "payment_type": "qris"
        }"#;
        let parsed: WebhookNotifyRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.transaction_status, "settlement");
        assert_eq!(parsed.gross_amount, "450.00");
        assert_eq!(parsed.settlement_time.as_deref(), Some("2026-07-01 10:00:00"));
    }
}
