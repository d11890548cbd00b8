//! HTTP client for the payment provider (Midtrans Snap + Core API).
//!
//! Two calls: create a checkout session ("snapshot") and read a
//! transaction's status. Authentication is HTTP basic with the server key as
//! username, per the provider's protocol. Sandbox and production hosts are
//! selected by deployment environment.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned status {status}: {body}")]
    Api { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Local,
    Development,
    Production,
}

impl Environment {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "production" => Environment::Production,
            "development" => Environment::Development,
            _ => Environment::Local,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }

    fn snap_base(&self) -> &'static str {
        if self.is_production() {
            "https://app.midtrans.com"
        } else {
            "https://app.sandbox.midtrans.com"
        }
    }

    fn api_base(&self) -> &'static str {
        if self.is_production() {
            "https://api.midtrans.com"
        } else {
            "https://api.sandbox.midtrans.com"
        }
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub order_id: String,
    pub gross_amount: i64,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotResponse {
    pub token: String,
    pub redirect_url: String,
}

/// Status payload shared by the status endpoint and (field-wise) the
/// webhook: the reconciler consumes both through the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatusResponse {
    pub order_id: String,
    pub transaction_status: String,
    pub status_code: String,
    pub signature_key: String,
    pub gross_amount: String,
    #[serde(default)]
    pub settlement_time: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct SnapTransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct SnapCustomerDetails<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SnapCreateBody<'a> {
    transaction_details: SnapTransactionDetails<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    customer_details: Option<SnapCustomerDetails<'a>>,
}

#[derive(Clone)]
pub struct MidtransClient {
    http: reqwest::Client,
    environment: Environment,
    server_key: String,
}

impl MidtransClient {
    pub fn new(server_key: String, environment: Environment) -> Result<Self, ClientError> {
        // No client-level timeout: the adapter imposes the per-call deadline
        // so the breaker and the timeout agree on what "slow" means.
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            environment,
            server_key,
        })
    }

    /// The server key, needed by the reconciler's signature check.
    pub fn server_key(&self) -> &str {
        &self.server_key
    }

    /// Create a checkout session; the returned token is what the buyer's
    /// client redeems to pay.
    pub async fn create_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<SnapshotResponse, ClientError> {
        let url = format!("{}/snap/v1/transactions", self.environment.snap_base());
        let body = SnapCreateBody {
            transaction_details: SnapTransactionDetails {
                order_id: &request.order_id,
                gross_amount: request.gross_amount,
            },
            customer_details: request.email.as_deref().map(|email| SnapCustomerDetails {
                email: Some(email),
            }),
        };

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.server_key, Some(""))
            .json(&body)
            .send()
            .await?;

        self.decode(response).await
    }

    /// Poll the provider's view of one transaction.
    pub async fn transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionStatusResponse, ClientError> {
        let url = format!("{}/v2/{}/status", self.environment.api_base(), order_id);

        let response = self
            .http
            .get(&url)
            .basic_auth(&self.server_key, Some(""))
            .send()
            .await?;

        self.decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            Err(ClientError::Api {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_selects_hosts() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert_eq!(Environment::parse("development"), Environment::Development);
        assert_eq!(Environment::parse("local"), Environment::Local);
        assert_eq!(Environment::parse(""), Environment::Local);

        assert!(Environment::Production.snap_base().starts_with("https://app.midtrans"));
        assert!(Environment::Local.snap_base().contains("sandbox"));
        assert!(Environment::Development.api_base().contains("sandbox"));
    }

    #[test]
    fn snap_body_wire_shape() {
        let body = SnapCreateBody {
            transaction_details: SnapTransactionDetails {
                order_id: "abc",
                gross_amount: 450,
            },
            customer_details: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["transaction_details"]["order_id"], "abc");
        assert_eq!(json["transaction_details"]["gross_amount"], 450);
        assert!(json.get("customer_details").is_none());
    }

    #[test]
    fn status_response_tolerates_extra_fields() {
        let raw = r#"{
            "order_id": "x",
            "transaction_status": "settlement",
            "status_code": "200",
            "signature_key": "sig",
            "gross_amount": "450.00",
            "settlement_time": "2026-07-01 10:00:00",
            "payment_type": "qris",
            "fraud_status": "accept"
        }"#;
        let parsed: TransactionStatusResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.transaction_status, "settlement");
        assert_eq!(parsed.payment_type.as_deref(), Some("qris"));
    }
}
