//! Typed client for the inventory service's internal RPC surface.
//!
//! The transaction service reaches inventory through exactly two calls:
//! [`InventoryClient::check_product_and_reserve`], the synchronous
//! reservation step of the purchase saga, and
//! [`InventoryClient::owner_get_product`], the ownership pre-check for the
//! owner transaction view. Business rejections travel in the error envelope
//! and are surfaced unchanged; transport failures become `EXTERNAL` after
//! the bounded connect retries are exhausted.

use std::time::Duration;

use platform_contracts::{AppError, AppResult, ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One requested basket line: the product, the quantity wanted, and the
/// unit price the buyer saw.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveLine {
    pub product_id: Uuid,
    pub quantity: i64,
    pub price: i64,
}

#[derive(Debug, Serialize)]
struct CheckAndReserveRequest<'a> {
    transaction_id: Uuid,
    products: &'a [ReserveLine],
}

#[derive(Debug, Serialize)]
struct OwnerGetProductRequest {
    user_id: Uuid,
    product_id: Uuid,
}

/// Canonical product record returned by the inventory service.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub price: i64,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Client configuration: base URL plus dial-retry bounds.
#[derive(Debug, Clone)]
pub struct InventoryClientConfig {
    pub base_url: String,
    pub connect_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl InventoryClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_retries: 3,
            retry_delay: Duration::from_millis(500),
            request_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Clone)]
pub struct InventoryClient {
    config: InventoryClientConfig,
    http: reqwest::Client,
}

impl InventoryClient {
    pub fn new(config: InventoryClientConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::internal("failed to build inventory http client", e))?;

        Ok(Self { config, http })
    }

    /// Atomically reserve every line of a basket. Returns the canonical
    /// product records on success; any line failing leaves nothing reserved.
    pub async fn check_product_and_reserve(
        &self,
        transaction_id: Uuid,
        products: &[ReserveLine],
    ) -> AppResult<Vec<ProductRecord>> {
        let request = CheckAndReserveRequest {
            transaction_id,
            products,
        };
        self.post("/rpc/v1/product/check-and-reserve", &request)
            .await
    }

    /// Fetch a product, enforcing that `user_id` owns it.
    pub async fn owner_get_product(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<ProductRecord> {
        let request = OwnerGetProductRequest {
            user_id,
            product_id,
        };
        self.post("/rpc/v1/product/owner-get", &request).await
    }

    async fn post<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> AppResult<T> {
        let url = format!("{}{}", self.config.base_url, path);

        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            match self.http.post(&url).json(body).send().await {
                Ok(response) => break response,
                Err(e) if e.is_connect() && attempt <= self.config.connect_retries => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        error = %e,
                        "inventory dial failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    return Err(AppError::external("inventory service unreachable", e));
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            let envelope: DataEnvelope<T> = response
                .json()
                .await
                .map_err(|e| AppError::external("malformed inventory response", e))?;
            return Ok(envelope.data);
        }

        // The envelope carries the taxonomy kind; fall back to a status-based
        // guess for non-envelope bodies (proxies, panics).
        let envelope: ErrorEnvelope = response.json().await.unwrap_or(ErrorEnvelope {
            message: None,
            kind: None,
        });

        let kind = match envelope.kind.as_deref() {
            Some(k) => ErrorKind::parse(k),
            None if status.as_u16() == 422 => ErrorKind::InvalidArgument,
            None if status.as_u16() == 404 => ErrorKind::ResourceNotFound,
            None if status.as_u16() == 403 => ErrorKind::Forbidden,
            None if status.is_server_error() => ErrorKind::External,
            None => ErrorKind::Internal,
        };
        let message = envelope
            .message
            .unwrap_or_else(|| format!("inventory call failed with status {status}"));

        Err(AppError::new(kind, message))
    }
}
