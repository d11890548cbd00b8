pub mod adapter;
pub mod breaker;
pub mod client;
pub mod recovery;

pub use adapter::{PaymentAdapter, PaymentError};
pub use breaker::{BreakerState, CircuitBreaker};
pub use client::{MidtransClient, SnapshotRequest, SnapshotResponse, TransactionStatusResponse};
