//! Transaction service: the buyer-facing half of the purchase saga.
//!
//! Owns baskets (`transactions`, `transaction_details`) and drives the
//! distributed workflow: reserve stock over RPC, persist the basket, mint a
//! payment session, then reconcile the provider's verdict (webhook push,
//! scheduler pull, or expiry deadline) and tell inventory how it ended.

pub mod config;
pub mod consumer;
pub mod entities;
pub mod models;
pub mod payment;
pub mod repos;
pub mod routes;
pub mod scheduler;
pub mod services;
pub mod tasks;

pub use config::Config;
pub use services::saga_service::SagaDeps;
