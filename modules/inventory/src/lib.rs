//! Inventory service: product catalog, stock reservations, and the
//! transaction lifecycle consumer.
//!
//! Owns two tables (`products`, `product_reservations`) and guards one
//! invariant above all: stock is conserved. Every unit leaving `quantity`
//! is accounted for by a reservation row in RESERVED, COMMITTED, or SETTLED
//! state; cancel/expire events put the units back.

pub mod config;
pub mod consumer;
pub mod entities;
pub mod models;
pub mod repos;
pub mod routes;
pub mod rpc;
pub mod services;

pub use config::Config;
