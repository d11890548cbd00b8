//! # Platform Contracts
//!
//! Shared contract tier for the saga services. Everything both services (and
//! their clients) must agree on lives here:
//!
//! - the error taxonomy and its HTTP mapping (`error`, `http`)
//! - the request auth context injected by the identity gateway (`http`)
//! - pagination metadata for list endpoints (`pagination`)
//! - event stream names, subjects, and payload shapes (`events`)
//! - provider timestamp parsing (`timeparse`)
//!
//! Keeping these in one crate lets `modules/*` and `clients/*` depend on a
//! single contract without depending on each other.

mod error;
pub mod events;
pub mod http;
pub mod pagination;
pub mod timeparse;

pub use error::{AppError, AppResult, ErrorKind};
