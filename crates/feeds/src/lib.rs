//! Marketplace API access.
//!
//! ## Architecture
//!
//! - `rate_limit` - per-credential token buckets (burst 3, one token per 20 s)
//! - `retry` - exponential backoff for transient failures
//! - `client` - `ApiClient` combining both over an `HttpTransport`
//! - `rest` - typed fetchers for coefficients, tariffs and the stock report

pub mod client;
pub mod error;
pub mod rate_limit;
pub mod rest;
pub mod retry;

pub use client::*;
pub use error::*;
pub use rate_limit::*;
pub use rest::*;
pub use retry::*;
