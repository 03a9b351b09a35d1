//! Shared domain types for the token-arena competition engine.
//!
//! CRITICAL: All prices and pool amounts use `rust_decimal::Decimal`.
//! NEVER use f64 for financial math.

pub mod types;

pub use types::*;
