//! HTTP handlers, one module per resource.

pub mod circuit_breakers;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod sagas;
pub mod transactions;

use std::str::FromStr;

use crate::error::ApiError;

fn parse_id<T>(raw: &str) -> Result<T, ApiError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
