//! Transaction state lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::TransactionId;
use transaction::DistributedTransaction;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /transactions/{id}: returns a transaction and its operations.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DistributedTransaction>, ApiError> {
    let transaction_id: TransactionId = parse_id(&id)?;
    state
        .coordinator
        .get_transaction(transaction_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Transaction {id} not found")))
}
