//! Saga state lookup.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use saga::SagaContext;

use super::parse_id;
use crate::error::ApiError;
use crate::state::AppState;

/// GET /sagas/{id}: returns the latest recorded state of a saga.
#[tracing::instrument(skip(state))]
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SagaContext>, ApiError> {
    let saga_id: SagaId = parse_id(&id)?;
    state
        .placement
        .orchestrator()
        .get_saga(saga_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Saga {id} not found")))
}
