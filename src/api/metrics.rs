use axum::extract::{Path, State};
use axum::Json;

use crate::api::AppState;
use crate::domain::UserId;
use crate::error::AppError;
use crate::orchestration::PerformanceMetrics;

pub async fn get_metrics(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PerformanceMetrics>, AppError> {
    let metrics = state
        .services
        .metrics
        .get_performance_metrics(&UserId::new(id))
        .await?;
    Ok(Json(metrics))
}
