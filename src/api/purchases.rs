use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::domain::{PurchaseId, Rebate};
use crate::error::AppError;
use crate::orchestration::{CompletePurchase, PurchaseOutcome};

pub async fn complete_purchase(
    State(state): State<AppState>,
    Json(body): Json<CompletePurchase>,
) -> Result<(StatusCode, Json<PurchaseOutcome>), AppError> {
    let outcome = state.services.orchestrator.complete_purchase(&body).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RebatesResponse {
    pub purchase_id: PurchaseId,
    pub rebates: Vec<Rebate>,
}

/// Re-run the calculation for a stored purchase; existing rows are kept.
pub async fn recalculate_rebates(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RebatesResponse>, AppError> {
    let purchase_id = PurchaseId::new(id);
    let rebates = state
        .services
        .calculator
        .calculate_for_purchase(&purchase_id)
        .await?;
    Ok(Json(RebatesResponse {
        purchase_id,
        rebates,
    }))
}
