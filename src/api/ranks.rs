use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::api::AppState;
use crate::domain::{RankAdvancement, UserId};
use crate::error::AppError;
use crate::orchestration::{BatchAdvancementSummary, EligibilityReport};

pub async fn get_eligibility(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<EligibilityReport>, AppError> {
    let report = state
        .services
        .rank_engine
        .check_eligibility(&UserId::new(id))
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse {
    pub advanced: bool,
    pub advancement: Option<RankAdvancement>,
}

pub async fn advance_user(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<AdvanceResponse>, AppError> {
    let advancement = state
        .services
        .rank_engine
        .process_advancement(&UserId::new(id))
        .await?;
    Ok(Json(AdvanceResponse {
        advanced: advancement.is_some(),
        advancement,
    }))
}

pub async fn advance_all(
    State(state): State<AppState>,
) -> Result<Json<BatchAdvancementSummary>, AppError> {
    let summary = state.services.rank_engine.process_all_advancements().await?;
    Ok(Json(summary))
}
