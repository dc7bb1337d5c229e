use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::{NewUser, Position, User, UserId};
use crate::error::AppError;

pub async fn register_user(
    State(state): State<AppState>,
    Json(body): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let user = state.services.genealogy.register_user(&body).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReassignBody {
    /// New sponsor; null detaches the member to a root.
    pub upline_id: Option<UserId>,
    #[serde(default)]
    pub position: Option<Position>,
}

pub async fn reassign_upline(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<ReassignBody>,
) -> Result<Json<User>, AppError> {
    let user = state
        .services
        .genealogy
        .reassign_sponsor(&UserId::new(id), body.upline_id.as_ref(), body.position)
        .await?;
    Ok(Json(user))
}
