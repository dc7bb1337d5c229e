use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::Json;
use serde::Deserialize;

use crate::api::AppState;
use crate::domain::TimeMs;
use crate::error::AppError;
use crate::orchestration::ProcessingSummary;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProcessBody {
    /// Only rebates created at or before this instant are processed.
    pub cutoff_ms: Option<i64>,
}

/// An empty body processes everything; any other body must be a valid
/// JSON [`ProcessBody`].
fn parse_cutoff(headers: &HeaderMap, body: &[u8]) -> Result<Option<TimeMs>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(AppError::BadRequest(
            "Expected Content-Type: application/json".to_string(),
        ));
    }
    let Json(parsed) =
        Json::<ProcessBody>::from_bytes(body).map_err(|e| AppError::BadRequest(e.body_text()))?;
    Ok(parsed.cutoff_ms.map(TimeMs::new))
}

pub async fn process_rebates(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ProcessingSummary>, AppError> {
    let cutoff = parse_cutoff(&headers, &body)?;
    let summary = state
        .services
        .processor
        .process_pending_rebates_before(cutoff)
        .await?;
    Ok(Json(summary))
}
