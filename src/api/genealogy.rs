use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::db::{ChildFilter, ChildSort, SortField, SortOrder};
use crate::domain::{RankId, TimeMs, UserId};
use crate::error::AppError;
use crate::genealogy::downline::DEFAULT_PAGE_SIZE;
use crate::genealogy::{
    BinaryLegs, DownlineOptions, DownlineQuery, DownlineTree, LevelCount, UplineEntry,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UplineParams {
    pub max_levels: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UplineResponse {
    pub user_id: UserId,
    pub upline: Vec<UplineEntry>,
}

pub async fn get_upline(
    Path(id): Path<String>,
    Query(params): Query<UplineParams>,
    State(state): State<AppState>,
) -> Result<Json<UplineResponse>, AppError> {
    let max_levels = params.max_levels.unwrap_or(state.config.max_upline_levels);
    if max_levels == 0 {
        return Err(AppError::BadRequest("maxLevels must be at least 1".into()));
    }
    let user_id = UserId::new(id);
    let upline = state
        .services
        .genealogy
        .get_upline(&user_id, max_levels)
        .await?;
    Ok(Json(UplineResponse { user_id, upline }))
}

/// Flat query-string form of [`DownlineQuery`].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownlineParams {
    pub max_level: Option<usize>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    #[serde(default)]
    pub lazy: bool,
    pub rank_id: Option<String>,
    pub joined_after: Option<i64>,
    pub joined_before: Option<i64>,
    pub search: Option<String>,
    pub sort_by: Option<SortField>,
    pub sort_order: Option<SortOrder>,
}

impl DownlineParams {
    fn options(&self) -> Result<DownlineOptions, AppError> {
        if let (Some(after), Some(before)) = (self.joined_after, self.joined_before) {
            if after > before {
                return Err(AppError::BadRequest(
                    "joinedAfter must be <= joinedBefore".into(),
                ));
            }
        }
        Ok(DownlineOptions {
            filter: ChildFilter {
                rank_id: self.rank_id.clone().map(RankId::new),
                joined_after: self.joined_after.map(TimeMs::new),
                joined_before: self.joined_before.map(TimeMs::new),
                search: self.search.clone(),
                position: None,
            },
            sort: ChildSort {
                field: self.sort_by.unwrap_or_default(),
                order: self.sort_order.unwrap_or_default(),
            },
            lazy: self.lazy,
        })
    }
}

pub async fn get_downline(
    Path(id): Path<String>,
    Query(params): Query<DownlineParams>,
    State(state): State<AppState>,
) -> Result<Json<DownlineTree>, AppError> {
    let defaults = DownlineQuery::default();
    let query = DownlineQuery {
        max_level: params.max_level.unwrap_or(defaults.max_level),
        page: params.page.unwrap_or(defaults.page),
        page_size: params.page_size.unwrap_or(defaults.page_size),
        options: params.options()?,
    };
    let tree = state
        .services
        .genealogy
        .get_downline(&UserId::new(id), &query)
        .await?;
    Ok(Json(tree))
}

pub async fn expand_node(
    Path(id): Path<String>,
    Query(params): Query<DownlineParams>,
    State(state): State<AppState>,
) -> Result<Json<DownlineTree>, AppError> {
    let tree = state
        .services
        .genealogy
        .expand_node(
            &UserId::new(id),
            params.page.unwrap_or(1),
            params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            &params.options()?,
        )
        .await?;
    Ok(Json(tree))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCountParams {
    pub max_depth: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelCountsResponse {
    pub user_id: UserId,
    pub levels: Vec<LevelCount>,
    pub total: i64,
}

pub async fn get_level_counts(
    Path(id): Path<String>,
    Query(params): Query<LevelCountParams>,
    State(state): State<AppState>,
) -> Result<Json<LevelCountsResponse>, AppError> {
    let user_id = UserId::new(id);
    let max_depth = params
        .max_depth
        .unwrap_or(state.config.max_genealogy_depth)
        .min(state.config.max_genealogy_depth);
    let levels = state
        .services
        .genealogy
        .get_level_counts(&user_id, max_depth)
        .await?;
    let total = levels.iter().map(|l| l.count).sum();
    Ok(Json(LevelCountsResponse {
        user_id,
        levels,
        total,
    }))
}

pub async fn get_binary_legs(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<BinaryLegs>, AppError> {
    let legs = state
        .services
        .genealogy
        .get_binary_legs(&UserId::new(id))
        .await?;
    Ok(Json(legs))
}
