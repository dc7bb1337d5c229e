pub mod genealogy;
pub mod health;
pub mod metrics;
pub mod purchases;
pub mod ranks;
pub mod rebates;
pub mod users;

use crate::config::CompensationConfig;
use crate::db::Repository;
use crate::orchestration::Services;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub services: Services,
    pub config: CompensationConfig,
}

impl AppState {
    pub fn new(services: Services, config: CompensationConfig) -> Self {
        Self {
            repo: services.repo.clone(),
            services,
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/users", post(users::register_user))
        .route("/v1/users/:id/upline", put(users::reassign_upline))
        .route("/v1/users/:id/metrics", get(metrics::get_metrics))
        .route("/v1/users/:id/rank/eligibility", get(ranks::get_eligibility))
        .route("/v1/users/:id/rank/advance", post(ranks::advance_user))
        .route("/v1/ranks/advance-all", post(ranks::advance_all))
        .route("/v1/genealogy/:id/upline", get(genealogy::get_upline))
        .route("/v1/genealogy/:id/downline", get(genealogy::get_downline))
        .route("/v1/genealogy/:id/expand", get(genealogy::expand_node))
        .route("/v1/genealogy/:id/level-counts", get(genealogy::get_level_counts))
        .route("/v1/genealogy/:id/legs", get(genealogy::get_binary_legs))
        .route("/v1/purchases", post(purchases::complete_purchase))
        .route("/v1/purchases/:id/rebates", post(purchases::recalculate_rebates))
        .route("/v1/rebates/process", post(rebates::process_rebates))
        .layer(cors)
        .with_state(state)
}
