//! Per-member performance metrics for dashboards and rank decisions.

use crate::cache::{self, keys, Cache};
use crate::config::CompensationConfig;
use crate::db::{ChildFilter, Repository};
use crate::domain::{Decimal, RankAdvancement, TimeMs, UserId};
use crate::engine::ActivityInputs;
use crate::error::EngineError;
use crate::genealogy::{GenealogyService, LevelCount};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Window for "recent" activity and new team members.
pub const RECENT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub user_id: UserId,
    pub personal_sales: Decimal,
    pub team_sales: Decimal,
    pub total_sales: Decimal,
    pub rebates_earned: Decimal,
    pub team_size: i64,
    pub new_team_members: i64,
    pub direct_downline: i64,
    pub level_counts: Vec<LevelCount>,
    pub rank_history: Vec<RankAdvancement>,
    /// Always within 0..=100.
    pub activity_score: u8,
    pub last_updated: TimeMs,
}

pub struct MetricsAggregator {
    repo: Arc<Repository>,
    genealogy: Arc<GenealogyService>,
    cache: Arc<dyn Cache>,
    config: CompensationConfig,
}

impl MetricsAggregator {
    pub fn new(
        repo: Arc<Repository>,
        genealogy: Arc<GenealogyService>,
        cache: Arc<dyn Cache>,
        config: CompensationConfig,
    ) -> Self {
        Self {
            repo,
            genealogy,
            cache,
            config,
        }
    }

    pub async fn get_performance_metrics(
        &self,
        user_id: &UserId,
    ) -> Result<PerformanceMetrics, EngineError> {
        let key = keys::metrics(user_id);
        let namespaces = [cache::subtree_namespace(user_id)];
        cache::get_or_compute(
            self.cache.as_ref(),
            &key,
            self.config.metrics_cache_ttl,
            &namespaces,
            || self.compute(user_id),
        )
        .await
    }

    async fn compute(&self, user_id: &UserId) -> Result<PerformanceMetrics, EngineError> {
        self.genealogy.require_user(user_id).await?;
        let now = TimeMs::now();
        let since = now.days_before(RECENT_WINDOW_DAYS);

        let downline = self.genealogy.get_downline_ids(user_id, None).await?;
        let personal_sales = self
            .repo
            .sum_completed_sales(std::slice::from_ref(user_id))
            .await?;
        let team_sales = self.repo.sum_completed_sales(&downline).await?;
        let rebates_earned = self.repo.sum_processed_rebates(user_id).await?;
        let new_team_members = self.repo.count_joined_since(&downline, since).await?;
        let direct_downline = self
            .repo
            .count_children(user_id, &ChildFilter::default())
            .await?;
        let level_counts = self
            .genealogy
            .get_level_counts(user_id, self.config.max_genealogy_depth)
            .await?;
        let rank_history = self.repo.list_rank_advancements(user_id).await?;

        let inputs = ActivityInputs {
            recent_purchases: self.repo.count_purchases_since(user_id, since).await?,
            recent_direct_referrals: self.repo.count_direct_joined_since(user_id, since).await?,
            personal_sales,
            team_sales,
            rebates_earned,
            new_team_members,
        };

        Ok(PerformanceMetrics {
            user_id: user_id.clone(),
            personal_sales,
            team_sales,
            total_sales: personal_sales + team_sales,
            rebates_earned,
            team_size: downline.len() as i64,
            new_team_members,
            direct_downline,
            level_counts,
            rank_history,
            activity_score: self.config.activity_model.score(&inputs),
            last_updated: now,
        })
    }
}
