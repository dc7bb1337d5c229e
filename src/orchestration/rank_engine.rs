//! Rank eligibility and advancement.

use crate::db::{ChildFilter, Repository};
use crate::domain::{Rank, RankAdvancement, RankMetricsSnapshot, User, UserId};
use crate::engine::RequirementBreakdown;
use crate::error::EngineError;
use crate::genealogy::GenealogyService;
use crate::notify::{self, Notification, Notifier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityReport {
    pub user_id: UserId,
    pub eligible: bool,
    pub current_rank: Option<Rank>,
    pub next_rank: Option<Rank>,
    /// Absent when there is no next tier or it has no requirement row.
    pub requirements: Option<RequirementBreakdown>,
    pub metrics: RankMetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedAdvancement {
    pub user_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAdvancementSummary {
    pub checked: usize,
    pub advanced: Vec<RankAdvancement>,
    pub failed: Vec<FailedAdvancement>,
}

pub struct RankEngine {
    repo: Arc<Repository>,
    genealogy: Arc<GenealogyService>,
    notifier: Arc<dyn Notifier>,
}

impl RankEngine {
    pub fn new(
        repo: Arc<Repository>,
        genealogy: Arc<GenealogyService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            repo,
            genealogy,
            notifier,
        }
    }

    /// Evaluate the member against the tier directly above its current rank.
    pub async fn check_eligibility(&self, user_id: &UserId) -> Result<EligibilityReport, EngineError> {
        let user = self.genealogy.require_user(user_id).await?;
        self.evaluate(&user).await
    }

    async fn evaluate(&self, user: &User) -> Result<EligibilityReport, EngineError> {
        let current_rank = match &user.rank_id {
            Some(rank_id) => self.repo.get_rank(rank_id).await?,
            None => None,
        };
        let next_rank = self
            .repo
            .next_rank_after(current_rank.as_ref().map(|r| r.level))
            .await?
            // A dangling rank id must never lead to a lower tier.
            .filter(|_| user.rank_id.is_none() || current_rank.is_some());

        let requirement = match &next_rank {
            Some(next) => self.repo.get_requirement(&next.id).await?,
            None => None,
        };

        let metrics = self
            .snapshot(&user.id, requirement.as_ref().map(|r| r.qualified_rank_level))
            .await?;
        let requirements = requirement
            .as_ref()
            .map(|req| RequirementBreakdown::evaluate(req, &metrics));
        let eligible = requirements.as_ref().is_some_and(|r| r.all_met());

        debug!(
            user = %user.id,
            next = ?next_rank.as_ref().map(|r| &r.id),
            eligible,
            "Checked rank eligibility"
        );
        Ok(EligibilityReport {
            user_id: user.id.clone(),
            eligible,
            current_rank,
            next_rank,
            requirements,
            metrics,
        })
    }

    /// Sales and downline figures used for promotion decisions.
    ///
    /// Reads the store directly, not the cache.
    async fn snapshot(
        &self,
        user_id: &UserId,
        qualified_rank_level: Option<i64>,
    ) -> Result<RankMetricsSnapshot, EngineError> {
        let downline = self.genealogy.collect_downline_ids(user_id, None).await?;
        let personal_sales = self
            .repo
            .sum_completed_sales(std::slice::from_ref(user_id))
            .await?;
        let downline_sales = self.repo.sum_completed_sales(&downline).await?;
        let direct_downline = self
            .repo
            .count_children(user_id, &ChildFilter::default())
            .await?;
        let qualified_downline = match qualified_rank_level {
            Some(level) => self.repo.count_at_or_above_level(&downline, level).await?,
            None => 0,
        };

        Ok(RankMetricsSnapshot {
            personal_sales,
            group_sales: personal_sales + downline_sales,
            direct_downline,
            qualified_downline,
            team_size: downline.len() as i64,
        })
    }

    /// Promote the member one tier if it is eligible right now.
    ///
    /// Returns the audit row, or None when not eligible or when a concurrent
    /// advancement changed the rank first.
    pub async fn process_advancement(
        &self,
        user_id: &UserId,
    ) -> Result<Option<RankAdvancement>, EngineError> {
        let user = self.genealogy.require_user(user_id).await?;
        let report = self.evaluate(&user).await?;
        let Some(next) = report.next_rank.filter(|_| report.eligible) else {
            return Ok(None);
        };

        let Some(advancement) = self
            .repo
            .apply_rank_advancement(&user.id, user.rank_id.as_ref(), &next.id, &report.metrics)
            .await?
        else {
            info!(user = %user.id, "Rank changed concurrently, advancement skipped");
            return Ok(None);
        };

        if let Err(e) = self.genealogy.invalidate_lineage(&user.id).await {
            warn!(user = %user.id, error = %e, "Cache invalidation after advancement failed");
        }
        info!(
            user = %user.id,
            from = ?advancement.previous_rank_id,
            to = %advancement.new_rank_id,
            "Rank advanced"
        );

        notify::dispatch(
            &self.notifier,
            vec![Notification::RankAdvanced {
                user_id: user.id.clone(),
                previous_rank_id: advancement.previous_rank_id.clone(),
                new_rank_id: next.id.clone(),
                rank_name: next.name.clone(),
            }],
        );

        Ok(Some(advancement))
    }

    /// Run [`process_advancement`](Self::process_advancement) for every member;
    /// one member's failure does not stop the sweep.
    pub async fn process_all_advancements(&self) -> Result<BatchAdvancementSummary, EngineError> {
        let ids = self.repo.all_user_ids().await?;
        let mut summary = BatchAdvancementSummary::default();

        for user_id in ids {
            summary.checked += 1;
            match self.process_advancement(&user_id).await {
                Ok(Some(advancement)) => summary.advanced.push(advancement),
                Ok(None) => {}
                Err(e) => {
                    warn!(user = %user_id, error = %e, "Advancement check failed");
                    summary.failed.push(FailedAdvancement {
                        user_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            checked = summary.checked,
            advanced = summary.advanced.len(),
            failed = summary.failed.len(),
            "Rank sweep finished"
        );
        Ok(summary)
    }
}
