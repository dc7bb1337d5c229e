//! Rank tiers, their requirements and the advancement audit record.

use crate::domain::{Decimal, RankId, TimeMs, UserId};
use serde::{Deserialize, Serialize};

/// An ordered rank tier. `level` is unique and strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rank {
    pub id: RankId,
    pub name: String,
    pub level: i64,
    /// Payout multiplier granted by this rank; falls back to the configured
    /// step table when absent.
    pub benefit_multiplier: Option<Decimal>,
}

/// Thresholds a member must meet to be promoted *into* a rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankRequirement {
    pub rank_id: RankId,
    pub min_personal_sales: Decimal,
    pub min_group_sales: Decimal,
    pub min_direct_downline: i64,
    pub min_qualified_downline: i64,
    /// Downline members at or above this rank level count as qualified.
    pub qualified_rank_level: i64,
}

/// Metric values captured at the time of an advancement decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankMetricsSnapshot {
    pub personal_sales: Decimal,
    pub group_sales: Decimal,
    pub direct_downline: i64,
    pub qualified_downline: i64,
    pub team_size: i64,
}

/// Audit row written whenever a member changes rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankAdvancement {
    pub id: i64,
    pub user_id: UserId,
    pub previous_rank_id: Option<RankId>,
    pub new_rank_id: RankId,
    pub snapshot: RankMetricsSnapshot,
    pub created_at: TimeMs,
}
