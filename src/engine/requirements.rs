//! Rank requirement evaluation against a metric snapshot.

use crate::domain::{Decimal, RankMetricsSnapshot, RankRequirement};
use serde::{Deserialize, Serialize};

/// Outcome of one threshold comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementCheck<T> {
    pub required: T,
    pub actual: T,
    pub qualified: bool,
}

impl<T: PartialOrd + Copy> RequirementCheck<T> {
    fn at_least(required: T, actual: T) -> Self {
        Self {
            required,
            actual,
            qualified: actual >= required,
        }
    }
}

/// The four independent checks behind a promotion decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequirementBreakdown {
    pub personal_sales: RequirementCheck<Decimal>,
    pub group_sales: RequirementCheck<Decimal>,
    pub direct_downline: RequirementCheck<i64>,
    pub qualified_downline: RequirementCheck<i64>,
}

impl RequirementBreakdown {
    pub fn evaluate(requirement: &RankRequirement, snapshot: &RankMetricsSnapshot) -> Self {
        Self {
            personal_sales: RequirementCheck::at_least(
                requirement.min_personal_sales,
                snapshot.personal_sales,
            ),
            group_sales: RequirementCheck::at_least(
                requirement.min_group_sales,
                snapshot.group_sales,
            ),
            direct_downline: RequirementCheck::at_least(
                requirement.min_direct_downline,
                snapshot.direct_downline,
            ),
            qualified_downline: RequirementCheck::at_least(
                requirement.min_qualified_downline,
                snapshot.qualified_downline,
            ),
        }
    }

    /// All four checks hold.
    pub fn all_met(&self) -> bool {
        self.personal_sales.qualified
            && self.group_sales.qualified
            && self.direct_downline.qualified
            && self.qualified_downline.qualified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RankId;

    fn requirement() -> RankRequirement {
        RankRequirement {
            rank_id: RankId::new("gold"),
            min_personal_sales: Decimal::from_i64(500),
            min_group_sales: Decimal::from_i64(5000),
            min_direct_downline: 5,
            min_qualified_downline: 2,
            qualified_rank_level: 1,
        }
    }

    fn snapshot(direct: i64) -> RankMetricsSnapshot {
        RankMetricsSnapshot {
            personal_sales: Decimal::from_i64(600),
            group_sales: Decimal::from_i64(8000),
            direct_downline: direct,
            qualified_downline: 3,
            team_size: 20,
        }
    }

    #[test]
    fn test_all_thresholds_met() {
        let breakdown = RequirementBreakdown::evaluate(&requirement(), &snapshot(5));
        assert!(breakdown.all_met());
    }

    #[test]
    fn test_single_failed_check_blocks_eligibility() {
        let breakdown = RequirementBreakdown::evaluate(&requirement(), &snapshot(4));
        assert!(!breakdown.direct_downline.qualified);
        assert_eq!(breakdown.direct_downline.actual, 4);
        assert_eq!(breakdown.direct_downline.required, 5);
        assert!(breakdown.personal_sales.qualified);
        assert!(!breakdown.all_met());
    }

    #[test]
    fn test_breakdown_serializes_camel_case() {
        let breakdown = RequirementBreakdown::evaluate(&requirement(), &snapshot(4));
        let json = serde_json::to_value(&breakdown).unwrap();
        assert_eq!(json["directDownline"]["qualified"], false);
        assert_eq!(json["personalSales"]["required"], "500");
    }
}
