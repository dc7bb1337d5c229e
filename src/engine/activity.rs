//! Activity score: a bounded 0..=100 composite of recent member activity.

use crate::domain::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

/// Raw inputs gathered by the metrics aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityInputs {
    pub recent_purchases: i64,
    pub recent_direct_referrals: i64,
    pub personal_sales: Decimal,
    pub team_sales: Decimal,
    pub rebates_earned: Decimal,
    pub new_team_members: i64,
}

/// Normalization targets and weights for [`ActivityModel::Weighted`].
///
/// Each component contributes `min(value / target, 1) * weight`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedTargets {
    pub personal_sales_target: Decimal,
    pub team_sales_target: Decimal,
    pub rebates_target: Decimal,
    pub new_members_target: i64,
    pub personal_sales_weight: Decimal,
    pub team_sales_weight: Decimal,
    pub rebates_weight: Decimal,
    pub new_members_weight: Decimal,
}

impl Default for WeightedTargets {
    fn default() -> Self {
        Self {
            personal_sales_target: Decimal::from_i64(1_000),
            team_sales_target: Decimal::from_i64(10_000),
            rebates_target: Decimal::from_i64(500),
            new_members_target: 5,
            personal_sales_weight: Decimal::from_i64(25),
            team_sales_weight: Decimal::from_i64(35),
            rebates_weight: Decimal::from_i64(20),
            new_members_weight: Decimal::from_i64(20),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityModel {
    /// Points per recent purchase plus points per recent direct referral.
    Simple {
        purchase_points: i64,
        referral_points: i64,
    },
    Weighted(WeightedTargets),
}

impl Default for ActivityModel {
    fn default() -> Self {
        ActivityModel::Simple {
            purchase_points: 10,
            referral_points: 20,
        }
    }
}

impl FromStr for ActivityModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "simple" => Ok(ActivityModel::default()),
            "weighted" => Ok(ActivityModel::Weighted(WeightedTargets::default())),
            other => Err(format!("must be simple or weighted, got {}", other)),
        }
    }
}

impl ActivityModel {
    /// Score clamped to `[0, 100]`.
    pub fn score(&self, inputs: &ActivityInputs) -> u8 {
        let raw = match self {
            ActivityModel::Simple {
                purchase_points,
                referral_points,
            } => Decimal::from_i64(
                inputs
                    .recent_purchases
                    .saturating_mul(*purchase_points)
                    .saturating_add(inputs.recent_direct_referrals.saturating_mul(*referral_points)),
            ),
            ActivityModel::Weighted(t) => {
                inputs.personal_sales.ratio_capped(t.personal_sales_target) * t.personal_sales_weight
                    + inputs.team_sales.ratio_capped(t.team_sales_target) * t.team_sales_weight
                    + inputs.rebates_earned.ratio_capped(t.rebates_target) * t.rebates_weight
                    + Decimal::from_i64(inputs.new_team_members)
                        .ratio_capped(Decimal::from_i64(t.new_members_target))
                        * t.new_members_weight
            }
        };
        clamp_score(raw)
    }
}

fn clamp_score(raw: Decimal) -> u8 {
    if !raw.is_positive() {
        return 0;
    }
    if raw >= Decimal::hundred() {
        return 100;
    }
    raw.inner().round().to_u8().unwrap_or(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_model_counts_points() {
        let inputs = ActivityInputs {
            recent_purchases: 2,
            recent_direct_referrals: 1,
            ..Default::default()
        };
        assert_eq!(ActivityModel::default().score(&inputs), 40);
    }

    #[test]
    fn test_simple_model_is_clamped() {
        let inputs = ActivityInputs {
            recent_purchases: 50,
            recent_direct_referrals: 50,
            ..Default::default()
        };
        assert_eq!(ActivityModel::default().score(&inputs), 100);
        assert_eq!(ActivityModel::default().score(&ActivityInputs::default()), 0);
    }

    #[test]
    fn test_weighted_model_caps_each_component() {
        let model = ActivityModel::Weighted(WeightedTargets::default());
        let inputs = ActivityInputs {
            personal_sales: Decimal::from_i64(500),      // 0.5 * 25 = 12.5
            team_sales: Decimal::from_i64(1_000_000),    // capped: 35
            rebates_earned: Decimal::zero(),             // 0
            new_team_members: 1,                         // 0.2 * 20 = 4
            ..Default::default()
        };
        // 12.5 + 35 + 0 + 4 = 51.5, rounded half-even
        assert_eq!(model.score(&inputs), 52);
    }

    #[test]
    fn test_weighted_model_maximum_is_100() {
        let model = ActivityModel::Weighted(WeightedTargets::default());
        let inputs = ActivityInputs {
            personal_sales: Decimal::from_i64(10_000),
            team_sales: Decimal::from_i64(100_000),
            rebates_earned: Decimal::from_i64(10_000),
            new_team_members: 100,
            ..Default::default()
        };
        assert_eq!(model.score(&inputs), 100);
    }

    #[test]
    fn test_model_parse() {
        assert!(matches!(
            "weighted".parse::<ActivityModel>().unwrap(),
            ActivityModel::Weighted(_)
        ));
        assert!("fancy".parse::<ActivityModel>().is_err());
    }
}
