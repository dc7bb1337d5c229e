//! Per-level payout math for the two rebate calculation strategies.

use crate::domain::{Decimal, RewardRule};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which base the percentage rules are applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebateStrategy {
    /// Percentages apply to the purchase amount, multiplier applied in the
    /// same product. PV, when known, is paid alongside at the same rate.
    #[default]
    AmountBased,
    /// Percentages apply to the purchase PV; the PV base is rounded first and
    /// the rank multiplier applied to the rounded base.
    PvBased,
}

impl fmt::Display for RebateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebateStrategy::AmountBased => f.write_str("amount"),
            RebateStrategy::PvBased => f.write_str("pv"),
        }
    }
}

impl FromStr for RebateStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amount" => Ok(RebateStrategy::AmountBased),
            "pv" => Ok(RebateStrategy::PvBased),
            other => Err(format!("must be amount or pv, got {}", other)),
        }
    }
}

/// Monetary and PV totals of the purchase being paid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseBasis {
    pub total_amount: Decimal,
    pub total_pv: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub amount: Decimal,
    pub pv_amount: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutError {
    #[error("PV-based strategy requires the purchase PV")]
    MissingPv,
    #[error("payout exceeds the representable amount")]
    Overflow,
}

/// `base * multiplier * percentage / 100`, rounded to cents.
fn scaled_percent(base: Decimal, multiplier: Decimal, percentage: Decimal) -> Result<Decimal, PayoutError> {
    base.checked_mul(multiplier)
        .and_then(|v| v.checked_percent(percentage))
        .map(|v| v.round_money())
        .ok_or(PayoutError::Overflow)
}

impl RebateStrategy {
    /// Compute the payout of `rule` for a receiver whose rank multiplier is
    /// `multiplier`. Results are rounded to cents.
    pub fn payout(
        &self,
        rule: &RewardRule,
        basis: &PurchaseBasis,
        multiplier: Decimal,
    ) -> Result<Payout, PayoutError> {
        match (self, rule) {
            (_, RewardRule::Fixed { amount }) => Ok(Payout {
                amount: amount
                    .checked_mul(multiplier)
                    .ok_or(PayoutError::Overflow)?
                    .round_money(),
                pv_amount: None,
            }),
            (RebateStrategy::AmountBased, RewardRule::Percentage { percentage }) => {
                let amount = scaled_percent(basis.total_amount, multiplier, *percentage)?;
                let pv_amount = basis
                    .total_pv
                    .map(|pv| scaled_percent(pv, multiplier, *percentage))
                    .transpose()?;
                Ok(Payout { amount, pv_amount })
            }
            (RebateStrategy::PvBased, RewardRule::Percentage { percentage }) => {
                let pv = basis.total_pv.ok_or(PayoutError::MissingPv)?;
                let pv_amount = scaled_percent(pv, Decimal::one(), *percentage)?;
                Ok(Payout {
                    amount: pv_amount
                        .checked_mul(multiplier)
                        .ok_or(PayoutError::Overflow)?
                        .round_money(),
                    pv_amount: Some(pv_amount),
                })
            }
        }
    }
}
