//! Payout configuration, rebate rows and the wallet ledger.

use crate::domain::{Decimal, ProductId, PurchaseId, RebateId, TimeMs, TransactionId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Payout rule for one (product, level) pair, stored as tagged JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RewardRule {
    /// Flat amount per purchase.
    Fixed { amount: Decimal },
    /// Percentage (0–100) of the purchase amount or PV.
    Percentage { percentage: Decimal },
}

impl RewardRule {
    pub fn kind(&self) -> RewardKind {
        match self {
            RewardRule::Fixed { .. } => RewardKind::Fixed,
            RewardRule::Percentage { .. } => RewardKind::Percentage,
        }
    }

    /// Parse and validate a stored rule.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let rule: RewardRule = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        match rule {
            RewardRule::Fixed { amount } if amount.is_negative() => {
                Err(format!("fixed amount must not be negative, got {}", amount))
            }
            RewardRule::Percentage { percentage }
                if percentage.is_negative() || percentage > Decimal::hundred() =>
            {
                Err(format!("percentage must be within 0..=100, got {}", percentage))
            }
            rule => Ok(rule),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardKind {
    Fixed,
    Percentage,
}

impl RewardKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardKind::Fixed => "fixed",
            RewardKind::Percentage => "percentage",
        }
    }
}

impl FromStr for RewardKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(RewardKind::Fixed),
            "percentage" => Ok(RewardKind::Percentage),
            other => Err(format!("unknown reward kind: {}", other)),
        }
    }
}

/// A validated payout rule bound to a product and upline level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebateConfig {
    pub id: i64,
    pub product_id: ProductId,
    pub level: i64,
    pub rule: RewardRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebateStatus {
    Pending,
    Processed,
    Failed,
}

impl RebateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebateStatus::Pending => "pending",
            RebateStatus::Processed => "processed",
            RebateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RebateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RebateStatus::Pending),
            "processed" => Ok(RebateStatus::Processed),
            "failed" => Ok(RebateStatus::Failed),
            other => Err(format!("unknown rebate status: {}", other)),
        }
    }
}

/// Commission owed to `receiver_id` because `generator_id` bought something.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rebate {
    pub id: RebateId,
    pub purchase_id: PurchaseId,
    pub receiver_id: UserId,
    pub generator_id: UserId,
    pub level: i64,
    pub amount: Decimal,
    pub pv_amount: Option<Decimal>,
    pub reward_type: RewardKind,
    pub status: RebateStatus,
    pub processed_at: Option<TimeMs>,
    pub transaction_id: Option<TransactionId>,
    pub failure_reason: Option<String>,
    pub created_at: TimeMs,
}

/// A rebate computed by the calculator, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRebate {
    pub purchase_id: PurchaseId,
    pub receiver_id: UserId,
    pub generator_id: UserId,
    pub level: i64,
    pub amount: Decimal,
    pub pv_amount: Option<Decimal>,
    pub reward_type: RewardKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Rebate,
    Referral,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Rebate => "rebate",
            TransactionType::Referral => "referral",
            TransactionType::Bonus => "bonus",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rebate" => Ok(TransactionType::Rebate),
            "referral" => Ok(TransactionType::Referral),
            "bonus" => Ok(TransactionType::Bonus),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

/// Immutable ledger entry; the only way a wallet balance moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub amount: Decimal,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub description: String,
    pub rebate_id: Option<RebateId>,
    pub created_at: TimeMs,
}
