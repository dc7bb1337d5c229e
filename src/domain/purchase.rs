//! Catalog products, purchases and the point-value (PV) policy.

use crate::domain::{Decimal, ProductId, PurchaseId, TimeMs, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Decimal,
    /// PV credited per unit under [`PvPolicy::FixedPerProduct`].
    pub pv_value: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    Pending,
    Completed,
    Cancelled,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseStatus::Pending),
            "completed" => Ok(PurchaseStatus::Completed),
            "cancelled" => Ok(PurchaseStatus::Cancelled),
            other => Err(format!("unknown purchase status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: PurchaseId,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
    pub total_amount: Decimal,
    pub total_pv: Decimal,
    pub status: PurchaseStatus,
    pub created_at: TimeMs,
}

/// How a purchase's PV is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PvPolicy {
    /// PV is this percentage of the purchase amount.
    PercentageOfPrice(Decimal),
    /// PV is the product's `pv_value` times quantity.
    FixedPerProduct,
}

impl PvPolicy {
    /// Purchase PV under this policy; None when it overflows.
    pub fn total_pv(&self, product: &Product, quantity: i64, total_amount: Decimal) -> Option<Decimal> {
        match self {
            PvPolicy::PercentageOfPrice(pct) => total_amount.checked_percent(*pct).map(|pv| pv.round_money()),
            PvPolicy::FixedPerProduct => product.pv_value.checked_mul(Decimal::from_i64(quantity)),
        }
    }
}
