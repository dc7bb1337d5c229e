//! Domain types for the compensation and genealogy engine.
//!
//! This module provides:
//! - Lossless money handling via the Decimal wrapper
//! - Typed identifiers and timestamps
//! - Users, ranks, products, purchases, rebates and ledger entries

pub mod decimal;
pub mod primitives;
pub mod purchase;
pub mod rank;
pub mod rebate;
pub mod user;

pub use decimal::Decimal;
pub use primitives::{PurchaseId, ProductId, RankId, RebateId, TimeMs, TransactionId, UserId};
pub use purchase::{Product, Purchase, PurchaseStatus, PvPolicy};
pub use rank::{Rank, RankAdvancement, RankMetricsSnapshot, RankRequirement};
pub use rebate::{
    NewRebate, Rebate, RebateConfig, RebateStatus, RewardKind, RewardRule, TransactionType,
    WalletTransaction,
};
pub use user::{NewUser, Position, User};
