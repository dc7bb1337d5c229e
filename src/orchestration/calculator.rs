//! Per-purchase rebate calculation.

use crate::config::CompensationConfig;
use crate::db::Repository;
use crate::domain::{
    Decimal, NewRebate, ProductId, Purchase, PurchaseId, PurchaseStatus, Rank, RankId, Rebate,
    RewardRule, UserId,
};
use crate::engine::{PayoutError, PurchaseBasis};
use crate::error::EngineError;
use crate::genealogy::GenealogyService;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The purchase facts a calculation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebateRequest {
    pub purchase_id: PurchaseId,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub total_amount: Decimal,
    pub total_pv: Option<Decimal>,
}

impl From<&Purchase> for RebateRequest {
    fn from(purchase: &Purchase) -> Self {
        Self {
            purchase_id: purchase.id.clone(),
            buyer_id: purchase.buyer_id.clone(),
            product_id: purchase.product_id.clone(),
            total_amount: purchase.total_amount,
            total_pv: Some(purchase.total_pv),
        }
    }
}

pub struct RebateCalculator {
    repo: Arc<Repository>,
    genealogy: Arc<GenealogyService>,
    config: CompensationConfig,
}

impl RebateCalculator {
    pub fn new(
        repo: Arc<Repository>,
        genealogy: Arc<GenealogyService>,
        config: CompensationConfig,
    ) -> Self {
        Self {
            repo,
            genealogy,
            config,
        }
    }

    /// Create one pending rebate per qualifying upline member.
    ///
    /// Re-running for the same purchase leaves existing rows untouched and
    /// returns them.
    ///
    /// # Errors
    /// `NotFound` for an unknown buyer; `Validation` when the PV strategy has
    /// no PV to work with; `Store` on any tree walk or persistence failure,
    /// in which case nothing is written.
    pub async fn calculate_rebates(&self, request: &RebateRequest) -> Result<Vec<Rebate>, EngineError> {
        self.genealogy.require_user(&request.buyer_id).await?;

        let rules = self.load_rules(&request.product_id).await?;
        let Some(&deepest) = rules.keys().next_back() else {
            debug!(product = %request.product_id, "No applicable rebate config");
            return Ok(Vec::new());
        };

        let depth = usize::try_from(deepest)
            .unwrap_or(usize::MAX)
            .min(self.config.max_upline_levels);
        let upline = self.genealogy.walk_upline(&request.buyer_id, depth).await?;
        if upline.is_empty() {
            return Ok(Vec::new());
        }

        let ranks: HashMap<RankId, Rank> = self
            .repo
            .list_ranks()
            .await?
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let basis = PurchaseBasis {
            total_amount: request.total_amount,
            total_pv: request.total_pv,
        };

        let mut rebates = Vec::new();
        for entry in &upline {
            let level = entry.level as i64;
            let Some(rule) = rules.get(&level) else {
                continue;
            };
            let rank = entry.user.rank_id.as_ref().and_then(|id| ranks.get(id));
            let multiplier = self.config.rank_multipliers.for_rank(rank);
            let payout = self
                .config
                .rebate_strategy
                .payout(rule, &basis, multiplier)
                .map_err(|e| match e {
                    PayoutError::MissingPv | PayoutError::Overflow => EngineError::Validation(
                        format!("purchase {}: {}", request.purchase_id, e),
                    ),
                })?;

            if payout.amount.is_zero() {
                debug!(receiver = %entry.user.id, level, "Skipping zero payout");
                continue;
            }

            rebates.push(NewRebate {
                purchase_id: request.purchase_id.clone(),
                receiver_id: entry.user.id.clone(),
                generator_id: request.buyer_id.clone(),
                level,
                amount: payout.amount,
                pv_amount: payout.pv_amount,
                reward_type: rule.kind(),
            });
        }

        if rebates.is_empty() {
            return Ok(Vec::new());
        }

        let stored = self
            .repo
            .insert_rebates_atomic(&request.purchase_id, &rebates)
            .await?;
        info!(
            purchase = %request.purchase_id,
            buyer = %request.buyer_id,
            rebates = stored.len(),
            strategy = %self.config.rebate_strategy,
            "Calculated rebates"
        );
        Ok(stored)
    }

    /// Recalculate from a stored purchase; only completed purchases pay out.
    pub async fn calculate_for_purchase(&self, purchase_id: &PurchaseId) -> Result<Vec<Rebate>, EngineError> {
        let purchase = self
            .repo
            .get_purchase(purchase_id)
            .await?
            .ok_or_else(|| EngineError::not_found("purchase", purchase_id))?;
        if purchase.status != PurchaseStatus::Completed {
            return Err(EngineError::Validation(format!(
                "purchase {} is {}, not completed",
                purchase_id, purchase.status
            )));
        }
        self.calculate_rebates(&RebateRequest::from(&purchase)).await
    }

    /// Valid rules keyed by level; unparseable rows are logged and skipped.
    async fn load_rules(&self, product_id: &ProductId) -> Result<BTreeMap<i64, RewardRule>, EngineError> {
        let mut rules = BTreeMap::new();
        for row in self.repo.list_rebate_configs(product_id).await? {
            match RewardRule::parse(&row.reward) {
                Ok(rule) if row.level >= 1 => {
                    rules.insert(row.level, rule);
                }
                Ok(_) => warn!(config = row.id, level = row.level, "Skipping config with invalid level"),
                Err(e) => warn!(
                    config = row.id,
                    product = %product_id,
                    level = row.level,
                    error = %e,
                    "Skipping unparseable rebate config"
                ),
            }
        }
        Ok(rules)
    }
}
