use crate::config::CompensationConfig;
use crate::db::Repository;
use crate::domain::{
    Decimal, ProductId, Purchase, PurchaseId, PurchaseStatus, RankAdvancement, Rebate, TimeMs,
    UserId,
};
use crate::error::EngineError;
use crate::genealogy::GenealogyService;
use crate::orchestration::calculator::{RebateCalculator, RebateRequest};
use crate::orchestration::rank_engine::RankEngine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePurchase {
    /// Caller-supplied id (e.g. the checkout order id); generated when absent.
    #[serde(default)]
    pub purchase_id: Option<PurchaseId>,
    pub buyer_id: UserId,
    pub product_id: ProductId,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOutcome {
    pub purchase: Purchase,
    pub rebates: Vec<Rebate>,
    pub advancements: Vec<RankAdvancement>,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// The purchase-completion flow: record, calculate, invalidate, re-rank.
pub struct Orchestrator {
    repo: Arc<Repository>,
    genealogy: Arc<GenealogyService>,
    calculator: Arc<RebateCalculator>,
    rank_engine: Arc<RankEngine>,
    config: CompensationConfig,
}

impl Orchestrator {
    pub fn new(
        repo: Arc<Repository>,
        genealogy: Arc<GenealogyService>,
        calculator: Arc<RebateCalculator>,
        rank_engine: Arc<RankEngine>,
        config: CompensationConfig,
    ) -> Self {
        Self {
            repo,
            genealogy,
            calculator,
            rank_engine,
            config,
        }
    }

    /// Record a completed purchase and create its pending rebates.
    ///
    /// Rank checks for the buyer and its upline run afterwards and never fail
    /// the call.
    ///
    /// # Errors
    /// `Validation` for a non-positive quantity, `NotFound` for an unknown
    /// buyer or product, `Consistency` for a purchase id already recorded.
    /// A calculation failure is returned after the purchase is stored; the
    /// calculation can be retried for the stored purchase.
    pub async fn complete_purchase(&self, request: &CompletePurchase) -> Result<PurchaseOutcome, EngineError> {
        if request.quantity < 1 {
            return Err(EngineError::Validation("quantity must be at least 1".to_string()));
        }
        self.genealogy.require_user(&request.buyer_id).await?;
        let product = self
            .repo
            .get_product(&request.product_id)
            .await?
            .ok_or_else(|| EngineError::not_found("product", &request.product_id))?;

        let purchase_id = request.purchase_id.clone().unwrap_or_else(PurchaseId::generate);
        if self.repo.get_purchase(&purchase_id).await?.is_some() {
            return Err(EngineError::Consistency(format!(
                "purchase {} already recorded",
                purchase_id
            )));
        }

        let overflow = || {
            EngineError::Validation(format!(
                "purchase total for {} x {} is out of range",
                request.quantity, product.id
            ))
        };
        let total_amount = product
            .price
            .checked_mul(Decimal::from_i64(request.quantity))
            .ok_or_else(overflow)?;
        let total_pv = self
            .config
            .pv_policy
            .total_pv(&product, request.quantity, total_amount)
            .ok_or_else(overflow)?;
        let purchase = Purchase {
            id: purchase_id,
            buyer_id: request.buyer_id.clone(),
            product_id: product.id.clone(),
            quantity: request.quantity,
            total_pv,
            total_amount,
            status: PurchaseStatus::Completed,
            created_at: TimeMs::now(),
        };
        self.repo.insert_purchase(&purchase).await.map_err(|e| {
            if is_unique_violation(&e) {
                EngineError::Consistency(format!("purchase {} already recorded", purchase.id))
            } else {
                EngineError::Store(e)
            }
        })?;
        info!(
            purchase = %purchase.id,
            buyer = %purchase.buyer_id,
            amount = %purchase.total_amount,
            pv = %purchase.total_pv,
            "Purchase completed"
        );

        let rebates = match self
            .calculator
            .calculate_rebates(&RebateRequest::from(&purchase))
            .await
        {
            Ok(rebates) => rebates,
            Err(e) => {
                warn!(purchase = %purchase.id, error = %e, "Rebate calculation failed");
                return Err(e);
            }
        };

        self.genealogy.invalidate_lineage(&purchase.buyer_id).await?;
        let advancements = self.rerank_lineage(&purchase.buyer_id).await;

        Ok(PurchaseOutcome {
            purchase,
            rebates,
            advancements,
        })
    }

    /// Best-effort advancement for the buyer and its upline.
    async fn rerank_lineage(&self, buyer_id: &UserId) -> Vec<RankAdvancement> {
        let mut members = vec![buyer_id.clone()];
        match self
            .genealogy
            .walk_upline(buyer_id, self.config.max_upline_levels)
            .await
        {
            Ok(chain) => members.extend(chain.into_iter().map(|e| e.user.id)),
            Err(e) => warn!(user = %buyer_id, error = %e, "Upline walk for rank checks failed"),
        }

        let mut advancements = Vec::new();
        for member in members {
            match self.rank_engine.process_advancement(&member).await {
                Ok(Some(advancement)) => advancements.push(advancement),
                Ok(None) => {}
                Err(e) => warn!(user = %member, error = %e, "Rank check after purchase failed"),
            }
        }
        advancements
    }
}
