//! Pending rebates → ledger entries and wallet increments.

use crate::cache::{self, Cache};
use crate::db::{PendingRebates, Repository};
use crate::domain::{Decimal, Rebate, RebateId, TimeMs, UserId, WalletTransaction};
use crate::error::EngineError;
use crate::notify::{self, Notification, Notifier};
use serde::{Deserialize, Serialize};
use sqlx::Acquire;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRebate {
    pub rebate_id: RebateId,
    pub receiver_id: UserId,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub processed: usize,
    pub failed: usize,
    /// Rebates another run finished first.
    pub skipped: usize,
    pub total_credited: Decimal,
    pub processed_rebates: Vec<RebateId>,
    pub failed_rebates: Vec<FailedRebate>,
}

impl ProcessingSummary {
    fn record_failure(&mut self, rebate_id: RebateId, receiver_id: UserId, reason: String) {
        self.failed += 1;
        self.failed_rebates.push(FailedRebate {
            rebate_id,
            receiver_id,
            reason,
        });
    }
}

/// What one receiver's transaction did.
#[derive(Default)]
struct ReceiverOutcome {
    applied: Vec<(Rebate, WalletTransaction)>,
    skipped: usize,
    failed: Vec<(Rebate, String)>,
}

pub struct RebateProcessor {
    repo: Arc<Repository>,
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn Notifier>,
}

impl RebateProcessor {
    pub fn new(repo: Arc<Repository>, cache: Arc<dyn Cache>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            repo,
            cache,
            notifier,
        }
    }

    /// Credit every pending rebate. Safe to re-run: a second call with no new
    /// pending rows processes nothing.
    pub async fn process_pending_rebates(&self) -> Result<ProcessingSummary, EngineError> {
        self.process_pending_rebates_before(None).await
    }

    /// Credit pending rebates created at or before `cutoff` (all when None).
    ///
    /// Each receiver is handled in its own store transaction; inside it every
    /// rebate runs in a savepoint, so one bad rebate only fails itself. A
    /// failure of the shared balance step fails the receiver's whole batch.
    ///
    /// # Errors
    /// Only a failure to load the pending queue is returned; everything after
    /// that is recorded per rebate in the summary.
    pub async fn process_pending_rebates_before(
        &self,
        cutoff: Option<TimeMs>,
    ) -> Result<ProcessingSummary, EngineError> {
        let PendingRebates { rebates, malformed } = self.repo.list_pending_rebates(cutoff).await?;
        let mut summary = ProcessingSummary::default();

        for bad in malformed {
            let reason = format!("malformed rebate row: {}", bad.reason);
            warn!(rebate = %bad.id, error = %bad.reason, "Failing malformed rebate");
            self.record_failure(bad.id, bad.receiver_id, reason, &mut summary).await;
        }

        let mut by_receiver: BTreeMap<UserId, Vec<Rebate>> = BTreeMap::new();
        for rebate in rebates {
            by_receiver
                .entry(rebate.receiver_id.clone())
                .or_default()
                .push(rebate);
        }

        let mut outbox = Vec::new();
        for (receiver, batch) in by_receiver {
            match self.apply_receiver_batch(&receiver, &batch).await {
                Ok(outcome) => {
                    self.finish_receiver(&receiver, outcome, &mut summary, &mut outbox)
                        .await
                }
                Err(e) => {
                    warn!(receiver = %receiver, rebates = batch.len(), error = %e, "Receiver batch failed");
                    let reason = e.to_string();
                    for rebate in batch {
                        self.record_failure(rebate.id, receiver.clone(), reason.clone(), &mut summary)
                            .await;
                    }
                }
            }
        }
        notify::dispatch(&self.notifier, outbox);

        info!(
            processed = summary.processed,
            failed = summary.failed,
            skipped = summary.skipped,
            total = %summary.total_credited,
            cutoff = ?cutoff,
            "Rebate processing finished"
        );
        Ok(summary)
    }

    async fn apply_receiver_batch(
        &self,
        receiver: &UserId,
        rebates: &[Rebate],
    ) -> Result<ReceiverOutcome, EngineError> {
        let processed_at = TimeMs::now();
        let mut outcome = ReceiverOutcome::default();
        let mut tx = self.repo.begin().await?;

        for rebate in rebates {
            let mut savepoint = tx.begin().await?;
            match Repository::apply_rebate(&mut savepoint, rebate, processed_at).await {
                Ok(Some(entry)) => {
                    savepoint.commit().await?;
                    outcome.applied.push((rebate.clone(), entry));
                }
                Ok(None) => {
                    savepoint.rollback().await?;
                    outcome.skipped += 1;
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!(rebate = %rebate.id, receiver = %receiver, error = %e, "Rebate failed");
                    outcome.failed.push((rebate.clone(), e.to_string()));
                }
            }
        }

        if !outcome.applied.is_empty() {
            let total: Decimal = outcome.applied.iter().map(|(r, _)| r.amount).sum();
            if let Err(e) = Repository::increment_wallet_balance(&mut tx, receiver, total).await {
                if let Err(rollback) = tx.rollback().await {
                    warn!(receiver = %receiver, error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn finish_receiver(
        &self,
        receiver: &UserId,
        outcome: ReceiverOutcome,
        summary: &mut ProcessingSummary,
        outbox: &mut Vec<Notification>,
    ) {
        summary.skipped += outcome.skipped;

        for (rebate, reason) in outcome.failed {
            self.record_failure(rebate.id, receiver.clone(), reason, summary)
                .await;
        }

        if outcome.applied.is_empty() {
            return;
        }
        self.cache
            .invalidate_namespace(&cache::subtree_namespace(receiver))
            .await;

        for (rebate, _entry) in outcome.applied {
            summary.processed += 1;
            summary.total_credited += rebate.amount;

            outbox.push(Notification::RebateCredited {
                user_id: receiver.clone(),
                rebate_id: rebate.id.clone(),
                purchase_id: rebate.purchase_id.clone(),
                level: rebate.level,
                amount: rebate.amount,
            });
            summary.processed_rebates.push(rebate.id);
        }
    }

    /// Mark the rebate failed and count it; a row another run already moved
    /// out of pending counts as skipped.
    async fn record_failure(
        &self,
        rebate_id: RebateId,
        receiver_id: UserId,
        reason: String,
        summary: &mut ProcessingSummary,
    ) {
        if self.mark_failed(&rebate_id, &reason).await {
            summary.record_failure(rebate_id, receiver_id, reason);
        } else {
            summary.skipped += 1;
        }
    }

    /// Returns whether the row moved from pending to failed.
    async fn mark_failed(&self, rebate_id: &RebateId, reason: &str) -> bool {
        match self.repo.mark_rebate_failed(rebate_id, reason).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!(rebate = %rebate_id, error = %e, "Could not record rebate failure");
                false
            }
        }
    }
}
