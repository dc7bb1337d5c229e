//! Store-backed services built on the genealogy walkers and the pure engine.

pub mod calculator;
pub mod metrics;
pub mod orchestrator;
pub mod processor;
pub mod rank_engine;

pub use calculator::{RebateCalculator, RebateRequest};
pub use metrics::{MetricsAggregator, PerformanceMetrics};
pub use orchestrator::{CompletePurchase, Orchestrator, PurchaseOutcome};
pub use processor::{FailedRebate, ProcessingSummary, RebateProcessor};
pub use rank_engine::{BatchAdvancementSummary, EligibilityReport, FailedAdvancement, RankEngine};

use crate::cache::Cache;
use crate::config::CompensationConfig;
use crate::db::Repository;
use crate::genealogy::GenealogyService;
use crate::notify::Notifier;
use std::sync::Arc;

/// Every engine service wired over one repository, cache and notifier.
#[derive(Clone)]
pub struct Services {
    pub repo: Arc<Repository>,
    pub genealogy: Arc<GenealogyService>,
    pub calculator: Arc<RebateCalculator>,
    pub processor: Arc<RebateProcessor>,
    pub rank_engine: Arc<RankEngine>,
    pub metrics: Arc<MetricsAggregator>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Services {
    pub fn new(
        repo: Arc<Repository>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn Notifier>,
        config: CompensationConfig,
    ) -> Self {
        let genealogy = Arc::new(GenealogyService::new(
            repo.clone(),
            cache.clone(),
            config.clone(),
        ));
        let calculator = Arc::new(RebateCalculator::new(
            repo.clone(),
            genealogy.clone(),
            config.clone(),
        ));
        let processor = Arc::new(RebateProcessor::new(
            repo.clone(),
            cache.clone(),
            notifier.clone(),
        ));
        let rank_engine = Arc::new(RankEngine::new(
            repo.clone(),
            genealogy.clone(),
            notifier,
        ));
        let metrics = Arc::new(MetricsAggregator::new(
            repo.clone(),
            genealogy.clone(),
            cache,
            config.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            repo.clone(),
            genealogy.clone(),
            calculator.clone(),
            rank_engine.clone(),
            config,
        ));

        Self {
            repo,
            genealogy,
            calculator,
            processor,
            rank_engine,
            metrics,
            orchestrator,
        }
    }
}
