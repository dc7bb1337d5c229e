pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod genealogy;
pub mod notify;
pub mod orchestration;

pub use cache::{Cache, MemoryCache, NoCache};
pub use config::{CompensationConfig, Config};
pub use db::{init_db, Repository};
pub use domain::{
    Decimal, NewUser, Position, Purchase, PurchaseId, Rank, RankId, Rebate, RebateStatus, TimeMs,
    User, UserId,
};
pub use error::{AppError, EngineError};
pub use genealogy::GenealogyService;
pub use notify::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use orchestration::Services;
