//! Pure computation for the compensation plan: no store access, no caching.

pub mod activity;
pub mod multiplier;
pub mod payout;
pub mod requirements;

pub use activity::{ActivityInputs, ActivityModel, WeightedTargets};
pub use multiplier::{MultiplierTier, RankMultiplierTable};
pub use payout::{Payout, PayoutError, PurchaseBasis, RebateStrategy};
pub use requirements::{RequirementBreakdown, RequirementCheck};
