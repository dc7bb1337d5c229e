//! Rank-based payout multipliers.

use crate::domain::{Decimal, Rank};
use std::str::FromStr;

/// One step of the multiplier table: ranks at or above `min_level` earn
/// `multiplier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplierTier {
    pub min_level: i64,
    pub multiplier: Decimal,
}

/// Step function from rank level to payout multiplier.
///
/// Tiers are kept sorted by `min_level`; the highest tier whose threshold is
/// reached wins. Members below every tier (or without a rank) get 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankMultiplierTable {
    tiers: Vec<MultiplierTier>,
}

impl RankMultiplierTable {
    pub fn new(mut tiers: Vec<MultiplierTier>) -> Self {
        tiers.sort_by_key(|t| t.min_level);
        Self { tiers }
    }

    /// A table that never boosts payouts.
    pub fn flat() -> Self {
        Self { tiers: Vec::new() }
    }

    /// Parse `"<level>:<multiplier>"` pairs separated by commas, e.g. `"4:1.2,6:1.5"`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let mut tiers = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (level, multiplier) = part
                .split_once(':')
                .ok_or_else(|| format!("expected <level>:<multiplier>, got {}", part))?;
            let min_level = level
                .trim()
                .parse::<i64>()
                .map_err(|_| format!("invalid rank level in {}", part))?;
            let multiplier = Decimal::from_str(multiplier.trim())
                .map_err(|_| format!("invalid multiplier in {}", part))?;
            if !multiplier.is_positive() {
                return Err(format!("multiplier must be positive in {}", part));
            }
            tiers.push(MultiplierTier {
                min_level,
                multiplier,
            });
        }
        Ok(Self::new(tiers))
    }

    pub fn tiers(&self) -> &[MultiplierTier] {
        &self.tiers
    }

    /// Multiplier for a bare rank level.
    pub fn for_level(&self, level: i64) -> Decimal {
        self.tiers
            .iter()
            .rev()
            .find(|t| level >= t.min_level)
            .map(|t| t.multiplier)
            .unwrap_or_else(Decimal::one)
    }

    /// Multiplier for a member's rank; a rank's own `benefit_multiplier`
    /// takes precedence over the table.
    pub fn for_rank(&self, rank: Option<&Rank>) -> Decimal {
        match rank {
            Some(Rank {
                benefit_multiplier: Some(m),
                ..
            }) => *m,
            Some(rank) => self.for_level(rank.level),
            None => Decimal::one(),
        }
    }
}

impl Default for RankMultiplierTable {
    fn default() -> Self {
        Self::new(vec![MultiplierTier {
            min_level: 4,
            multiplier: Decimal::from_str("1.2").unwrap_or_else(|_| Decimal::one()),
        }])
    }
}
