use crate::domain::{Decimal, PvPolicy};
use crate::engine::{ActivityModel, RankMultiplierTable, RebateStrategy};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub compensation: CompensationConfig,
    pub rebate_process_interval: Option<Duration>,
    pub notify_webhook_url: Option<String>,
}

/// Resolved plan settings handed to every engine entry point.
///
/// Nothing below the service constructors reads the environment; tests build
/// this directly.
#[derive(Debug, Clone, PartialEq)]
pub struct CompensationConfig {
    pub max_upline_levels: usize,
    pub max_genealogy_depth: usize,
    pub tree_batch_size: usize,
    pub rank_multipliers: RankMultiplierTable,
    pub rebate_strategy: RebateStrategy,
    pub pv_policy: PvPolicy,
    pub activity_model: ActivityModel,
    pub cache_ttl: Duration,
    pub metrics_cache_ttl: Duration,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            max_upline_levels: 10,
            max_genealogy_depth: 10,
            tree_batch_size: 100,
            rank_multipliers: RankMultiplierTable::default(),
            rebate_strategy: RebateStrategy::AmountBased,
            pv_policy: PvPolicy::FixedPerProduct,
            activity_model: ActivityModel::default(),
            cache_ttl: Duration::from_secs(300),
            metrics_cache_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = CompensationConfig::default();

        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let max_upline_levels = parse_positive(&env_map, "MAX_UPLINE_LEVELS", defaults.max_upline_levels)?;
        let max_genealogy_depth =
            parse_positive(&env_map, "MAX_GENEALOGY_DEPTH", defaults.max_genealogy_depth)?;
        let tree_batch_size = parse_positive(&env_map, "TREE_BATCH_SIZE", defaults.tree_batch_size)?;

        let rank_multipliers = match env_map.get("RANK_MULTIPLIERS") {
            Some(spec) => RankMultiplierTable::parse(spec)
                .map_err(|e| ConfigError::InvalidValue("RANK_MULTIPLIERS".to_string(), e))?,
            None => defaults.rank_multipliers,
        };

        let rebate_strategy = match env_map.get("REBATE_STRATEGY") {
            Some(s) => RebateStrategy::from_str(s)
                .map_err(|e| ConfigError::InvalidValue("REBATE_STRATEGY".to_string(), e))?,
            None => defaults.rebate_strategy,
        };

        let pv_policy = match env_map.get("PV_POLICY") {
            Some(s) => parse_pv_policy(s)?,
            None => defaults.pv_policy,
        };

        let activity_model = match env_map.get("ACTIVITY_MODEL") {
            Some(s) => ActivityModel::from_str(s)
                .map_err(|e| ConfigError::InvalidValue("ACTIVITY_MODEL".to_string(), e))?,
            None => defaults.activity_model,
        };

        let cache_ttl = Duration::from_secs(parse_or(
            &env_map,
            "CACHE_TTL_SECS",
            defaults.cache_ttl.as_secs(),
            "must be a whole number of seconds",
        )?);
        let metrics_cache_ttl = Duration::from_secs(parse_or(
            &env_map,
            "METRICS_CACHE_TTL_SECS",
            defaults.metrics_cache_ttl.as_secs(),
            "must be a whole number of seconds",
        )?);

        let rebate_process_interval = match env_map.get("REBATE_PROCESS_INTERVAL_SECS") {
            Some(s) => {
                let secs = s.parse::<u64>().ok().filter(|v| *v > 0).ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "REBATE_PROCESS_INTERVAL_SECS".to_string(),
                        "must be a positive number of seconds".to_string(),
                    )
                })?;
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        let notify_webhook_url = env_map
            .get("NOTIFY_WEBHOOK_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            port,
            database_path,
            compensation: CompensationConfig {
                max_upline_levels,
                max_genealogy_depth,
                tree_batch_size,
                rank_multipliers,
                rebate_strategy,
                pv_policy,
                activity_model,
                cache_ttl,
                metrics_cache_ttl,
            },
            rebate_process_interval,
            notify_webhook_url,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    message: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), message.to_string())),
        None => Ok(default),
    }
}

fn parse_positive(
    env_map: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_or(env_map, key, default, "must be a positive integer")?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be a positive integer".to_string(),
        ));
    }
    Ok(value)
}

/// `fixed` or `percentage:<n>`.
fn parse_pv_policy(raw: &str) -> Result<PvPolicy, ConfigError> {
    let invalid = |detail: &str| {
        ConfigError::InvalidValue(
            "PV_POLICY".to_string(),
            format!("must be fixed or percentage:<n>, {}", detail),
        )
    };
    match raw.trim() {
        "fixed" => Ok(PvPolicy::FixedPerProduct),
        other => match other.split_once(':') {
            Some(("percentage", pct)) => {
                let pct = Decimal::from_str(pct).map_err(|_| invalid("percentage is not a number"))?;
                if pct.is_negative() {
                    return Err(invalid("percentage must not be negative"));
                }
                Ok(PvPolicy::PercentageOfPrice(pct))
            }
            _ => Err(invalid(&format!("got {}", other))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.compensation, CompensationConfig::default());
        assert!(config.rebate_process_interval.is_none());
        assert!(config.notify_webhook_url.is_none());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_port() {
        let mut env_map = setup_required_env();
        env_map.insert("PORT".to_string(), "not_a_number".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PORT"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("TREE_BATCH_SIZE".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "TREE_BATCH_SIZE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_plan_overrides() {
        let mut env_map = setup_required_env();
        env_map.insert("MAX_UPLINE_LEVELS".to_string(), "6".to_string());
        env_map.insert("RANK_MULTIPLIERS".to_string(), "3:1.1,5:1.3".to_string());
        env_map.insert("REBATE_STRATEGY".to_string(), "pv".to_string());
        env_map.insert("PV_POLICY".to_string(), "percentage:40".to_string());
        env_map.insert("ACTIVITY_MODEL".to_string(), "weighted".to_string());
        env_map.insert("REBATE_PROCESS_INTERVAL_SECS".to_string(), "60".to_string());

        let config = Config::from_env_map(env_map).unwrap();
        let plan = &config.compensation;
        assert_eq!(plan.max_upline_levels, 6);
        assert_eq!(plan.rank_multipliers.tiers().len(), 2);
        assert_eq!(plan.rebate_strategy, RebateStrategy::PvBased);
        assert_eq!(
            plan.pv_policy,
            PvPolicy::PercentageOfPrice(Decimal::from_i64(40))
        );
        assert!(matches!(plan.activity_model, ActivityModel::Weighted(_)));
        assert_eq!(config.rebate_process_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_invalid_pv_policy() {
        let mut env_map = setup_required_env();
        env_map.insert("PV_POLICY".to_string(), "percentage:abc".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PV_POLICY"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_rank_multipliers() {
        let mut env_map = setup_required_env();
        env_map.insert("RANK_MULTIPLIERS".to_string(), "gold:2".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "RANK_MULTIPLIERS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_invalid_process_interval() {
        let mut env_map = setup_required_env();
        env_map.insert("REBATE_PROCESS_INTERVAL_SECS".to_string(), "0".to_string());
        assert!(Config::from_env_map(env_map).is_err());
    }
}
