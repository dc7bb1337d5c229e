//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `users.rs` - Sponsorship tree reads/writes and wallet balances
//! - `ranks.rs` - Rank tiers, requirements and advancements
//! - `sales.rs` - Products and purchases
//! - `rebates.rs` - Payout configuration, rebates and the wallet ledger

mod ranks;
mod rebates;
mod sales;
mod users;

pub use rebates::{MalformedRebate, PendingRebates, RawRebateConfig};
pub use users::{ChildFilter, ChildSort, SortField, SortOrder};

use crate::domain::{Decimal, UserId};
use crate::error::EngineError;
use sqlx::sqlite::{Sqlite, SqliteConnection, SqlitePool};
use sqlx::{Row, Transaction};
use std::str::FromStr;
use tracing::warn;

/// Upper bound on bound parameters per `IN (...)` list.
pub(crate) const IN_CHUNK: usize = 500;

/// Attempts for the compare-and-set balance increment before giving up.
const BALANCE_CAS_ATTEMPTS: usize = 5;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Open a store transaction; nested `begin()` calls on it are savepoints.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Add `delta` to a member's wallet balance and return the new balance.
    ///
    /// Implemented as a compare-and-set on the stored balance, so two writers
    /// can never lose each other's increment. Callers run this in the same
    /// transaction that writes the matching ledger entries.
    pub async fn increment_wallet_balance(
        conn: &mut SqliteConnection,
        user_id: &UserId,
        delta: Decimal,
    ) -> Result<Decimal, EngineError> {
        for _ in 0..BALANCE_CAS_ATTEMPTS {
            let row = sqlx::query("SELECT wallet_balance FROM users WHERE id = ?")
                .bind(user_id.as_str())
                .fetch_optional(&mut *conn)
                .await?
                .ok_or_else(|| EngineError::not_found("user", user_id))?;
            let observed: String = row.get("wallet_balance");
            let current = Decimal::from_str(&observed).map_err(|e| {
                EngineError::Consistency(format!(
                    "wallet balance of {} is not a decimal ({}): {}",
                    user_id, observed, e
                ))
            })?;
            let updated = current + delta;

            let result = sqlx::query(
                "UPDATE users SET wallet_balance = ? WHERE id = ? AND wallet_balance = ?",
            )
            .bind(updated.to_canonical_string())
            .bind(user_id.as_str())
            .bind(&observed)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 1 {
                return Ok(updated);
            }
        }

        Err(EngineError::Consistency(format!(
            "wallet balance of {} kept changing during increment",
            user_id
        )))
    }
}

/// Parse a stored decimal, logging and defaulting to zero on corruption.
pub(crate) fn decimal_or_zero(raw: &str, field: &str, key: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(
            key = %key,
            field = %field,
            value = %raw,
            error = %e,
            "Failed to parse stored decimal, using zero"
        );
        Decimal::zero()
    })
}

/// Sum stored decimal strings in Rust; SQLite's SUM would go through REAL.
pub(crate) fn sum_decimals<'a>(
    values: impl IntoIterator<Item = &'a str>,
    field: &str,
    key: &str,
) -> Decimal {
    values
        .into_iter()
        .map(|v| decimal_or_zero(v, field, key))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::NewUser;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    #[tokio::test]
    async fn test_increment_wallet_balance_accumulates() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.insert_user(&NewUser::new("Ann", None)).await.unwrap();

        let mut conn = repo.pool().acquire().await.unwrap();
        Repository::increment_wallet_balance(&mut conn, &user.id, Decimal::from_i64(100))
            .await
            .unwrap();
        let balance =
            Repository::increment_wallet_balance(&mut conn, &user.id, Decimal::from_i64(50))
                .await
                .unwrap();
        assert_eq!(balance, Decimal::from_i64(150));

        let stored = repo.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.wallet_balance, Decimal::from_i64(150));
    }

    #[tokio::test]
    async fn test_increment_wallet_balance_unknown_user() {
        let (repo, _temp) = setup_repo().await;
        let mut conn = repo.pool().acquire().await.unwrap();
        let err = Repository::increment_wallet_balance(
            &mut conn,
            &UserId::new("ghost"),
            Decimal::one(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let (repo, _temp) = setup_repo().await;
        let user = repo.insert_user(&NewUser::new("Ann", None)).await.unwrap();

        let tasks = (0..10).map(|_| {
            let repo = repo.clone();
            let user_id = user.id.clone();
            async move {
                let mut tx = repo.begin().await?;
                Repository::increment_wallet_balance(&mut tx, &user_id, Decimal::from_i64(10))
                    .await?;
                tx.commit().await?;
                Ok::<_, EngineError>(())
            }
        });
        let results = futures::future::join_all(tasks).await;
        let succeeded = results.iter().filter(|r| r.is_ok()).count();

        let stored = repo.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(
            stored.wallet_balance,
            Decimal::from_i64(10 * succeeded as i64)
        );
    }

    #[test]
    fn test_sum_decimals_skips_corrupt_values() {
        let total = sum_decimals(["1.5", "oops", "2.5"], "amount", "test");
        assert_eq!(total, Decimal::from_i64(4));
    }
}
