//! Payout configuration, rebate rows and the wallet ledger.

use super::{sum_decimals, Repository};
use crate::domain::{
    Decimal, NewRebate, ProductId, PurchaseId, Rebate, RebateId, RebateStatus, RewardKind,
    RewardRule, TimeMs, TransactionId, TransactionType, UserId, WalletTransaction,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

const REBATE_COLUMNS: &str = "id, purchase_id, receiver_id, generator_id, level, amount, pv_amount, \
     reward_type, status, processed_at, transaction_id, failure_reason, created_at";

/// A payout rule row as stored; `reward` is unvalidated JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRebateConfig {
    pub id: i64,
    pub product_id: ProductId,
    pub level: i64,
    pub reward: String,
}

/// A pending rebate row whose stored values could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRebate {
    pub id: RebateId,
    pub receiver_id: UserId,
    pub reason: String,
}

/// Result of loading the pending queue.
#[derive(Debug, Clone, Default)]
pub struct PendingRebates {
    pub rebates: Vec<Rebate>,
    pub malformed: Vec<MalformedRebate>,
}

fn rebate_from_row(row: &SqliteRow) -> Result<Rebate, String> {
    let id: String = row.get("id");
    let amount: String = row.get("amount");
    let pv_amount: Option<String> = row.get("pv_amount");
    let reward_type: String = row.get("reward_type");
    let status: String = row.get("status");

    Ok(Rebate {
        amount: Decimal::from_str(&amount).map_err(|e| format!("amount {:?}: {}", amount, e))?,
        pv_amount: pv_amount
            .map(|pv| Decimal::from_str(&pv).map_err(|e| format!("pv_amount {:?}: {}", pv, e)))
            .transpose()?,
        reward_type: RewardKind::from_str(&reward_type)?,
        status: RebateStatus::from_str(&status)?,
        purchase_id: PurchaseId::new(row.get::<String, _>("purchase_id")),
        receiver_id: UserId::new(row.get::<String, _>("receiver_id")),
        generator_id: UserId::new(row.get::<String, _>("generator_id")),
        level: row.get("level"),
        processed_at: row.get::<Option<i64>, _>("processed_at").map(TimeMs::new),
        transaction_id: row
            .get::<Option<String>, _>("transaction_id")
            .map(TransactionId::new),
        failure_reason: row.get("failure_reason"),
        created_at: TimeMs::new(row.get("created_at")),
        id: RebateId::new(id),
    })
}

/// Decode rows, dropping (and logging) any that do not parse.
fn decode_rebates(rows: &[SqliteRow]) -> Vec<Rebate> {
    rows.iter()
        .filter_map(|row| match rebate_from_row(row) {
            Ok(rebate) => Some(rebate),
            Err(e) => {
                let id: String = row.get("id");
                warn!(rebate = %id, error = %e, "Skipping undecodable rebate row");
                None
            }
        })
        .collect()
}

impl Repository {
    // =========================================================================
    // Payout configuration
    // =========================================================================

    pub async fn upsert_rebate_config(
        &self,
        product_id: &ProductId,
        level: i64,
        rule: &RewardRule,
    ) -> Result<(), sqlx::Error> {
        self.upsert_rebate_config_raw(product_id, level, &rule.to_json())
            .await
    }

    /// Store a rule without validating it; readers validate on load.
    pub async fn upsert_rebate_config_raw(
        &self,
        product_id: &ProductId,
        level: i64,
        reward: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO rebate_configs (product_id, level, reward)
            VALUES (?, ?, ?)
            ON CONFLICT(product_id, level) DO UPDATE SET reward = excluded.reward
            "#,
        )
        .bind(product_id.as_str())
        .bind(level)
        .bind(reward)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Configured rules for a product, ordered by level.
    pub async fn list_rebate_configs(
        &self,
        product_id: &ProductId,
    ) -> Result<Vec<RawRebateConfig>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, product_id, level, reward FROM rebate_configs WHERE product_id = ? ORDER BY level ASC",
        )
        .bind(product_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| RawRebateConfig {
                id: r.get("id"),
                product_id: ProductId::new(r.get::<String, _>("product_id")),
                level: r.get("level"),
                reward: r.get("reward"),
            })
            .collect())
    }

    // =========================================================================
    // Rebates
    // =========================================================================

    /// Insert all computed rebates for one purchase in a single transaction.
    ///
    /// Rows that already exist for the same (purchase, receiver, level) are
    /// left untouched. Returns every rebate now stored for the purchase.
    ///
    /// # Errors
    /// Any failed insert rolls back the whole batch.
    pub async fn insert_rebates_atomic(
        &self,
        purchase_id: &PurchaseId,
        rebates: &[NewRebate],
    ) -> Result<Vec<Rebate>, sqlx::Error> {
        let created_at = TimeMs::now();
        let mut tx = self.pool.begin().await?;

        for rebate in rebates {
            sqlx::query(
                r#"
                INSERT INTO rebates
                    (id, purchase_id, receiver_id, generator_id, level, amount, pv_amount,
                     reward_type, status, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
                ON CONFLICT(purchase_id, receiver_id, level) DO NOTHING
                "#,
            )
            .bind(RebateId::generate().as_str())
            .bind(rebate.purchase_id.as_str())
            .bind(rebate.receiver_id.as_str())
            .bind(rebate.generator_id.as_str())
            .bind(rebate.level)
            .bind(rebate.amount.to_canonical_string())
            .bind(rebate.pv_amount.map(|pv| pv.to_canonical_string()))
            .bind(rebate.reward_type.as_str())
            .bind(created_at.as_ms())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        self.list_rebates_for_purchase(purchase_id).await
    }

    pub async fn list_rebates_for_purchase(
        &self,
        purchase_id: &PurchaseId,
    ) -> Result<Vec<Rebate>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rebates WHERE purchase_id = ? ORDER BY level ASC",
            REBATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(purchase_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_rebates(&rows))
    }

    pub async fn list_rebates_for_receiver(
        &self,
        receiver_id: &UserId,
        status: Option<RebateStatus>,
    ) -> Result<Vec<Rebate>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rebates WHERE receiver_id = ? AND (? IS NULL OR status = ?) ORDER BY created_at ASC, id ASC",
            REBATE_COLUMNS
        );
        let status = status.map(|s| s.as_str());
        let rows = sqlx::query(&sql)
            .bind(receiver_id.as_str())
            .bind(status)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(decode_rebates(&rows))
    }

    pub async fn get_rebate(&self, rebate_id: &RebateId) -> Result<Option<Rebate>, sqlx::Error> {
        let sql = format!("SELECT {} FROM rebates WHERE id = ?", REBATE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(rebate_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| decode_rebates(std::slice::from_ref(&r))).and_then(|mut v| v.pop()))
    }

    /// The pending queue, oldest first, optionally limited to rows created at
    /// or before `cutoff`. Rows that fail to decode come back in `malformed`.
    pub async fn list_pending_rebates(
        &self,
        cutoff: Option<TimeMs>,
    ) -> Result<PendingRebates, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM rebates WHERE status = 'pending' AND (? IS NULL OR created_at <= ?) ORDER BY created_at ASC, id ASC",
            REBATE_COLUMNS
        );
        let cutoff = cutoff.map(|c| c.as_ms());
        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;

        let mut pending = PendingRebates::default();
        for row in &rows {
            match rebate_from_row(row) {
                Ok(rebate) => pending.rebates.push(rebate),
                Err(reason) => pending.malformed.push(MalformedRebate {
                    id: RebateId::new(row.get::<String, _>("id")),
                    receiver_id: UserId::new(row.get::<String, _>("receiver_id")),
                    reason,
                }),
            }
        }
        Ok(pending)
    }

    /// Mark a pending rebate processed and write its ledger entry.
    ///
    /// Returns `false` without writing anything when the rebate is no longer
    /// pending. Runs on the caller's connection so it joins the caller's
    /// transaction or savepoint.
    pub async fn apply_rebate(
        conn: &mut SqliteConnection,
        rebate: &Rebate,
        processed_at: TimeMs,
    ) -> Result<Option<WalletTransaction>, sqlx::Error> {
        let entry = WalletTransaction {
            id: TransactionId::generate(),
            user_id: rebate.receiver_id.clone(),
            amount: rebate.amount,
            tx_type: TransactionType::Rebate,
            description: format!(
                "Level {} rebate for purchase {}",
                rebate.level, rebate.purchase_id
            ),
            rebate_id: Some(rebate.id.clone()),
            created_at: processed_at,
        };

        let updated = sqlx::query(
            r#"
            UPDATE rebates
            SET status = 'processed', processed_at = ?, transaction_id = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(processed_at.as_ms())
        .bind(entry.id.as_str())
        .bind(rebate.id.as_str())
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        Self::insert_wallet_transaction(conn, &entry).await?;
        Ok(Some(entry))
    }

    /// Record a terminal failure; a rebate that already left `pending` is
    /// not touched.
    pub async fn mark_rebate_failed(
        &self,
        rebate_id: &RebateId,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rebates
            SET status = 'failed', processed_at = ?, failure_reason = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(TimeMs::now().as_ms())
        .bind(reason)
        .bind(rebate_id.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Total of a member's processed rebates.
    pub async fn sum_processed_rebates(&self, receiver_id: &UserId) -> Result<Decimal, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT amount FROM rebates WHERE receiver_id = ? AND status = 'processed'",
        )
        .bind(receiver_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        let amounts: Vec<String> = rows.iter().map(|r| r.get("amount")).collect();
        Ok(sum_decimals(
            amounts.iter().map(String::as_str),
            "amount",
            receiver_id.as_str(),
        ))
    }

    // =========================================================================
    // Wallet ledger
    // =========================================================================

    pub async fn insert_wallet_transaction(
        conn: &mut SqliteConnection,
        entry: &WalletTransaction,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO wallet_transactions (id, user_id, amount, type, description, rebate_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.as_str())
        .bind(entry.user_id.as_str())
        .bind(entry.amount.to_canonical_string())
        .bind(entry.tx_type.as_str())
        .bind(&entry.description)
        .bind(entry.rebate_id.as_ref().map(|r| r.as_str()))
        .bind(entry.created_at.as_ms())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn list_wallet_transactions(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<WalletTransaction>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, amount, type, description, rebate_id, created_at
            FROM wallet_transactions
            WHERE user_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for r in &rows {
            let id: String = r.get("id");
            let amount: String = r.get("amount");
            let tx_type: String = r.get("type");
            let tx_type = match TransactionType::from_str(&tx_type) {
                Ok(t) => t,
                Err(e) => {
                    warn!(transaction = %id, error = %e, "Skipping ledger entry with unknown type");
                    continue;
                }
            };
            entries.push(WalletTransaction {
                amount: super::decimal_or_zero(&amount, "amount", &id),
                tx_type,
                user_id: UserId::new(r.get::<String, _>("user_id")),
                description: r.get("description"),
                rebate_id: r.get::<Option<String>, _>("rebate_id").map(RebateId::new),
                created_at: TimeMs::new(r.get("created_at")),
                id: TransactionId::new(id),
            });
        }
        Ok(entries)
    }

    /// Sum of a member's ledger; equals the wallet balance when consistent.
    pub async fn sum_wallet_transactions(&self, user_id: &UserId) -> Result<Decimal, sqlx::Error> {
        let entries = self.list_wallet_transactions(user_id).await?;
        Ok(entries.iter().map(|e| e.amount).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::{NewUser, Product, Purchase, PurchaseStatus};
    use tempfile::TempDir;

    async fn setup_repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (Repository::new(pool), temp_dir)
    }

    async fn seed_purchase(repo: &Repository) -> (UserId, UserId, PurchaseId) {
        let sponsor = repo.insert_user(&NewUser::new("Sponsor", None)).await.unwrap();
        let buyer = repo
            .insert_user(&NewUser::new("Buyer", Some(sponsor.id.clone())))
            .await
            .unwrap();
        repo.insert_product(&Product {
            id: ProductId::new("kit"),
            name: "Kit".to_string(),
            price: Decimal::from_i64(1000),
            pv_value: Decimal::from_i64(100),
        })
        .await
        .unwrap();
        let purchase_id = PurchaseId::new("order-1");
        repo.insert_purchase(&Purchase {
            id: purchase_id.clone(),
            buyer_id: buyer.id.clone(),
            product_id: ProductId::new("kit"),
            quantity: 1,
            total_amount: Decimal::from_i64(1000),
            total_pv: Decimal::from_i64(100),
            status: PurchaseStatus::Completed,
            created_at: TimeMs::now(),
        })
        .await
        .unwrap();
        (sponsor.id, buyer.id, purchase_id)
    }

    fn new_rebate(purchase: &PurchaseId, receiver: &UserId, generator: &UserId) -> NewRebate {
        NewRebate {
            purchase_id: purchase.clone(),
            receiver_id: receiver.clone(),
            generator_id: generator.clone(),
            level: 1,
            amount: Decimal::from_i64(100),
            pv_amount: None,
            reward_type: RewardKind::Percentage,
        }
    }

    #[tokio::test]
    async fn test_insert_rebates_is_idempotent() {
        let (repo, _temp) = setup_repo().await;
        let (sponsor, buyer, purchase) = seed_purchase(&repo).await;
        let rows = vec![new_rebate(&purchase, &sponsor, &buyer)];

        let first = repo.insert_rebates_atomic(&purchase, &rows).await.unwrap();
        let second = repo.insert_rebates_atomic(&purchase, &rows).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
        assert_eq!(first[0].status, RebateStatus::Pending);
    }

    #[tokio::test]
    async fn test_apply_rebate_only_once() {
        let (repo, _temp) = setup_repo().await;
        let (sponsor, buyer, purchase) = seed_purchase(&repo).await;
        let rebate = repo
            .insert_rebates_atomic(&purchase, &[new_rebate(&purchase, &sponsor, &buyer)])
            .await
            .unwrap()
            .remove(0);

        let mut conn = repo.pool().acquire().await.unwrap();
        let entry = Repository::apply_rebate(&mut conn, &rebate, TimeMs::now())
            .await
            .unwrap();
        assert!(entry.is_some());
        let again = Repository::apply_rebate(&mut conn, &rebate, TimeMs::now())
            .await
            .unwrap();
        assert!(again.is_none());

        let stored = repo.get_rebate(&rebate.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RebateStatus::Processed);
        assert!(stored.processed_at.is_some());
        assert_eq!(stored.transaction_id, entry.map(|e| e.id));
        assert!(!repo.mark_rebate_failed(&rebate.id, "late").await.unwrap());
    }

    #[tokio::test]
    async fn test_pending_queue_separates_malformed_rows() {
        let (repo, _temp) = setup_repo().await;
        let (sponsor, buyer, purchase) = seed_purchase(&repo).await;
        repo.insert_rebates_atomic(&purchase, &[new_rebate(&purchase, &sponsor, &buyer)])
            .await
            .unwrap();
        sqlx::query(
            r#"
            INSERT INTO rebates (id, purchase_id, receiver_id, generator_id, level, amount,
                                 reward_type, status, created_at)
            VALUES ('broken', ?, ?, ?, 2, 'lots', 'fixed', 'pending', 0)
            "#,
        )
        .bind(purchase.as_str())
        .bind(sponsor.as_str())
        .bind(buyer.as_str())
        .execute(repo.pool())
        .await
        .unwrap();

        let pending = repo.list_pending_rebates(None).await.unwrap();
        assert_eq!(pending.rebates.len(), 1);
        assert_eq!(pending.malformed.len(), 1);
        assert_eq!(pending.malformed[0].id, RebateId::new("broken"));

        let before_cutoff = repo.list_pending_rebates(Some(TimeMs::new(0))).await.unwrap();
        assert!(before_cutoff.rebates.is_empty());
        assert_eq!(before_cutoff.malformed.len(), 1);
    }

    #[tokio::test]
    async fn test_rebate_config_upsert_replaces_rule() {
        let (repo, _temp) = setup_repo().await;
        seed_purchase(&repo).await;
        let kit = ProductId::new("kit");
        repo.upsert_rebate_config(
            &kit,
            1,
            &RewardRule::Percentage {
                percentage: Decimal::from_i64(10),
            },
        )
        .await
        .unwrap();
        repo.upsert_rebate_config(
            &kit,
            1,
            &RewardRule::Fixed {
                amount: Decimal::from_i64(5),
            },
        )
        .await
        .unwrap();
        repo.upsert_rebate_config_raw(&kit, 2, "{broken").await.unwrap();

        let configs = repo.list_rebate_configs(&kit).await.unwrap();
        assert_eq!(configs.len(), 2);
        assert_eq!(
            RewardRule::parse(&configs[0].reward).unwrap(),
            RewardRule::Fixed {
                amount: Decimal::from_i64(5)
            }
        );
        assert!(RewardRule::parse(&configs[1].reward).is_err());
    }
}
