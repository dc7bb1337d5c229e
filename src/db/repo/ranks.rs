//! Rank tiers, requirements and advancement audit rows.

use super::{decimal_or_zero, Repository, IN_CHUNK};
use crate::domain::{
    Decimal, Rank, RankAdvancement, RankId, RankMetricsSnapshot, RankRequirement, TimeMs, UserId,
};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;
use tracing::warn;

fn rank_from_row(row: &SqliteRow) -> Rank {
    let id: String = row.get("id");
    let multiplier: Option<String> = row.get("benefit_multiplier");
    Rank {
        benefit_multiplier: multiplier.and_then(|m| {
            Decimal::from_str(&m)
                .map_err(|e| warn!(rank = %id, error = %e, "Ignoring unparseable benefit multiplier"))
                .ok()
        }),
        name: row.get("name"),
        level: row.get("level"),
        id: RankId::new(id),
    }
}

impl Repository {
    pub async fn insert_rank(&self, rank: &Rank) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO ranks (id, name, level, benefit_multiplier) VALUES (?, ?, ?, ?)")
            .bind(rank.id.as_str())
            .bind(&rank.name)
            .bind(rank.level)
            .bind(rank.benefit_multiplier.map(|m| m.to_canonical_string()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// All tiers, lowest level first.
    pub async fn list_ranks(&self) -> Result<Vec<Rank>, sqlx::Error> {
        let rows = sqlx::query("SELECT id, name, level, benefit_multiplier FROM ranks ORDER BY level ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(rank_from_row).collect())
    }

    pub async fn get_rank(&self, rank_id: &RankId) -> Result<Option<Rank>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, level, benefit_multiplier FROM ranks WHERE id = ?")
            .bind(rank_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(rank_from_row))
    }

    /// The tier immediately above `level` (the lowest tier when `level` is None).
    pub async fn next_rank_after(&self, level: Option<i64>) -> Result<Option<Rank>, sqlx::Error> {
        let row = match level {
            Some(level) => {
                sqlx::query(
                    "SELECT id, name, level, benefit_multiplier FROM ranks WHERE level > ? ORDER BY level ASC LIMIT 1",
                )
                .bind(level)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, name, level, benefit_multiplier FROM ranks ORDER BY level ASC LIMIT 1",
                )
                .fetch_optional(&self.pool)
                .await?
            }
        };
        Ok(row.as_ref().map(rank_from_row))
    }

    pub async fn upsert_requirement(&self, req: &RankRequirement) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO rank_requirements
                (rank_id, min_personal_sales, min_group_sales, min_direct_downline,
                 min_qualified_downline, qualified_rank_level)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(rank_id) DO UPDATE SET
                min_personal_sales = excluded.min_personal_sales,
                min_group_sales = excluded.min_group_sales,
                min_direct_downline = excluded.min_direct_downline,
                min_qualified_downline = excluded.min_qualified_downline,
                qualified_rank_level = excluded.qualified_rank_level
            "#,
        )
        .bind(req.rank_id.as_str())
        .bind(req.min_personal_sales.to_canonical_string())
        .bind(req.min_group_sales.to_canonical_string())
        .bind(req.min_direct_downline)
        .bind(req.min_qualified_downline)
        .bind(req.qualified_rank_level)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_requirement(
        &self,
        rank_id: &RankId,
    ) -> Result<Option<RankRequirement>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT rank_id, min_personal_sales, min_group_sales, min_direct_downline,
                   min_qualified_downline, qualified_rank_level
            FROM rank_requirements WHERE rank_id = ?
            "#,
        )
        .bind(rank_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let key = rank_id.as_str();
            let personal: String = r.get("min_personal_sales");
            let group: String = r.get("min_group_sales");
            RankRequirement {
                rank_id: rank_id.clone(),
                min_personal_sales: decimal_or_zero(&personal, "min_personal_sales", key),
                min_group_sales: decimal_or_zero(&group, "min_group_sales", key),
                min_direct_downline: r.get("min_direct_downline"),
                min_qualified_downline: r.get("min_qualified_downline"),
                qualified_rank_level: r.get("qualified_rank_level"),
            }
        }))
    }

    /// How many of `ids` hold a rank at or above `level`.
    pub async fn count_at_or_above_level(
        &self,
        ids: &[UserId],
        level: i64,
    ) -> Result<i64, sqlx::Error> {
        let mut total = 0i64;
        for chunk in ids.chunks(IN_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT COUNT(*) AS cnt FROM users u JOIN ranks r ON r.id = u.rank_id WHERE r.level >= ",
            );
            qb.push_bind(level);
            qb.push(" AND u.id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.0.clone());
            }
            qb.push(")");
            let row = qb.build().fetch_one(&self.pool).await?;
            total += row.get::<i64, _>("cnt");
        }
        Ok(total)
    }

    /// Move a member from `previous` to `new_rank` and write the audit row,
    /// both in one transaction.
    ///
    /// Returns `None` when the member's rank no longer equals `previous`
    /// (another advancement won the race); nothing is written in that case.
    pub async fn apply_rank_advancement(
        &self,
        user_id: &UserId,
        previous: Option<&RankId>,
        new_rank: &RankId,
        snapshot: &RankMetricsSnapshot,
    ) -> Result<Option<RankAdvancement>, sqlx::Error> {
        let created_at = TimeMs::now();
        let snapshot_json = serde_json::to_string(snapshot)
            .map_err(|e| sqlx::Error::Protocol(format!("snapshot encode failed: {}", e)))?;

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE users SET rank_id = ? WHERE id = ? AND rank_id IS ?")
            .bind(new_rank.as_str())
            .bind(user_id.as_str())
            .bind(previous.map(|r| r.as_str()))
            .execute(&mut *tx)
            .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let result = sqlx::query(
            r#"
            INSERT INTO rank_advancements (user_id, previous_rank_id, new_rank_id, snapshot, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(user_id.as_str())
        .bind(previous.map(|r| r.as_str()))
        .bind(new_rank.as_str())
        .bind(&snapshot_json)
        .bind(created_at.as_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(RankAdvancement {
            id: result.last_insert_rowid(),
            user_id: user_id.clone(),
            previous_rank_id: previous.cloned(),
            new_rank_id: new_rank.clone(),
            snapshot: snapshot.clone(),
            created_at,
        }))
    }

    /// A member's advancement history, oldest first.
    pub async fn list_rank_advancements(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<RankAdvancement>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, previous_rank_id, new_rank_id, snapshot, created_at
            FROM rank_advancements
            WHERE user_id = ?
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| {
                let id: i64 = r.get("id");
                let raw: String = r.get("snapshot");
                let snapshot = serde_json::from_str(&raw).unwrap_or_else(|e| {
                    warn!(advancement = id, error = %e, "Unreadable advancement snapshot");
                    RankMetricsSnapshot::default()
                });
                RankAdvancement {
                    id,
                    user_id: UserId::new(r.get::<String, _>("user_id")),
                    previous_rank_id: r.get::<Option<String>, _>("previous_rank_id").map(RankId::new),
                    new_rank_id: RankId::new(r.get::<String, _>("new_rank_id")),
                    snapshot,
                    created_at: TimeMs::new(r.get("created_at")),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use crate::domain::NewUser;
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

    fn rank(id: &str, level: i64) -> Rank {
        Rank {
            id: RankId::new(id),
            name: id.to_uppercase(),
            level,
            benefit_multiplier: None,
        }
    }

    #[tokio::test]
    async fn test_next_rank_after() {
        let (repo, _temp) = setup_repo().await;
        repo.insert_rank(&rank("silver", 2)).await.unwrap();
        repo.insert_rank(&rank("bronze", 1)).await.unwrap();

        let first = repo.next_rank_after(None).await.unwrap().unwrap();
        assert_eq!(first.id, RankId::new("bronze"));
        let second = repo.next_rank_after(Some(1)).await.unwrap().unwrap();
        assert_eq!(second.id, RankId::new("silver"));
        assert!(repo.next_rank_after(Some(2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_apply_rank_advancement_is_guarded_by_previous_rank() {
        let (repo, _temp) = setup_repo().await;
        repo.insert_rank(&rank("bronze", 1)).await.unwrap();
        repo.insert_rank(&rank("silver", 2)).await.unwrap();
        let user = repo.insert_user(&NewUser::new("Ann", None)).await.unwrap();

        let snapshot = RankMetricsSnapshot {
            direct_downline: 3,
            ..Default::default()
        };
        let adv = repo
            .apply_rank_advancement(&user.id, None, &RankId::new("bronze"), &snapshot)
            .await
            .unwrap()
            .expect("first advancement applies");
        assert_eq!(adv.previous_rank_id, None);

        // Stale previous rank: no-op.
        let stale = repo
            .apply_rank_advancement(&user.id, None, &RankId::new("silver"), &snapshot)
            .await
            .unwrap();
        assert!(stale.is_none());

        let history = repo.list_rank_advancements(&user.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].snapshot.direct_downline, 3);
        let stored = repo.get_user(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.rank_id, Some(RankId::new("bronze")));
    }

    #[tokio::test]
    async fn test_requirement_upsert_roundtrip() {
        let (repo, _temp) = setup_repo().await;
        repo.insert_rank(&rank("bronze", 1)).await.unwrap();
        let mut req = RankRequirement {
            rank_id: RankId::new("bronze"),
            min_personal_sales: Decimal::from_i64(100),
            min_group_sales: Decimal::from_i64(1000),
            min_direct_downline: 5,
            min_qualified_downline: 0,
            qualified_rank_level: 0,
        };
        repo.upsert_requirement(&req).await.unwrap();
        req.min_direct_downline = 3;
        repo.upsert_requirement(&req).await.unwrap();

        let stored = repo.get_requirement(&RankId::new("bronze")).await.unwrap();
        assert_eq!(stored, Some(req));
    }
}
