//! Sponsorship tree operations.

use super::{decimal_or_zero, Repository, IN_CHUNK};
use crate::domain::{NewUser, Position, RankId, TimeMs, User, UserId};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

const USER_COLUMNS: &str =
    "u.id, u.name, u.email, u.rank_id, u.upline_id, u.position, u.wallet_balance, u.created_at";

/// Filters applied to a member's direct children.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFilter {
    pub rank_id: Option<RankId>,
    pub joined_after: Option<TimeMs>,
    pub joined_before: Option<TimeMs>,
    /// Case-insensitive substring match on the member name.
    pub search: Option<String>,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    #[default]
    JoinDate,
    Name,
    Rank,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildSort {
    pub field: SortField,
    pub order: SortOrder,
}

impl ChildSort {
    fn order_by(&self) -> String {
        let dir = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let column = match self.field {
            SortField::JoinDate => "u.created_at",
            SortField::Name => "u.name COLLATE NOCASE",
            SortField::Rank => "COALESCE(r.level, 0)",
        };
        format!(" ORDER BY {} {}, u.id ASC", column, dir)
    }
}

fn user_from_row(row: &SqliteRow) -> User {
    let id: String = row.get("id");
    let position: Option<String> = row.get("position");
    let balance: String = row.get("wallet_balance");
    User {
        position: position.and_then(|p| {
            Position::from_str(&p)
                .map_err(|e| warn!(user = %id, error = %e, "Ignoring unknown binary position"))
                .ok()
        }),
        wallet_balance: decimal_or_zero(&balance, "wallet_balance", &id),
        name: row.get("name"),
        email: row.get("email"),
        rank_id: row.get::<Option<String>, _>("rank_id").map(RankId::new),
        upline_id: row.get::<Option<String>, _>("upline_id").map(UserId::new),
        created_at: TimeMs::new(row.get("created_at")),
        id: UserId::new(id),
    }
}

/// Make `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ChildFilter) {
    if let Some(rank_id) = &filter.rank_id {
        qb.push(" AND u.rank_id = ").push_bind(rank_id.0.clone());
    }
    if let Some(after) = filter.joined_after {
        qb.push(" AND u.created_at >= ").push_bind(after.as_ms());
    }
    if let Some(before) = filter.joined_before {
        qb.push(" AND u.created_at <= ").push_bind(before.as_ms());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND u.name LIKE ")
            .push_bind(format!("%{}%", escape_like(search)))
            .push(" ESCAPE '\\'");
    }
    if let Some(position) = filter.position {
        qb.push(" AND u.position = ").push_bind(position.as_str());
    }
}

impl Repository {
    // =========================================================================
    // Member writes
    // =========================================================================

    /// Insert a new member with a fresh id and zero balance.
    ///
    /// # Errors
    /// Returns an error if the insert fails (unknown sponsor, taken binary slot).
    pub async fn insert_user(&self, new_user: &NewUser) -> Result<User, sqlx::Error> {
        let user = User {
            id: UserId::generate(),
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            rank_id: new_user.rank_id.clone(),
            upline_id: new_user.upline_id.clone(),
            position: new_user.position,
            wallet_balance: crate::domain::Decimal::zero(),
            created_at: TimeMs::now(),
        };
        self.insert_user_record(&user).await?;
        Ok(user)
    }

    /// Insert a fully specified member row (imports, fixtures).
    pub async fn insert_user_record(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users (id, name, email, rank_id, upline_id, position, wallet_balance, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(user.id.as_str())
        .bind(&user.name)
        .bind(user.email.as_deref())
        .bind(user.rank_id.as_ref().map(|r| r.as_str()))
        .bind(user.upline_id.as_ref().map(|u| u.as_str()))
        .bind(user.position.map(|p| p.as_str()))
        .bind(user.wallet_balance.to_canonical_string())
        .bind(user.created_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Point a member at a new sponsor (or detach it when `upline_id` is None).
    pub async fn set_upline(
        &self,
        user_id: &UserId,
        upline_id: Option<&UserId>,
        position: Option<Position>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET upline_id = ?, position = ? WHERE id = ?")
            .bind(upline_id.map(|u| u.as_str()))
            .bind(position.map(|p| p.as_str()))
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Member reads
    // =========================================================================

    pub async fn get_user(&self, user_id: &UserId) -> Result<Option<User>, sqlx::Error> {
        let sql = format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row))
    }

    /// Fetch many members; missing ids are silently absent from the result.
    pub async fn get_users_by_ids(&self, ids: &[UserId]) -> Result<Vec<User>, sqlx::Error> {
        let mut users = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(IN_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!(
                "SELECT {} FROM users u WHERE u.id IN (",
                USER_COLUMNS
            ));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.0.clone());
            }
            qb.push(")");
            let rows = qb.build().fetch_all(&self.pool).await?;
            users.extend(rows.iter().map(user_from_row));
        }
        Ok(users)
    }

    pub async fn all_user_ids(&self) -> Result<Vec<UserId>, sqlx::Error> {
        let rows = sqlx::query("SELECT id FROM users ORDER BY created_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| UserId::new(r.get::<String, _>("id")))
            .collect())
    }

    /// One page of a member's direct children.
    pub async fn list_children(
        &self,
        parent_id: &UserId,
        filter: &ChildFilter,
        sort: &ChildSort,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, sqlx::Error> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {} FROM users u LEFT JOIN ranks r ON r.id = u.rank_id WHERE u.upline_id = ",
            USER_COLUMNS
        ));
        qb.push_bind(parent_id.0.clone());
        push_filter(&mut qb, filter);
        qb.push(sort.order_by());
        qb.push(" LIMIT ").push_bind(limit);
        qb.push(" OFFSET ").push_bind(offset);

        let rows = qb.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    pub async fn count_children(
        &self,
        parent_id: &UserId,
        filter: &ChildFilter,
    ) -> Result<i64, sqlx::Error> {
        let mut qb =
            QueryBuilder::<Sqlite>::new("SELECT COUNT(*) AS cnt FROM users u WHERE u.upline_id = ");
        qb.push_bind(parent_id.0.clone());
        push_filter(&mut qb, filter);
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.get("cnt"))
    }

    /// All direct children of one member, in join order.
    pub async fn get_children(&self, parent_id: &UserId) -> Result<Vec<User>, sqlx::Error> {
        let sql = format!(
            "SELECT {} FROM users u WHERE u.upline_id = ? ORDER BY u.created_at ASC, u.id ASC",
            USER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(parent_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(user_from_row).collect())
    }

    /// `(child, parent)` pairs for every child of any member in `parents`.
    pub async fn child_ids_of(
        &self,
        parents: &[UserId],
    ) -> Result<Vec<(UserId, UserId)>, sqlx::Error> {
        let mut pairs = Vec::new();
        for chunk in parents.chunks(IN_CHUNK) {
            let mut qb =
                QueryBuilder::<Sqlite>::new("SELECT id, upline_id FROM users WHERE upline_id IN (");
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.0.clone());
            }
            qb.push(") ORDER BY created_at ASC, id ASC");
            let rows = qb.build().fetch_all(&self.pool).await?;
            pairs.extend(rows.iter().map(|r| {
                (
                    UserId::new(r.get::<String, _>("id")),
                    UserId::new(r.get::<String, _>("upline_id")),
                )
            }));
        }
        Ok(pairs)
    }

    /// Number of direct children per member, in one grouped query per chunk.
    pub async fn count_children_many(
        &self,
        parents: &[UserId],
    ) -> Result<HashMap<UserId, i64>, sqlx::Error> {
        let mut counts = HashMap::new();
        for chunk in parents.chunks(IN_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT upline_id, COUNT(*) AS cnt FROM users WHERE upline_id IN (",
            );
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.0.clone());
            }
            qb.push(") GROUP BY upline_id");
            let rows = qb.build().fetch_all(&self.pool).await?;
            for row in rows {
                counts.insert(
                    UserId::new(row.get::<String, _>("upline_id")),
                    row.get::<i64, _>("cnt"),
                );
            }
        }
        Ok(counts)
    }

    /// Descendant counts per depth below `root_id` (depth 1 = direct children),
    /// computed by a single recursive aggregate query.
    pub async fn level_counts(
        &self,
        root_id: &UserId,
        max_depth: usize,
    ) -> Result<Vec<(i64, i64)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE tree(id, depth) AS (
                SELECT id, 1 FROM users WHERE upline_id = ?
                UNION
                SELECT u.id, t.depth + 1
                FROM users u
                JOIN tree t ON u.upline_id = t.id
                WHERE t.depth < ?
            )
            SELECT depth, COUNT(DISTINCT id) AS cnt
            FROM tree
            GROUP BY depth
            ORDER BY depth ASC
            "#,
        )
        .bind(root_id.as_str())
        .bind(i64::try_from(max_depth).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| (r.get::<i64, _>("depth"), r.get::<i64, _>("cnt")))
            .collect())
    }

    /// The member occupying a sponsor's binary slot, if any.
    pub async fn child_at_position(
        &self,
        parent_id: &UserId,
        position: Position,
    ) -> Result<Option<UserId>, sqlx::Error> {
        let row = sqlx::query("SELECT id FROM users WHERE upline_id = ? AND position = ?")
            .bind(parent_id.as_str())
            .bind(position.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| UserId::new(r.get::<String, _>("id"))))
    }

    /// Direct children who joined at or after `since`.
    pub async fn count_direct_joined_since(
        &self,
        parent_id: &UserId,
        since: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM users WHERE upline_id = ? AND created_at >= ?",
        )
        .bind(parent_id.as_str())
        .bind(since.as_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("cnt"))
    }

    /// How many of `ids` joined at or after `since`.
    pub async fn count_joined_since(
        &self,
        ids: &[UserId],
        since: TimeMs,
    ) -> Result<i64, sqlx::Error> {
        let mut total = 0i64;
        for chunk in ids.chunks(IN_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT COUNT(*) AS cnt FROM users WHERE created_at >= ",
            );
            qb.push_bind(since.as_ms());
            qb.push(" AND id IN (");
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
}
