//! Products and purchases.

use super::{decimal_or_zero, sum_decimals, Repository, IN_CHUNK};
use crate::domain::{Product, ProductId, Purchase, PurchaseId, PurchaseStatus, TimeMs, UserId};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use std::str::FromStr;

fn purchase_from_row(row: &SqliteRow) -> Result<Purchase, sqlx::Error> {
    let id: String = row.get("id");
    let total_amount: String = row.get("total_amount");
    let total_pv: String = row.get("total_pv");
    let status: String = row.get("status");
    Ok(Purchase {
        status: PurchaseStatus::from_str(&status).map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: e.into(),
        })?,
        total_amount: decimal_or_zero(&total_amount, "total_amount", &id),
        total_pv: decimal_or_zero(&total_pv, "total_pv", &id),
        buyer_id: UserId::new(row.get::<String, _>("buyer_id")),
        product_id: ProductId::new(row.get::<String, _>("product_id")),
        quantity: row.get("quantity"),
        created_at: TimeMs::new(row.get("created_at")),
        id: PurchaseId::new(id),
    })
}

impl Repository {
    pub async fn insert_product(&self, product: &Product) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO products (id, name, price, pv_value) VALUES (?, ?, ?, ?)")
            .bind(product.id.as_str())
            .bind(&product.name)
            .bind(product.price.to_canonical_string())
            .bind(product.pv_value.to_canonical_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, price, pv_value FROM products WHERE id = ?")
            .bind(product_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| {
            let id: String = r.get("id");
            let price: String = r.get("price");
            let pv: String = r.get("pv_value");
            Product {
                price: decimal_or_zero(&price, "price", &id),
                pv_value: decimal_or_zero(&pv, "pv_value", &id),
                name: r.get("name"),
                id: ProductId::new(id),
            }
        }))
    }

    pub async fn insert_purchase(&self, purchase: &Purchase) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO purchases (id, buyer_id, product_id, quantity, total_amount, total_pv, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(purchase.id.as_str())
        .bind(purchase.buyer_id.as_str())
        .bind(purchase.product_id.as_str())
        .bind(purchase.quantity)
        .bind(purchase.total_amount.to_canonical_string())
        .bind(purchase.total_pv.to_canonical_string())
        .bind(purchase.status.as_str())
        .bind(purchase.created_at.as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_purchase(&self, purchase_id: &PurchaseId) -> Result<Option<Purchase>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, buyer_id, product_id, quantity, total_amount, total_pv, status, created_at
            FROM purchases WHERE id = ?
            "#,
        )
        .bind(purchase_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    /// Total completed purchase amount across `buyers`.
    pub async fn sum_completed_sales(&self, buyers: &[UserId]) -> Result<crate::domain::Decimal, sqlx::Error> {
        let mut amounts: Vec<String> = Vec::new();
        for chunk in buyers.chunks(IN_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT total_amount FROM purchases WHERE status = 'completed' AND buyer_id IN (",
            );
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(id.0.clone());
            }
            qb.push(")");
            let rows = qb.build().fetch_all(&self.pool).await?;
            amounts.extend(rows.iter().map(|r| r.get::<String, _>("total_amount")));
        }
        Ok(sum_decimals(
            amounts.iter().map(String::as_str),
            "total_amount",
            "completed_sales",
        ))
    }

    /// Completed purchases by one buyer at or after `since`.
    pub async fn count_purchases_since(&self, buyer: &UserId, since: TimeMs) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM purchases WHERE buyer_id = ? AND status = 'completed' AND created_at >= ?",
        )
        .bind(buyer.as_str())
        .bind(since.as_ms())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("cnt"))
    }
}
