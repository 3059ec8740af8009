use sqlx::FromRow;
use uuid::Uuid;

use crate::{
    domain::pricing,
    dto::reports::{BestSellerList, ProductSales},
    error::AppResult,
    models::BestSeller,
    response::ApiResponse,
    services::product_service::find_product,
    state::AppState,
};

pub const DEFAULT_BEST_SELLER_LIMIT: i64 = 10;

/// Line items that count as sold: live lines of orders that were not cancelled.
/// Both reports share this clause so their sums agree.
macro_rules! counted_sales {
    () => {
        "FROM order_details od \
         JOIN orders o ON o.id = od.order_id \
         WHERE o.order_status <> 'CANCELLED' AND od.trash = FALSE"
    };
}

const BEST_SELLERS_SQL: &str = concat!(
    "SELECT s.product_id, s.total_sold, p.name, p.price, p.price_sale, p.is_on_sale \
     FROM (SELECT od.product_id, SUM(od.quantity)::BIGINT AS total_sold ",
    counted_sales!(),
    " GROUP BY od.product_id) s \
     LEFT JOIN products p ON p.id = s.product_id \
     ORDER BY s.total_sold DESC, s.product_id ASC \
     LIMIT $1"
);

const TOTAL_SOLD_SQL: &str = concat!(
    "SELECT COALESCE(SUM(od.quantity), 0)::BIGINT ",
    counted_sales!(),
    " AND od.product_id = $1"
);

#[derive(Debug, FromRow)]
struct BestSellerRow {
    product_id: Uuid,
    total_sold: i64,
    name: Option<String>,
    price: Option<i64>,
    price_sale: Option<i64>,
    is_on_sale: Option<bool>,
}

impl From<BestSellerRow> for BestSeller {
    fn from(row: BestSellerRow) -> Self {
        let effective_price = row.price.map(|price| {
            pricing::effective_price(price, row.price_sale, row.is_on_sale.unwrap_or(false))
        });
        Self {
            product_id: row.product_id,
            total_sold: row.total_sold,
            product_name: row.name,
            price: row.price,
            effective_price,
        }
    }
}

/// Top sellers by quantity, highest first; ties broken by product id.
pub async fn best_sellers(state: &AppState, limit: i64) -> AppResult<ApiResponse<BestSellerList>> {
    let rows = sqlx::query_as::<_, BestSellerRow>(BEST_SELLERS_SQL)
        .bind(limit)
        .fetch_all(&state.pool)
        .await?;

    let items = rows.into_iter().map(BestSeller::from).collect();
    Ok(ApiResponse::success("Best sellers", BestSellerList { items }, None))
}

pub async fn total_sold_for_product(
    state: &AppState,
    product_id: Uuid,
) -> AppResult<ApiResponse<ProductSales>> {
    find_product(&state.orm, product_id).await?;

    let (total_sold,): (i64,) = sqlx::query_as(TOTAL_SOLD_SQL)
        .bind(product_id)
        .fetch_one(&state.pool)
        .await?;

    Ok(ApiResponse::success(
        "Total sold",
        ProductSales {
            product_id,
            total_sold,
        },
        None,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStatus;

    #[test]
    fn both_reports_share_the_exclusion_clause() {
        let clause = counted_sales!();
        assert!(BEST_SELLERS_SQL.contains(clause));
        assert!(TOTAL_SOLD_SQL.contains(clause));
        assert!(clause.contains(OrderStatus::Cancelled.as_str()));
        assert!(clause.contains("od.trash = FALSE"));
    }

    #[test]
    fn best_sellers_are_ranked_and_limited() {
        assert!(BEST_SELLERS_SQL.contains("ORDER BY s.total_sold DESC"));
        assert!(BEST_SELLERS_SQL.ends_with("LIMIT $1"));
    }

    #[test]
    fn rows_carry_effective_price() {
        let row = BestSellerRow {
            product_id: Uuid::new_v4(),
            total_sold: 8,
            name: Some("Mug".into()),
            price: Some(1000),
            price_sale: Some(700),
            is_on_sale: Some(true),
        };
        let best = BestSeller::from(row);
        assert_eq!(best.total_sold, 8);
        assert_eq!(best.effective_price, Some(700));

        let orphan = BestSeller::from(BestSellerRow {
            product_id: Uuid::new_v4(),
            total_sold: 2,
            name: None,
            price: None,
            price_sale: None,
            is_on_sale: None,
        });
        assert_eq!(orphan.effective_price, None);
    }
}
