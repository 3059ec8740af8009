use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::BestSeller;

#[derive(Debug, Serialize, ToSchema)]
pub struct BestSellerList {
    pub items: Vec<BestSeller>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProductSales {
    pub product_id: Uuid,
    pub total_sold: i64,
}
