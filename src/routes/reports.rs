use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::reports::{BestSellerList, ProductSales},
    error::AppResult,
    response::ApiResponse,
    routes::params::LimitQuery,
    services::report_service::{self, DEFAULT_BEST_SELLER_LIMIT},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/best-sellers", get(best_sellers))
        .route("/products/{id}/sold", get(total_sold_for_product))
}

#[utoipa::path(
    get,
    path = "/api/reports/best-sellers",
    params(LimitQuery),
    responses(
        (status = 200, description = "Products ranked by units sold in non-cancelled orders", body = ApiResponse<BestSellerList>),
        (status = 400, description = "Invalid limit"),
    ),
    tag = "Reports"
)]
pub async fn best_sellers(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<ApiResponse<BestSellerList>>> {
    let limit = query.resolve(DEFAULT_BEST_SELLER_LIMIT)?;
    let resp = report_service::best_sellers(&state, limit).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/reports/products/{id}/sold",
    params(
        ("id" = Uuid, Path, description = "Product ID")
    ),
    responses(
        (status = 200, description = "Units sold of one product", body = ApiResponse<ProductSales>),
        (status = 404, description = "Product not found"),
    ),
    tag = "Reports"
)]
pub async fn total_sold_for_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ProductSales>>> {
    let resp = report_service::total_sold_for_product(&state, id).await?;
    Ok(Json(resp))
}
