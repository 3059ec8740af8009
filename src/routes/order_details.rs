use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::orders::{OrderWithItems, UpdateQuantityRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::OrderDetail,
    response::ApiResponse,
    services::order_detail_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/{id}",
        get(get_order_detail)
            .patch(update_quantity)
            .delete(remove_item),
    )
}

#[utoipa::path(
    get,
    path = "/api/order-details/{id}",
    params(
        ("id" = Uuid, Path, description = "Order detail ID")
    ),
    responses(
        (status = 200, description = "Get one line item", body = ApiResponse<OrderDetail>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
    ),
    security(("bearer_auth" = [])),
    tag = "Order details"
)]
pub async fn get_order_detail(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_detail_service::get_order_detail(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    patch,
    path = "/api/order-details/{id}",
    params(
        ("id" = Uuid, Path, description = "Order detail ID")
    ),
    request_body = UpdateQuantityRequest,
    responses(
        (status = 200, description = "Change quantity and reprice the order", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "Invalid quantity"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Order not modifiable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Order details"
)]
pub async fn update_quantity(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateQuantityRequest>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_detail_service::update_item_quantity(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/order-details/{id}",
    params(
        ("id" = Uuid, Path, description = "Order detail ID")
    ),
    responses(
        (status = 200, description = "Remove a line item from a pending order", body = ApiResponse<OrderWithItems>),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Order not modifiable"),
    ),
    security(("bearer_auth" = [])),
    tag = "Order details"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderWithItems>>> {
    let resp = order_detail_service::remove_item(&state, &user, id).await?;
    Ok(Json(resp))
}
