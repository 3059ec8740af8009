//! Line-item operations on the order aggregate.
//!
//! Each call runs in one transaction holding the order row lock: load the
//! aggregate, apply the mutation, persist the single touched row and the new
//! order total, commit. Any error drops the transaction and rolls back.

use sea_orm::{EntityTrait, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit,
    domain::{LineChange, OrderAggregate, OrderError},
    dto::orders::{AddItemRequest, OrderDetailList, OrderWithItems, UpdateQuantityRequest},
    entity::{OrderDetails, order_details::Model as DetailModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner_or_admin},
    models::{Order, OrderDetail},
    response::{ApiResponse, Meta},
    services::{
        order_service::{
            find_order, live_details, load_aggregate, lock_order, persist_change, save_order,
        },
        product_service::find_product,
    },
    state::AppState,
};

pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    payload: AddItemRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let product = find_product(&state.orm, payload.product_id).await?;
    let unit_price = product.effective_price();

    apply_line_change(state, user, order_id, "order_item_add", |order| {
        order.add_item(product.id, payload.quantity, unit_price)
    })
    .await
}

pub async fn update_item_quantity(
    state: &AppState,
    user: &AuthUser,
    detail_id: Uuid,
    payload: UpdateQuantityRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let detail = find_detail(state, detail_id).await?;

    apply_line_change(state, user, detail.order_id, "order_item_quantity", |order| {
        order.update_item_quantity(detail_id, payload.quantity)
    })
    .await
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    detail_id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let detail = find_detail(state, detail_id).await?;

    apply_line_change(state, user, detail.order_id, "order_item_remove", |order| {
        order.remove_item(detail_id)
    })
    .await
}

pub async fn list_order_details(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
) -> AppResult<ApiResponse<OrderDetailList>> {
    let order = find_order(&state.orm, order_id).await?;
    ensure_owner_or_admin(user, order.user_id)?;
    let items = live_details(&state.orm, order.id).await?;
    Ok(ApiResponse::success("Ok", OrderDetailList { items }, None))
}

pub async fn get_order_detail(
    state: &AppState,
    user: &AuthUser,
    detail_id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let detail = find_detail(state, detail_id).await?;
    let order = find_order(&state.orm, detail.order_id).await?;
    ensure_owner_or_admin(user, order.user_id)?;
    Ok(ApiResponse::success("Ok", OrderDetail::from(detail), None))
}

async fn find_detail(state: &AppState, id: Uuid) -> AppResult<DetailModel> {
    OrderDetails::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Order detail {id}")))
}

async fn apply_line_change<F>(
    state: &AppState,
    user: &AuthUser,
    order_id: Uuid,
    action: &str,
    mutate: F,
) -> AppResult<ApiResponse<OrderWithItems>>
where
    F: FnOnce(&mut OrderAggregate) -> Result<LineChange, OrderError>,
{
    let txn = state.orm.begin().await?;
    let model = lock_order(&txn, order_id).await?;
    ensure_owner_or_admin(user, model.user_id)?;

    let mut aggregate = load_aggregate(&txn, &model).await?;
    let change = mutate(&mut aggregate)?;

    persist_change(&txn, order_id, &change).await?;
    let order = save_order(&txn, model, &aggregate).await?;
    let items = live_details(&txn, order_id).await?;
    txn.commit().await?;

    let line = change.line();
    tracing::info!(
        order_id = %order.id,
        detail_id = %line.id(),
        product_id = %line.product_id(),
        quantity = line.quantity(),
        total_amount = order.total_amount,
        action,
        "order line changed"
    );
    audit::record(
        state,
        Some(user.user_id),
        action,
        "order_details",
        serde_json::json!({
            "order_id": order.id,
            "detail_id": line.id(),
            "total_amount": order.total_amount,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        OrderWithItems {
            order: Order::try_from(order)?,
            items,
        },
        Some(Meta::empty()),
    ))
}
