use std::collections::HashMap;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, Condition, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, QueryTrait, Set, TransactionTrait,
    sea_query::{Expr, LockType, extension::postgres::PgExpr},
};
use uuid::Uuid;

use crate::{
    audit,
    domain::{
        LineChange, LineItem, OrderAggregate, OrderError, OrderStatus, PaymentStatus,
        order::NewLine,
    },
    dto::orders::{
        CreateOrderRequest, OrderList, OrderStatusCounts, OrderWithItems,
        UpdateOrderStatusRequest, UpdatePaymentStatusRequest, UpdateTrackingRequest,
    },
    entity::{
        Users,
        order_details::{
            ActiveModel as DetailActive, Column as DetailCol, Entity as OrderDetails,
            Model as DetailModel,
        },
        orders::{
            ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel,
        },
        users::Column as UserCol,
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner_or_admin},
    models::{Order, OrderDetail},
    response::{ApiResponse, Meta},
    routes::params::{OrderListQuery, OrderSearchQuery, SortOrder},
    services::{catalog_query::like_pattern, product_service::find_product},
    state::AppState,
};

pub const RECENT_ORDERS_LIMIT: i64 = 5;

pub async fn create_order(
    state: &AppState,
    user: &AuthUser,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    ensure_owner_or_admin(user, payload.user_id)?;
    let shipping_name = required("shipping name", &payload.shipping_name)?;
    let shipping_phone = required("shipping phone", &payload.shipping_phone)?;
    let shipping_address = required("shipping address", &payload.shipping_address)?;
    let payment_method = required("payment method", &payload.payment_method)?;

    let txn = state.orm.begin().await?;

    let owner = Users::find_by_id(payload.user_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {}", payload.user_id)))?;

    let mut requested = Vec::with_capacity(payload.items.len());
    for item in &payload.items {
        let product = find_product(&txn, item.product_id).await?;
        requested.push(NewLine {
            product_id: product.id,
            quantity: item.quantity,
            unit_price: product.effective_price(),
        });
    }
    let aggregate = OrderAggregate::create(Uuid::new_v4(), &requested)?;

    let now = Utc::now();
    let order = OrderActive {
        id: Set(aggregate.id()),
        user_id: Set(owner.id),
        order_date: Set(now.into()),
        total_amount: Set(aggregate.total_amount()),
        shipping_address: Set(shipping_address),
        shipping_phone: Set(shipping_phone),
        shipping_name: Set(shipping_name),
        payment_method: Set(payment_method),
        payment_status: Set(aggregate.payment_status().as_str().to_string()),
        order_status: Set(aggregate.status().as_str().to_string()),
        tracking_number: Set(None),
        notes: Set(payload.notes),
        trash: Set(false),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&txn)
    .await?;

    let mut items = Vec::with_capacity(aggregate.lines().len());
    for line in aggregate.lines() {
        let detail = insert_line(&txn, order.id, line).await?;
        items.push(OrderDetail::from(detail));
    }

    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        user_id = %order.user_id,
        total_amount = order.total_amount,
        lines = items.len(),
        "order created"
    );
    audit::record(
        state,
        Some(user.user_id),
        "order_create",
        "orders",
        serde_json::json!({ "order_id": order.id, "total_amount": order.total_amount }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: Order::try_from(order)?.with_username(Some(owner.username)),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Trashed orders stay retrievable by id.
pub async fn get_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<OrderWithItems>> {
    let order = find_order(&state.orm, id).await?;
    ensure_owner_or_admin(user, order.user_id)?;

    let items = live_details(&state.orm, order.id).await?;
    let username = username_of(&state.orm, order.user_id).await?;

    Ok(ApiResponse::success(
        "OK",
        OrderWithItems {
            order: Order::try_from(order)?.with_username(username),
            items,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().resolve()?;

    let mut condition = Condition::all().add(OrderCol::Trash.eq(false));
    if let Some(status) = query.status.as_deref().filter(|s| !s.trim().is_empty()) {
        let status: OrderStatus = status.parse()?;
        condition = condition.add(OrderCol::OrderStatus.eq(status.as_str()));
    }

    let finder = Orders::find().filter(condition);
    let finder = match query.sort_order.unwrap_or(SortOrder::Desc) {
        SortOrder::Asc => finder.order_by_asc(OrderCol::OrderDate),
        SortOrder::Desc => finder.order_by_desc(OrderCol::OrderDate),
    }
    .order_by_asc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let items = with_usernames(&state.orm, orders).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn list_user_orders(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_owner_or_admin(user, user_id)?;
    let owner = Users::find_by_id(user_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {user_id}")))?;

    let items = Orders::find()
        .filter(OrderCol::UserId.eq(owner.id))
        .filter(OrderCol::Trash.eq(false))
        .order_by_desc(OrderCol::OrderDate)
        .order_by_asc(OrderCol::Id)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(|order| Ok(Order::try_from(order)?.with_username(Some(owner.username.clone()))))
        .collect::<AppResult<Vec<_>>>()?;

    Ok(ApiResponse::success("Ok", OrderList { items }, None))
}

pub async fn search_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderSearchQuery,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = query.pagination().resolve()?;
    let term = query.term.trim();
    if term.is_empty() {
        return Err(AppError::InvalidArgument(
            "search term must not be empty".into(),
        ));
    }

    let finder = Orders::find()
        .filter(search_condition(term))
        .order_by_desc(OrderCol::OrderDate)
        .order_by_asc(OrderCol::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?;
    let items = with_usernames(&state.orm, orders).await?;

    Ok(ApiResponse::success(
        "Ok",
        OrderList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

fn search_condition(term: &str) -> Condition {
    let pattern = like_pattern(term);
    let matching_users = Users::find()
        .select_only()
        .column(UserCol::Id)
        .filter(Expr::col((Users, UserCol::Username)).ilike(pattern.clone()))
        .into_query();

    Condition::all().add(OrderCol::Trash.eq(false)).add(
        Condition::any()
            .add(Expr::col((Orders, OrderCol::ShippingName)).ilike(pattern.clone()))
            .add(Expr::col((Orders, OrderCol::ShippingPhone)).ilike(pattern.clone()))
            .add(Expr::col((Orders, OrderCol::TrackingNumber)).ilike(pattern))
            .add(OrderCol::UserId.in_subquery(matching_users)),
    )
}

pub async fn recent_orders(
    state: &AppState,
    user: &AuthUser,
    limit: i64,
) -> AppResult<ApiResponse<OrderList>> {
    ensure_admin(user)?;
    let orders = Orders::find()
        .filter(OrderCol::Trash.eq(false))
        .order_by_desc(OrderCol::OrderDate)
        .order_by_asc(OrderCol::Id)
        .limit(limit as u64)
        .all(&state.orm)
        .await?;
    let items = with_usernames(&state.orm, orders).await?;

    Ok(ApiResponse::success("Ok", OrderList { items }, None))
}

/// Counts non-trashed orders per status; every status is reported, zero included.
pub async fn status_counts(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<OrderStatusCounts>> {
    ensure_admin(user)?;
    let mut counts = HashMap::with_capacity(OrderStatus::ALL.len());
    for status in OrderStatus::ALL {
        let count = Orders::find()
            .filter(OrderCol::Trash.eq(false))
            .filter(OrderCol::OrderStatus.eq(status.as_str()))
            .count(&state.orm)
            .await?;
        counts.insert(status, count);
    }
    let count = |status: OrderStatus| counts.get(&status).copied().unwrap_or(0);

    Ok(ApiResponse::success(
        "Ok",
        OrderStatusCounts {
            pending: count(OrderStatus::Pending),
            processing: count(OrderStatus::Processing),
            shipped: count(OrderStatus::Shipped),
            delivered: count(OrderStatus::Delivered),
            cancelled: count(OrderStatus::Cancelled),
        },
        None,
    ))
}

pub async fn update_order_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let next: OrderStatus = payload.status.parse()?;
    mutate_order(state, user, id, "order_status", |order| order.change_status(next)).await
}

pub async fn cancel_order(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    mutate_order(state, user, id, "order_cancel", |order| {
        order.change_status(OrderStatus::Cancelled)
    })
    .await
}

pub async fn update_payment_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdatePaymentStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    let status: PaymentStatus = payload.status.parse()?;
    mutate_order(state, user, id, "order_payment", |order| {
        order.set_payment_status(status);
        Ok(())
    })
    .await
}

pub async fn update_tracking(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateTrackingRequest,
) -> AppResult<ApiResponse<Order>> {
    mutate_order(state, user, id, "order_tracking", |order| {
        order.record_tracking(&payload.tracking_number)
    })
    .await
}

pub async fn move_to_trash(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    mutate_order(state, user, id, "order_trash", |order| {
        order.move_to_trash();
        Ok(())
    })
    .await
}

pub async fn restore_from_trash(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Order>> {
    mutate_order(state, user, id, "order_restore", |order| {
        order.restore_from_trash();
        Ok(())
    })
    .await
}

/// Admin-only header mutation under the order row lock. A call that changes
/// nothing writes nothing and returns the stored order as is.
async fn mutate_order<F>(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    action: &str,
    apply: F,
) -> AppResult<ApiResponse<Order>>
where
    F: FnOnce(&mut OrderAggregate) -> Result<(), OrderError>,
{
    ensure_admin(user)?;
    let txn = state.orm.begin().await?;
    let model = lock_order(&txn, id).await?;
    let mut aggregate = load_aggregate(&txn, &model).await?;
    let before = aggregate.clone();

    apply(&mut aggregate)?;

    if aggregate == before {
        txn.commit().await?;
        return Ok(ApiResponse::success(
            "Unchanged",
            Order::try_from(model)?,
            Some(Meta::empty()),
        ));
    }

    let order = save_order(&txn, model, &aggregate).await?;
    txn.commit().await?;

    tracing::info!(
        order_id = %order.id,
        action,
        order_status = %order.order_status,
        payment_status = %order.payment_status,
        trash = order.trash,
        "order updated"
    );
    audit::record(
        state,
        Some(user.user_id),
        action,
        "orders",
        serde_json::json!({
            "order_id": order.id,
            "order_status": order.order_status,
            "payment_status": order.payment_status,
        }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        Order::try_from(order)?,
        Some(Meta::empty()),
    ))
}

pub(crate) async fn find_order<C: ConnectionTrait>(db: &C, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Order {id}")))
}

/// Takes the per-order row lock; every aggregate mutation starts here.
pub(crate) async fn lock_order<C: ConnectionTrait>(db: &C, id: Uuid) -> AppResult<OrderModel> {
    Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Order {id}")))
}

pub(crate) async fn load_aggregate<C: ConnectionTrait>(
    db: &C,
    order: &OrderModel,
) -> AppResult<OrderAggregate> {
    let lines = OrderDetails::find()
        .filter(DetailCol::OrderId.eq(order.id))
        .order_by_asc(DetailCol::CreatedAt)
        .order_by_asc(DetailCol::Id)
        .all(db)
        .await?
        .iter()
        .map(line_from_model)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(OrderAggregate::restore(
        order.id,
        order.order_status.parse()?,
        order.payment_status.parse()?,
        order.tracking_number.clone(),
        order.trash,
        lines,
    )?)
}

fn line_from_model(model: &DetailModel) -> Result<LineItem, OrderError> {
    LineItem::restore(
        model.id,
        model.product_id,
        model.quantity,
        model.unit_price,
        model.discount_amount,
        model.trash,
    )
}

/// Writes the aggregate's header fields back to the locked order row.
pub(crate) async fn save_order<C: ConnectionTrait>(
    db: &C,
    model: OrderModel,
    aggregate: &OrderAggregate,
) -> AppResult<OrderModel> {
    let mut active: OrderActive = model.into();
    active.total_amount = Set(aggregate.total_amount());
    active.order_status = Set(aggregate.status().as_str().to_string());
    active.payment_status = Set(aggregate.payment_status().as_str().to_string());
    active.tracking_number = Set(aggregate.tracking_number().map(str::to_string));
    active.trash = Set(aggregate.is_trashed());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(db).await?)
}

/// Persists exactly the row a line mutation touched.
pub(crate) async fn persist_change<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
    change: &LineChange,
) -> AppResult<()> {
    match change {
        LineChange::Added(line) => {
            insert_line(db, order_id, line).await?;
        }
        LineChange::Updated(line) => {
            DetailActive {
                id: Set(line.id()),
                quantity: Set(line.quantity()),
                subtotal: Set(line.subtotal()),
                final_price: Set(line.final_price()),
                updated_at: Set(Utc::now().into()),
                ..Default::default()
            }
            .update(db)
            .await?;
        }
        LineChange::Removed(line) => {
            OrderDetails::delete_by_id(line.id()).exec(db).await?;
        }
    }
    Ok(())
}

async fn insert_line<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
    line: &LineItem,
) -> AppResult<DetailModel> {
    let now = Utc::now();
    let detail = DetailActive {
        id: Set(line.id()),
        order_id: Set(order_id),
        product_id: Set(line.product_id()),
        quantity: Set(line.quantity()),
        unit_price: Set(line.unit_price()),
        subtotal: Set(line.subtotal()),
        discount_amount: Set(line.discount_amount()),
        final_price: Set(line.final_price()),
        trash: Set(line.is_trashed()),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(db)
    .await?;
    Ok(detail)
}

/// Non-trashed line items in insertion order.
pub(crate) async fn live_details<C: ConnectionTrait>(
    db: &C,
    order_id: Uuid,
) -> AppResult<Vec<OrderDetail>> {
    Ok(OrderDetails::find()
        .filter(DetailCol::OrderId.eq(order_id))
        .filter(DetailCol::Trash.eq(false))
        .order_by_asc(DetailCol::CreatedAt)
        .order_by_asc(DetailCol::Id)
        .all(db)
        .await?
        .into_iter()
        .map(OrderDetail::from)
        .collect())
}

async fn username_of<C: ConnectionTrait>(db: &C, user_id: Uuid) -> AppResult<Option<String>> {
    Ok(Users::find_by_id(user_id)
        .one(db)
        .await?
        .map(|user| user.username))
}

async fn with_usernames<C: ConnectionTrait>(
    db: &C,
    orders: Vec<OrderModel>,
) -> AppResult<Vec<Order>> {
    let mut user_ids: Vec<Uuid> = orders.iter().map(|order| order.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();

    let usernames: HashMap<Uuid, String> = if user_ids.is_empty() {
        HashMap::new()
    } else {
        Users::find()
            .filter(UserCol::Id.is_in(user_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|user| (user.id, user.username))
            .collect()
    };

    orders
        .into_iter()
        .map(|order| {
            let username = usernames.get(&order.user_id).cloned();
            Ok(Order::try_from(order)?.with_username(username))
        })
        .collect()
}

fn required(field: &str, value: &str) -> AppResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidArgument(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}
