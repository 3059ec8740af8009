//! Shopping cart. Entries capture the product's effective price when added;
//! adding a product already in the cart merges into the active entry.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use uuid::Uuid;

use crate::{
    audit,
    dto::cart::{
        AddToCartRequest, CartCount, CartList, CartMembership, ClearedCart,
        UpdateCartQuantityRequest,
    },
    entity::{
        CartItems, Users,
        cart_items::{ActiveModel, Model as CartModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner_or_admin},
    models::CartItem,
    response::{ApiResponse, Meta},
    routes::params::Pagination,
    services::product_service::find_product,
    state::AppState,
};

const CART_ITEM_SELECT: &str = "SELECT ci.id, ci.user_id, ci.product_id, p.name AS product_name, \
     ci.quantity, ci.unit_price, ci.quantity::BIGINT * ci.unit_price AS subtotal, \
     ci.active, ci.created_at, ci.updated_at \
     FROM cart_items ci \
     JOIN products p ON p.id = ci.product_id";

pub async fn list_cart(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
    pagination: Pagination,
) -> AppResult<ApiResponse<CartList>> {
    ensure_owner_or_admin(user, user_id)?;
    let (page, limit, offset) = pagination.resolve()?;

    let items = sqlx::query_as::<_, CartItem>(&format!(
        "{CART_ITEM_SELECT} WHERE ci.user_id = $1 AND ci.active \
         ORDER BY ci.created_at DESC, ci.id ASC LIMIT $2 OFFSET $3"
    ))
    .bind(user_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let total: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM cart_items WHERE user_id = $1 AND active")
            .bind(user_id)
            .fetch_one(&state.pool)
            .await?;

    let meta = Meta::new(page, limit, total.0);
    Ok(ApiResponse::success("OK", CartList { items }, Some(meta)))
}

pub async fn add_to_cart(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
    payload: AddToCartRequest,
) -> AppResult<ApiResponse<CartItem>> {
    ensure_owner_or_admin(user, user_id)?;
    if payload.quantity <= 0 {
        return Err(AppError::InvalidArgument(
            "quantity must be greater than 0".into(),
        ));
    }
    Users::find_by_id(user_id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {user_id}")))?;
    let product = find_product(&state.orm, payload.product_id).await?;
    let unit_price = product.effective_price();

    // The partial unique index makes concurrent adds of one product merge.
    let (id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO cart_items (id, user_id, product_id, quantity, unit_price)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, product_id) WHERE active
        DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity,
                      unit_price = EXCLUDED.unit_price,
                      updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(product.id)
    .bind(payload.quantity)
    .bind(unit_price)
    .fetch_one(&state.pool)
    .await?;

    let item = fetch_item(state, id).await?;
    tracing::info!(
        cart_item_id = %item.id,
        user_id = %user_id,
        product_id = %product.id,
        quantity = item.quantity,
        "cart entry added"
    );
    audit::record(
        state,
        Some(user.user_id),
        "cart_add",
        "cart_items",
        serde_json::json!({ "product_id": product.id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Added to cart", item, None))
}

pub async fn update_quantity(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateCartQuantityRequest,
) -> AppResult<ApiResponse<CartItem>> {
    if payload.quantity <= 0 {
        return Err(AppError::InvalidArgument(
            "quantity must be greater than 0".into(),
        ));
    }
    let entry = find_active_entry(state, user, id).await?;

    let mut active: ActiveModel = entry.into();
    active.quantity = Set(payload.quantity);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "cart_quantity",
        "cart_items",
        serde_json::json!({ "cart_item_id": id, "quantity": payload.quantity }),
    )
    .await;

    let item = fetch_item(state, id).await?;
    Ok(ApiResponse::success("Updated", item, None))
}

/// Hard delete of one entry.
pub async fn remove_entry(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let entry = find_entry(state, id).await?;
    ensure_owner_or_admin(user, entry.user_id)?;
    CartItems::delete_by_id(entry.id).exec(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "cart_remove",
        "cart_items",
        serde_json::json!({ "cart_item_id": id, "product_id": entry.product_id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Removed from cart",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Deactivates an entry; deactivating twice changes nothing.
pub async fn soft_delete(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<CartItem>> {
    let entry = find_entry(state, id).await?;
    ensure_owner_or_admin(user, entry.user_id)?;
    if !entry.active {
        let item = fetch_item(state, id).await?;
        return Ok(ApiResponse::success("Unchanged", item, None));
    }

    let mut active: ActiveModel = entry.into();
    active.active = Set(false);
    active.updated_at = Set(Utc::now().into());
    active.update(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "cart_soft_delete",
        "cart_items",
        serde_json::json!({ "cart_item_id": id }),
    )
    .await;

    let item = fetch_item(state, id).await?;
    Ok(ApiResponse::success("Moved out of cart", item, None))
}

pub async fn count_items(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
) -> AppResult<ApiResponse<CartCount>> {
    ensure_owner_or_admin(user, user_id)?;
    let (total_quantity,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(SUM(quantity), 0)::BIGINT FROM cart_items WHERE user_id = $1 AND active",
    )
    .bind(user_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "OK",
        CartCount {
            user_id,
            total_quantity,
        },
        None,
    ))
}

pub async fn contains_product(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
    product_id: Uuid,
) -> AppResult<ApiResponse<CartMembership>> {
    ensure_owner_or_admin(user, user_id)?;
    let (in_cart,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM cart_items \
         WHERE user_id = $1 AND product_id = $2 AND active)",
    )
    .bind(user_id)
    .bind(product_id)
    .fetch_one(&state.pool)
    .await?;

    Ok(ApiResponse::success(
        "OK",
        CartMembership {
            product_id,
            in_cart,
        },
        None,
    ))
}

/// Deactivates every active entry of the user.
pub async fn clear_cart(
    state: &AppState,
    user: &AuthUser,
    user_id: Uuid,
) -> AppResult<ApiResponse<ClearedCart>> {
    ensure_owner_or_admin(user, user_id)?;
    let result = sqlx::query(
        "UPDATE cart_items SET active = FALSE, updated_at = NOW() \
         WHERE user_id = $1 AND active",
    )
    .bind(user_id)
    .execute(&state.pool)
    .await?;
    let cleared = result.rows_affected();

    if cleared > 0 {
        tracing::info!(user_id = %user_id, cleared, "cart cleared");
        audit::record(
            state,
            Some(user.user_id),
            "cart_clear",
            "cart_items",
            serde_json::json!({ "user_id": user_id, "cleared": cleared }),
        )
        .await;
    }

    Ok(ApiResponse::success(
        "Cart cleared",
        ClearedCart { cleared },
        Some(Meta::empty()),
    ))
}

async fn find_entry(state: &AppState, id: Uuid) -> AppResult<CartModel> {
    CartItems::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Cart item {id}")))
}

async fn find_active_entry(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<CartModel> {
    let entry = find_entry(state, id).await?;
    ensure_owner_or_admin(user, entry.user_id)?;
    if !entry.active {
        return Err(AppError::not_found(format!("Cart item {id}")));
    }
    Ok(entry)
}

async fn fetch_item(state: &AppState, id: Uuid) -> AppResult<CartItem> {
    sqlx::query_as::<_, CartItem>(&format!("{CART_ITEM_SELECT} WHERE ci.id = $1"))
        .bind(id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Cart item {id}")))
}
