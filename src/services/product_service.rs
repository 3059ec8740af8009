use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, ConnectionTrait, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::{
    audit,
    dto::products::{CreateProductRequest, ProductList, ProductPage, UpdateProductRequest},
    entity::{
        Categories, OrderDetails, order_details,
        products::{ActiveModel, Column, Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta, total_pages},
    routes::params::{Pagination, ProductSearchQuery},
    services::catalog_query::CatalogQuery,
    state::AppState,
};

/// Catalog lookup used by the order flows; trashed products still resolve.
pub async fn find_product<C: ConnectionTrait>(db: &C, id: Uuid) -> AppResult<ProductModel> {
    Products::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Product {id}")))
}

pub async fn search(
    state: &AppState,
    params: ProductSearchQuery,
) -> AppResult<ApiResponse<ProductPage>> {
    let query = CatalogQuery::from_params(&params)?;
    tracing::debug!(predicates = ?query.predicates(), sort = ?query.sort, "catalog query");

    let finder = query.select();
    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(query.per_page as u64)
        .offset(query.offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let page = ProductPage {
        items,
        total,
        total_pages: total_pages(total, query.per_page),
        current_page: query.page,
    };
    let meta = Meta::new(query.page, query.per_page, total);
    Ok(ApiResponse::success("Products", page, Some(meta)))
}

pub async fn list_by_category(
    state: &AppState,
    category_id: Uuid,
    params: ProductSearchQuery,
) -> AppResult<ApiResponse<ProductPage>> {
    let params = ProductSearchQuery {
        q: None,
        category_id: Some(category_id),
        min_price: None,
        max_price: None,
        ..params
    };
    search(state, params).await
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let product = find_product(&state.orm, id).await?;
    Ok(ApiResponse::success("Product", Product::from(product), None))
}

pub async fn most_viewed(state: &AppState, limit: i64) -> AppResult<ApiResponse<ProductList>> {
    let items = Products::find()
        .filter(Column::Trash.eq(false))
        .order_by_desc(Column::View)
        .order_by_asc(Column::Id)
        .limit(limit as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();
    Ok(ApiResponse::success("Most viewed", ProductList { items }, None))
}

pub async fn on_sale(state: &AppState, limit: i64) -> AppResult<ApiResponse<ProductList>> {
    let items = Products::find()
        .filter(Column::Trash.eq(false))
        .filter(Column::IsOnSale.eq(true))
        .order_by_desc(Column::UpdatedAt)
        .order_by_asc(Column::Id)
        .limit(limit as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();
    Ok(ApiResponse::success("On sale", ProductList { items }, None))
}

pub async fn list_trash(
    state: &AppState,
    user: &AuthUser,
    pagination: Pagination,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    let (page, limit, offset) = pagination.resolve()?;
    let finder = Products::find()
        .filter(Column::Trash.eq(true))
        .order_by_desc(Column::UpdatedAt)
        .order_by_asc(Column::Id);

    let total = finder.clone().count(&state.orm).await? as i64;
    let items = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    Ok(ApiResponse::success(
        "Trashed products",
        ProductList { items },
        Some(Meta::new(page, limit, total)),
    ))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    validate_pricing(Some(payload.price), payload.price_sale, payload.quantity)?;
    let name = validate_name(&payload.name)?;
    if let Some(category_id) = payload.category_id {
        ensure_category(state, category_id).await?;
    }

    let product = ActiveModel {
        id: Set(Uuid::new_v4()),
        category_id: Set(payload.category_id),
        name: Set(name),
        description: Set(payload.description),
        price: Set(payload.price),
        price_sale: Set(payload.price_sale),
        is_on_sale: Set(payload.is_on_sale.unwrap_or(false)),
        quantity: Set(payload.quantity),
        view: Set(0),
        status: Set(payload.status.unwrap_or(true)),
        trash: Set(false),
        created_at: NotSet,
        updated_at: NotSet,
    }
    .insert(&state.orm)
    .await?;

    tracing::info!(product_id = %product.id, "product created");
    audit::record(
        state,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    validate_pricing(payload.price, payload.price_sale.flatten(), payload.quantity)?;
    let existing = find_product(&state.orm, id).await?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(validate_name(&name)?);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(category_id) = payload.category_id {
        ensure_category(state, category_id).await?;
        active.category_id = Set(Some(category_id));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(price_sale) = payload.price_sale {
        active.price_sale = Set(price_sale);
    }
    if let Some(is_on_sale) = payload.is_on_sale {
        active.is_on_sale = Set(is_on_sale);
    }
    if let Some(quantity) = payload.quantity {
        active.quantity = Set(Some(quantity));
    }
    if let Some(status) = payload.status {
        active.status = Set(status);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    tracing::info!(product_id = %product.id, "product updated");
    audit::record(
        state,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn toggle_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = find_product(&state.orm, id).await?;
    let published = !existing.status;

    let mut active: ActiveModel = existing.into();
    active.status = Set(published);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    audit::record(
        state,
        Some(user.user_id),
        "product_toggle_status",
        "products",
        serde_json::json!({ "product_id": product.id, "status": published }),
    )
    .await;

    Ok(ApiResponse::success(
        "Status toggled",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn move_to_trash(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    set_trash(state, user, id, true).await
}

pub async fn restore_from_trash(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Product>> {
    set_trash(state, user, id, false).await
}

async fn set_trash(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    trash: bool,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    let existing = find_product(&state.orm, id).await?;
    if existing.trash == trash {
        return Ok(ApiResponse::success(
            "Unchanged",
            Product::from(existing),
            Some(Meta::empty()),
        ));
    }

    let mut active: ActiveModel = existing.into();
    active.trash = Set(trash);
    active.updated_at = Set(Utc::now().into());
    let product = active.update(&state.orm).await?;

    let action = if trash { "product_trash" } else { "product_restore" };
    tracing::info!(product_id = %product.id, trash, "product trash flag changed");
    audit::record(
        state,
        Some(user.user_id),
        action,
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    let message = if trash { "Moved to trash" } else { "Restored" };
    Ok(ApiResponse::success(
        message,
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;
    let ordered = OrderDetails::find()
        .filter(order_details::Column::ProductId.eq(id))
        .count(&state.orm)
        .await?;
    if ordered > 0 {
        return Err(AppError::InvalidState(format!(
            "product {id} appears on {ordered} order lines; move it to trash instead"
        )));
    }

    let result = Products::delete_by_id(id).exec(&state.orm).await?;

    if result.rows_affected == 0 {
        return Err(AppError::not_found(format!("Product {id}")));
    }

    audit::record(
        state,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

async fn ensure_category(state: &AppState, id: Uuid) -> AppResult<()> {
    Categories::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("Category {id}")))
}

fn validate_name(name: &str) -> AppResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidArgument("name must not be empty".into()));
    }
    Ok(name.to_string())
}

fn validate_pricing(
    price: Option<i64>,
    price_sale: Option<i64>,
    quantity: Option<i32>,
) -> AppResult<()> {
    if price.is_some_and(|p| p < 0) {
        return Err(AppError::InvalidArgument("price must not be negative".into()));
    }
    if price_sale.is_some_and(|p| p < 0) {
        return Err(AppError::InvalidArgument(
            "sale price must not be negative".into(),
        ));
    }
    if quantity.is_some_and(|q| q < 0) {
        return Err(AppError::InvalidArgument(
            "quantity must not be negative".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pricing_validation() {
        assert!(validate_pricing(Some(0), None, None).is_ok());
        assert!(validate_pricing(Some(100), Some(80), Some(3)).is_ok());
        assert!(validate_pricing(Some(-1), None, None).is_err());
        assert!(validate_pricing(None, Some(-1), None).is_err());
        assert!(validate_pricing(None, None, Some(-2)).is_err());
    }

    #[test]
    fn names_are_trimmed_and_required() {
        assert_eq!(validate_name("  Mug ").unwrap(), "Mug");
        assert!(validate_name("   ").is_err());
    }
}
