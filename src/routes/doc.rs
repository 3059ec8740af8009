use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    domain::{OrderStatus, PaymentStatus},
    dto::{
        cart::{
            AddToCartRequest, CartCount, CartList, CartMembership, ClearedCart,
            UpdateCartQuantityRequest,
        },
        orders::{
            AddItemRequest, CreateOrderRequest, OrderDetailList, OrderItemRequest, OrderList,
            OrderStatusCounts, OrderWithItems, UpdateOrderStatusRequest,
            UpdatePaymentStatusRequest, UpdateQuantityRequest, UpdateTrackingRequest,
        },
        products::{CreateProductRequest, ProductList, ProductPage, UpdateProductRequest},
        reports::{BestSellerList, ProductSales},
    },
    models::{BestSeller, CartItem, Order, OrderDetail, Product},
    response::{ApiResponse, Meta},
    routes::{cart, health, order_details, orders, params, products, reports},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        products::search_products,
        products::list_by_category,
        products::most_viewed,
        products::on_sale,
        products::list_trash,
        products::get_product,
        products::create_product,
        products::update_product,
        products::toggle_status,
        products::move_to_trash,
        products::restore_from_trash,
        products::delete_product,
        cart::cart_list,
        cart::add_to_cart,
        cart::clear_cart,
        cart::count_items,
        cart::contains_product,
        cart::update_quantity,
        cart::remove_from_cart,
        cart::soft_delete,
        orders::create_order,
        orders::list_orders,
        orders::search_orders,
        orders::recent_orders,
        orders::status_counts,
        orders::list_user_orders,
        orders::get_order,
        orders::update_order_status,
        orders::update_payment_status,
        orders::update_tracking,
        orders::cancel_order,
        orders::move_to_trash,
        orders::restore_from_trash,
        orders::list_items,
        orders::add_item,
        order_details::get_order_detail,
        order_details::update_quantity,
        order_details::remove_item,
        reports::best_sellers,
        reports::total_sold_for_product
    ),
    components(
        schemas(
            Product,
            Order,
            OrderDetail,
            BestSeller,
            CartItem,
            OrderStatus,
            PaymentStatus,
            CreateProductRequest,
            UpdateProductRequest,
            ProductList,
            ProductPage,
            AddToCartRequest,
            UpdateCartQuantityRequest,
            CartList,
            CartCount,
            CartMembership,
            ClearedCart,
            CreateOrderRequest,
            OrderItemRequest,
            UpdateOrderStatusRequest,
            UpdatePaymentStatusRequest,
            UpdateTrackingRequest,
            AddItemRequest,
            UpdateQuantityRequest,
            OrderList,
            OrderWithItems,
            OrderDetailList,
            OrderStatusCounts,
            BestSellerList,
            ProductSales,
            params::Pagination,
            params::ProductSearchQuery,
            params::OrderListQuery,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductPage>,
            ApiResponse<CartList>,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderList>,
            ApiResponse<BestSellerList>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Products", description = "Catalog queries and product management"),
        (name = "Cart", description = "Shopping cart of a user"),
        (name = "Orders", description = "Order lifecycle endpoints"),
        (name = "Order details", description = "Line items of an order"),
        (name = "Reports", description = "Sales reports"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_catalog_and_order_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/products",
            "/api/cart/user/{user_id}",
            "/api/orders/{id}/status",
            "/api/order-details/{id}",
            "/api/reports/best-sellers",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
